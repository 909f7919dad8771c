//! Inbound message classification and routing.
//!
//! The dispatcher turns raw datagram payloads into [`Message`]s and routes
//! them:
//!
//! - queries are broadcast on the event bus (generic topic first, then the
//!   per-name topic)
//! - responses and errors are broadcast generically, then published on the
//!   transaction id's channel in the pending-query registry
//!
//! Validation failures are returned to the caller as
//! [`RpcError::Malformed`]. Only query-kind failures that happen after the
//! transaction id is known are additionally broadcast as `parse_error`.
//! Handler failures come back as [`RpcError::Foreign`] and abort routing of
//! that message.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::MalformedReason;
use crate::events::{ErrorEvent, EventBus, ParseErrorEvent, QueryEvent, ResponseEvent};
use crate::pending::{Outcome, PendingQueryRegistry};
use crate::protocol::{
    decode, Dict, Message, MessageKind, PeerError, TransactionId, Value, KEY_ARGUMENTS, KEY_ERROR,
    KEY_KIND, KEY_QUERY_NAME, KEY_RESULT, KEY_TRANSACTION_ID,
};
use crate::{log_debug, log_warn, Result, RpcError};

pub(crate) struct MessageDispatcher {
    // ---
    events: Arc<EventBus>,
    pending: PendingQueryRegistry,
}

impl MessageDispatcher {
    // ---

    pub(crate) fn new(events: Arc<EventBus>, pending: PendingQueryRegistry) -> Self {
        Self { events, pending }
    }

    /// Decode, validate and route one inbound datagram.
    pub(crate) fn parse(&self, bytes: &[u8], from: SocketAddr) -> Result<Message> {
        // ---
        let mut dict = match decode(bytes) {
            Ok(Value::Dict(dict)) => dict,
            Ok(_) => return Err(malformed(MalformedReason::NotADictionary, from)),
            Err(err) => {
                return Err(malformed(
                    MalformedReason::Undecodable(err.to_string()),
                    from,
                ))
            }
        };

        let transaction_id = match dict.remove(KEY_TRANSACTION_ID) {
            Some(Value::Bytes(raw)) => TransactionId::from(raw),
            Some(_) => return Err(malformed(MalformedReason::InvalidTransactionId, from)),
            None => return Err(malformed(MalformedReason::MissingTransactionId, from)),
        };

        let kind = match dict.remove(KEY_KIND) {
            Some(Value::Bytes(raw)) => MessageKind::from_bytes(&raw),
            _ => None,
        };

        match kind {
            Some(MessageKind::Query) => self.route_query(dict, transaction_id, from),
            Some(MessageKind::Response) => self.route_response(dict, transaction_id, from),
            Some(MessageKind::Error) => self.route_error(dict, transaction_id, from),
            None => Err(malformed(MalformedReason::UnknownKind, from)),
        }
    }

    fn route_query(
        &self,
        mut dict: Dict,
        transaction_id: TransactionId,
        from: SocketAddr,
    ) -> Result<Message> {
        // ---
        let name = match dict.remove(KEY_QUERY_NAME) {
            Some(Value::Bytes(raw)) => {
                String::from_utf8(raw).map_err(|_| MalformedReason::InvalidQueryName)
            }
            Some(_) => Err(MalformedReason::InvalidQueryName),
            None => Err(MalformedReason::MissingQueryName),
        };

        let args = match dict.remove(KEY_ARGUMENTS) {
            Some(Value::Dict(args)) => Ok(args),
            Some(_) => Err(MalformedReason::InvalidArguments),
            None => Err(MalformedReason::MissingArguments),
        };

        // The name is checked before the arguments.
        let (name, args) = match (name, args) {
            (Ok(name), Ok(args)) => (name, args),
            (Err(reason), _) | (_, Err(reason)) => {
                return Err(self.reject_query(reason, transaction_id, from));
            }
        };

        let event = QueryEvent {
            name,
            args,
            transaction_id,
            from,
        };
        self.events.emit_query(&event).map_err(foreign)?;

        Ok(Message::Query {
            transaction_id: event.transaction_id,
            name: event.name,
            args: event.args,
        })
    }

    fn route_response(
        &self,
        mut dict: Dict,
        transaction_id: TransactionId,
        from: SocketAddr,
    ) -> Result<Message> {
        // ---
        let result = match dict.remove(KEY_RESULT) {
            Some(Value::Dict(result)) => result,
            Some(_) => return Err(malformed(MalformedReason::InvalidResult, from)),
            None => return Err(malformed(MalformedReason::MissingResult, from)),
        };

        let event = ResponseEvent {
            result,
            transaction_id,
            from,
        };
        self.events.emit_response(&event).map_err(foreign)?;

        self.pending.deliver(
            event.transaction_id.clone(),
            Outcome::Response(event.result.clone()),
            from,
        );

        Ok(Message::Response {
            transaction_id: event.transaction_id,
            result: event.result,
        })
    }

    fn route_error(
        &self,
        mut dict: Dict,
        transaction_id: TransactionId,
        from: SocketAddr,
    ) -> Result<Message> {
        // ---
        let error = match dict.remove(KEY_ERROR) {
            Some(Value::List(items)) => match items.as_slice() {
                [Value::Int(code), Value::Bytes(message)] => {
                    PeerError::new(*code, String::from_utf8_lossy(message))
                }
                _ => return Err(malformed(MalformedReason::InvalidErrorPayload, from)),
            },
            _ => return Err(malformed(MalformedReason::InvalidErrorPayload, from)),
        };

        let event = ErrorEvent {
            error,
            transaction_id,
            from,
        };
        self.events.emit_error(&event).map_err(foreign)?;

        self.pending.deliver(
            event.transaction_id.clone(),
            Outcome::Failure(event.error.clone()),
            from,
        );

        Ok(Message::Error {
            transaction_id: event.transaction_id,
            error: event.error,
        })
    }

    /// Broadcast a query validation failure and build the error to return.
    fn reject_query(
        &self,
        reason: MalformedReason,
        transaction_id: TransactionId,
        from: SocketAddr,
    ) -> RpcError {
        // ---
        let event = ParseErrorEvent {
            transaction_id,
            reason,
            from,
        };

        if let Err(_err) = self.events.emit_parse_error(&event) {
            log_warn!("parse_error handler failed: {_err}");
        }

        malformed(event.reason, from)
    }
}

fn malformed(reason: MalformedReason, _from: SocketAddr) -> RpcError {
    // ---
    log_debug!("malformed message from {_from}: {reason}");
    RpcError::Malformed(reason)
}

fn foreign(err: crate::error::BoxError) -> RpcError {
    // ---
    log_warn!("event handler failed: {err}");
    RpcError::Foreign(err)
}
