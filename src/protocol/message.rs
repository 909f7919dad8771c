use std::fmt;

use bytes::Bytes;

use crate::protocol::codec::{self, byte_string, Dict, Value};
use crate::protocol::TransactionId;
use crate::Result;

/// Transaction id key.
pub(crate) const KEY_TRANSACTION_ID: &[u8] = b"t";
/// Message kind key.
pub(crate) const KEY_KIND: &[u8] = b"y";
/// Query name key.
pub(crate) const KEY_QUERY_NAME: &[u8] = b"q";
/// Query arguments key.
pub(crate) const KEY_ARGUMENTS: &[u8] = b"a";
/// Response result key.
pub(crate) const KEY_RESULT: &[u8] = b"r";
/// Error payload key.
pub(crate) const KEY_ERROR: &[u8] = b"e";

/// Message kind discriminator carried in the `y` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Query,
    Response,
    Error,
}

impl MessageKind {
    /// Wire form of the discriminator.
    pub fn as_bytes(self) -> &'static [u8] {
        // ---
        match self {
            Self::Query => b"q",
            Self::Response => b"r",
            Self::Error => b"e",
        }
    }

    /// Parse the wire form of the discriminator.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        // ---
        match raw {
            b"q" => Some(Self::Query),
            b"r" => Some(Self::Response),
            b"e" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Well-known KRPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Generic,
    Server,
    Protocol,
    MethodUnknown,
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn code(self) -> i64 {
        // ---
        match self {
            Self::Generic => 201,
            Self::Server => 202,
            Self::Protocol => 203,
            Self::MethodUnknown => 204,
        }
    }

    /// Map a numeric code back to a well-known code.
    pub fn from_code(code: i64) -> Option<Self> {
        // ---
        match code {
            201 => Some(Self::Generic),
            202 => Some(Self::Server),
            203 => Some(Self::Protocol),
            204 => Some(Self::MethodUnknown),
            _ => None,
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Failure reported by a remote peer in an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerError {
    pub code: i64,
    pub message: String,
}

impl PeerError {
    pub fn new(code: impl Into<i64>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The well-known code, if `code` is one.
    pub fn well_known(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for PeerError {}

/// A decoded, validated KRPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Query {
        transaction_id: TransactionId,
        name: String,
        args: Dict,
    },
    Response {
        transaction_id: TransactionId,
        result: Dict,
    },
    Error {
        transaction_id: TransactionId,
        error: PeerError,
    },
}

impl Message {
    // ---

    /// The transaction id of the message, whatever its kind.
    pub fn transaction_id(&self) -> &TransactionId {
        // ---
        match self {
            Self::Query { transaction_id, .. }
            | Self::Response { transaction_id, .. }
            | Self::Error { transaction_id, .. } => transaction_id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        // ---
        match self {
            Self::Query { .. } => MessageKind::Query,
            Self::Response { .. } => MessageKind::Response,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// Assemble the wire dictionary for this message.
    pub fn to_value(&self) -> Value {
        // ---
        let mut dict = Dict::new();
        dict.insert(
            KEY_TRANSACTION_ID.to_vec(),
            byte_string(self.transaction_id()),
        );
        dict.insert(KEY_KIND.to_vec(), byte_string(self.kind().as_bytes()));

        match self {
            Self::Query { name, args, .. } => {
                dict.insert(KEY_QUERY_NAME.to_vec(), byte_string(name));
                dict.insert(KEY_ARGUMENTS.to_vec(), Value::Dict(args.clone()));
            }
            Self::Response { result, .. } => {
                dict.insert(KEY_RESULT.to_vec(), Value::Dict(result.clone()));
            }
            Self::Error { error, .. } => {
                dict.insert(
                    KEY_ERROR.to_vec(),
                    Value::List(vec![Value::Int(error.code), byte_string(&error.message)]),
                );
            }
        }

        Value::Dict(dict)
    }

    /// Encode this message into its wire form.
    pub fn encode(&self) -> Result<Bytes> {
        codec::encode(&self.to_value())
    }
}

/// Encode a query message.
pub fn build_query(transaction_id: &TransactionId, name: &str, args: Dict) -> Result<Bytes> {
    // ---
    Message::Query {
        transaction_id: transaction_id.clone(),
        name: name.to_owned(),
        args,
    }
    .encode()
}

/// Encode a response message.
pub fn build_response(transaction_id: &TransactionId, result: Dict) -> Result<Bytes> {
    // ---
    Message::Response {
        transaction_id: transaction_id.clone(),
        result,
    }
    .encode()
}

/// Encode an error message.
pub fn build_error(
    transaction_id: &TransactionId,
    code: impl Into<i64>,
    message: &str,
) -> Result<Bytes> {
    // ---
    Message::Error {
        transaction_id: transaction_id.clone(),
        error: PeerError::new(code, message),
    }
    .encode()
}
