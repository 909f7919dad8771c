//! The protocol instance.
//!
//! [`Krpc`] ties the pieces together: a transaction id generator, the
//! pending-query registry, the event bus and the dispatcher. Every instance
//! owns its own copies; nothing is process-global.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::config::{KrpcConfig, QueryOptions};
use crate::dispatcher::MessageDispatcher;
use crate::domain::{Datagram, Transport};
use crate::events::{
    ErrorEvent, EventBus, HandlerResult, ParseErrorEvent, QueryEvent, ResponseEvent,
    SubscriptionId,
};
use crate::pending::{PendingQueryRegistry, QueryCallback};
use crate::protocol::{
    build_error, build_query, build_response, Dict, Message, TransactionId,
    TransactionIdGenerator,
};
use crate::sync::lock_ignore_poison;
use crate::transport::DatagramConsumer;
use crate::{log_debug, log_trace, Result};

/// A KRPC protocol instance.
///
/// Cheap to clone (internally `Arc`-backed). Must be created inside a tokio
/// runtime; pending-query callbacks and timers run on that runtime.
///
/// # Example
///
/// ```no_run
/// use krpc::{Krpc, KrpcConfig, QueryOptions};
///
/// # async fn example() -> krpc::Result<()> {
/// let krpc = Krpc::new(KrpcConfig::default())?;
///
/// krpc.on_query_named("ping", |event| {
///     println!("ping from {}", event.from);
///     Ok(())
/// });
///
/// let id = krpc.issue_query(QueryOptions::new(), |outcome| match outcome {
///     Ok(result) => println!("reply: {result:?}"),
///     Err(err) => println!("query failed: {err}"),
/// });
/// let bytes = krpc::build_query(&id, "ping", krpc::Dict::new())?;
/// # let _ = bytes;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Krpc {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    config: KrpcConfig,
    ids: Mutex<TransactionIdGenerator>,
    events: Arc<EventBus>,
    pending: PendingQueryRegistry,
    dispatcher: MessageDispatcher,
}

impl Krpc {
    // ---

    /// Create a protocol instance.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidConfig`](crate::RpcError::InvalidConfig) if the
    ///   configuration does not validate
    /// - [`RpcError::NoRuntime`](crate::RpcError::NoRuntime) outside a tokio runtime
    pub fn new(config: KrpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let pending = PendingQueryRegistry::spawn(config.default_timeout)?;
        let events = Arc::new(EventBus::new());
        let dispatcher = MessageDispatcher::new(events.clone(), pending.clone());
        let ids = Mutex::new(TransactionIdGenerator::new(config.id_width_bytes));

        log_debug!(
            "krpc instance created (id width {}, default timeout {:?})",
            config.id_width_bytes,
            config.default_timeout
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ids,
                events,
                pending,
                dispatcher,
            }),
        })
    }

    pub fn config(&self) -> &KrpcConfig {
        &self.inner.config
    }

    /// Decode an inbound datagram from `from` and route it.
    ///
    /// Queries reach the `query` and per-name subscribers before this returns.
    /// Responses and errors are broadcast, then queued for the pending query
    /// that owns their transaction id; its callback runs later on the registry
    /// task.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Malformed`](crate::RpcError::Malformed) for structurally
    ///   invalid input
    /// - [`RpcError::Foreign`](crate::RpcError::Foreign) when a subscriber
    ///   returned an error
    pub fn parse(&self, bytes: &[u8], from: SocketAddr) -> Result<Message> {
        self.inner.dispatcher.parse(bytes, from)
    }

    /// Issue a transaction id without tracking replies to it.
    pub fn issue_transaction_id(&self) -> TransactionId {
        lock_ignore_poison(&self.inner.ids).issue()
    }

    /// Issue a transaction id and arm a pending query for it.
    ///
    /// `callback` runs for every reply that passes `options`' filters until the
    /// query expires, then once more with
    /// [`RpcError::Timeout`](crate::RpcError::Timeout).
    pub fn issue_query<F>(&self, options: QueryOptions, callback: F) -> TransactionId
    where
        F: FnMut(Result<Dict>) + Send + 'static,
    {
        // ---
        let transaction_id = self.issue_transaction_id();
        self.register(transaction_id.clone(), options, Some(Box::new(callback)));
        transaction_id
    }

    /// Arm a pending query for an id obtained elsewhere.
    ///
    /// Without a callback this is a no-op.
    pub fn register(
        &self,
        transaction_id: TransactionId,
        options: QueryOptions,
        callback: Option<QueryCallback>,
    ) {
        self.inner.pending.register(transaction_id, options, callback);
    }

    /// Number of armed pending queries.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    /// Dispose of all pending queries without invoking their callbacks.
    ///
    /// Parsing keeps working afterwards, but replies no longer reach anyone.
    pub fn close(&self) {
        log_debug!("closing krpc instance");
        self.inner.pending.close();
    }

    /// The instance's event bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to every inbound query.
    pub fn on_query<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&QueryEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.events.on_query(handler)
    }

    /// Subscribe to inbound queries named `name`.
    pub fn on_query_named<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&QueryEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.events.on_query_named(name, handler)
    }

    /// Subscribe to every inbound response.
    pub fn on_response<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ResponseEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.events.on_response(handler)
    }

    /// Subscribe to every inbound error message.
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.events.on_error(handler)
    }

    /// Subscribe to query validation failures.
    pub fn on_parse_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ParseErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.events.on_parse_error(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Issue a query to `peer` over `transport`.
    ///
    /// Replies are only accepted from `peer`'s exact address, and the query
    /// expires after the instance's default timeout. The pending query is
    /// armed before the datagram leaves, so a send failure is reported here
    /// and, later, as a timeout through `callback`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub async fn send_query<F>(
        &self,
        transport: &dyn Transport,
        peer: SocketAddr,
        name: &str,
        args: Dict,
        callback: F,
    ) -> Result<TransactionId>
    where
        F: FnMut(Result<Dict>) + Send + 'static,
    {
        // ---
        let transaction_id = self.issue_query(QueryOptions::new().filter_peer(peer), callback);
        let payload = build_query(&transaction_id, name, args)?;

        log_trace!("query {name} {transaction_id} -> {peer}");
        transport.send_to(payload, peer).await?;

        Ok(transaction_id)
    }

    /// Answer a query from `peer`.
    pub async fn send_response(
        &self,
        transport: &dyn Transport,
        peer: SocketAddr,
        transaction_id: &TransactionId,
        result: Dict,
    ) -> Result<()> {
        // ---
        let payload: Bytes = build_response(transaction_id, result)?;
        transport.send_to(payload, peer).await
    }

    /// Reject a query from `peer` with an error message.
    pub async fn send_error(
        &self,
        transport: &dyn Transport,
        peer: SocketAddr,
        transaction_id: &TransactionId,
        code: impl Into<i64>,
        message: &str,
    ) -> Result<()> {
        // ---
        let payload = build_error(transaction_id, code, message)?;
        transport.send_to(payload, peer).await
    }
}

#[async_trait::async_trait]
impl DatagramConsumer for Krpc {
    async fn handle_datagram(&self, datagram: Datagram) -> Result<()> {
        self.parse(&datagram.payload, datagram.peer).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::RpcError;

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        // ---
        let err = Krpc::new(KrpcConfig::default().with_id_width(0))
            .err()
            .expect("zero width accepted");
        assert!(matches!(err, RpcError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_ids_have_configured_width() {
        // ---
        let krpc = Krpc::new(KrpcConfig::default().with_id_width(4)).unwrap();

        let first = krpc.issue_transaction_id();
        let second = krpc.issue_transaction_id();
        assert_eq!(first.len(), 4);
        assert_ne!(first, second);
        assert_eq!(krpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_issue_query_arms_listener() {
        // ---
        let krpc = Krpc::new(KrpcConfig::default()).unwrap();

        let id = krpc.issue_query(QueryOptions::new(), |_| {});
        assert_eq!(id.len(), 2);
        assert_eq!(krpc.pending_count(), 1);
    }

    #[test]
    fn test_requires_runtime() {
        // ---
        assert!(matches!(
            Krpc::new(KrpcConfig::default()),
            Err(RpcError::NoRuntime)
        ));
    }
}
