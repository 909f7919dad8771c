//! Synchronous publish/subscribe for inbound message events.
//!
//! The dispatcher broadcasts every validated message on one of the generic
//! topics (`query`, `response`, `error`, `parse_error`). Queries are also
//! broadcast on a per-name topic, the equivalent of `query_<name>`.
//!
//! Handlers run synchronously on the thread calling
//! [`Krpc::parse`](crate::Krpc::parse), in subscription order. A handler that
//! returns `Err` stops the broadcast and the error is handed back to the
//! dispatcher. The handler list is cloned out of its lock before any handler
//! runs, so handlers may subscribe or unsubscribe from inside a callback.
//!
//! The per-transaction channel is not part of this bus; it is the
//! pending-query registry's command queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BoxError, MalformedReason};
use crate::protocol::{Dict, PeerError, TransactionId};
use crate::sync::lock_ignore_poison;

/// Outcome of an event handler.
pub type HandlerResult = std::result::Result<(), BoxError>;

type Handler<E> = Arc<dyn Fn(&E) -> HandlerResult + Send + Sync>;

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An inbound query.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub name: String,
    pub args: Dict,
    pub transaction_id: TransactionId,
    pub from: SocketAddr,
}

/// An inbound response.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub result: Dict,
    pub transaction_id: TransactionId,
    pub from: SocketAddr,
}

/// An inbound error message.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub error: PeerError,
    pub transaction_id: TransactionId,
    pub from: SocketAddr,
}

/// A query that failed validation.
#[derive(Debug, Clone)]
pub struct ParseErrorEvent {
    pub transaction_id: TransactionId,
    pub reason: MalformedReason,
    pub from: SocketAddr,
}

struct Topic<E> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Topic<E> {
    fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, id: SubscriptionId, handler: Handler<E>) {
        lock_ignore_poison(&self.handlers).push((id, handler));
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // ---
        let mut handlers = lock_ignore_poison(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    fn len(&self) -> usize {
        lock_ignore_poison(&self.handlers).len()
    }

    fn emit(&self, event: &E) -> HandlerResult {
        // ---
        let handlers: Vec<Handler<E>> = lock_ignore_poison(&self.handlers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event)?;
        }
        Ok(())
    }
}

/// Event bus owned by one [`Krpc`](crate::Krpc) instance.
pub struct EventBus {
    // ---
    next_id: AtomicU64,
    query: Topic<QueryEvent>,
    named_query: Mutex<HashMap<String, Arc<Topic<QueryEvent>>>>,
    response: Topic<ResponseEvent>,
    error: Topic<ErrorEvent>,
    parse_error: Topic<ParseErrorEvent>,
}

impl EventBus {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            next_id: AtomicU64::new(1),
            query: Topic::new(),
            named_query: Mutex::new(HashMap::new()),
            response: Topic::new(),
            error: Topic::new(),
            parse_error: Topic::new(),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to every inbound query.
    pub fn on_query<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&QueryEvent) -> HandlerResult + Send + Sync + 'static,
    {
        // ---
        let id = self.next_id();
        self.query.subscribe(id, Arc::new(handler));
        id
    }

    /// Subscribe to inbound queries named `name`.
    pub fn on_query_named<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&QueryEvent) -> HandlerResult + Send + Sync + 'static,
    {
        // ---
        let id = self.next_id();
        let topic = lock_ignore_poison(&self.named_query)
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone();
        topic.subscribe(id, Arc::new(handler));
        id
    }

    /// Subscribe to every inbound response.
    pub fn on_response<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ResponseEvent) -> HandlerResult + Send + Sync + 'static,
    {
        // ---
        let id = self.next_id();
        self.response.subscribe(id, Arc::new(handler));
        id
    }

    /// Subscribe to every inbound error message.
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        // ---
        let id = self.next_id();
        self.error.subscribe(id, Arc::new(handler));
        id
    }

    /// Subscribe to query validation failures.
    pub fn on_parse_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ParseErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        // ---
        let id = self.next_id();
        self.parse_error.subscribe(id, Arc::new(handler));
        id
    }

    /// Remove a subscription from whichever topic holds it.
    ///
    /// Returns `false` if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // ---
        if self.query.unsubscribe(id)
            || self.response.unsubscribe(id)
            || self.error.unsubscribe(id)
            || self.parse_error.unsubscribe(id)
        {
            return true;
        }

        let mut named = lock_ignore_poison(&self.named_query);
        let mut removed = false;
        named.retain(|_, topic| {
            removed |= topic.unsubscribe(id);
            topic.len() > 0
        });
        removed
    }

    /// Broadcast on the generic query topic, then on the per-name topic.
    pub(crate) fn emit_query(&self, event: &QueryEvent) -> HandlerResult {
        // ---
        self.query.emit(event)?;

        let topic = lock_ignore_poison(&self.named_query)
            .get(&event.name)
            .cloned();
        match topic {
            Some(topic) => topic.emit(event),
            None => Ok(()),
        }
    }

    pub(crate) fn emit_response(&self, event: &ResponseEvent) -> HandlerResult {
        self.response.emit(event)
    }

    pub(crate) fn emit_error(&self, event: &ErrorEvent) -> HandlerResult {
        self.error.emit(event)
    }

    pub(crate) fn emit_parse_error(&self, event: &ParseErrorEvent) -> HandlerResult {
        self.parse_error.emit(event)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn query(name: &str) -> QueryEvent {
        // ---
        QueryEvent {
            name: name.to_owned(),
            args: Dict::new(),
            transaction_id: TransactionId::from(b"aa".to_vec()),
            from: "1.1.1.1:20000".parse().unwrap(),
        }
    }

    #[test]
    fn test_generic_then_named() {
        // ---
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.on_query_named("ping", move |_| {
            o.lock().unwrap().push("named");
            Ok(())
        });
        let o = order.clone();
        bus.on_query(move |_| {
            o.lock().unwrap().push("generic");
            Ok(())
        });

        bus.emit_query(&query("ping")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["generic", "named"]);
    }

    #[test]
    fn test_named_topic_is_exact() {
        // ---
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        bus.on_query_named("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit_query(&query("find_node")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.emit_query(&query("ping")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_stops_broadcast() {
        // ---
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on_query(|_| Err("boom".into()));
        let h = hits.clone();
        bus.on_query_named("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = bus.emit_query(&query("ping")).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        // ---
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let generic = bus.on_query(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let h = hits.clone();
        let named = bus.on_query_named("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.unsubscribe(generic));
        assert!(bus.unsubscribe(named));
        assert!(!bus.unsubscribe(named));

        bus.emit_query(&query("ping")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_subscribe_reentrantly() {
        // ---
        let bus = Arc::new(EventBus::new());

        let inner = bus.clone();
        bus.on_query(move |_| {
            inner.on_query(|_| Ok(()));
            Ok(())
        });

        bus.emit_query(&query("ping")).unwrap();
        assert_eq!(bus.query.len(), 2);
    }
}
