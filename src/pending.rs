//! Pending-query registry.
//!
//! Tracks outstanding queries that were issued with a callback and resolves
//! them against inbound responses and errors.
//!
//! # Architecture
//!
//! A single worker task owns the map from transaction id to pending queries.
//! Every mutation reaches it as a command on one unbounded FIFO queue:
//!
//! - `Register`: arm a listener (and its timer) for a transaction id
//! - `Deliver`: an inbound response or error for a transaction id
//! - `Expire`: a timer fired
//! - `Close`: dispose of everything and stop
//!
//! Timers are tasks that sleep and then enqueue `Expire` on the same queue.
//! Because the queue is FIFO, a delivery enqueued before the timer fired is
//! always handled first, and a delivery enqueued afterwards finds no listener
//! and is dropped. No lock protects the map; the worker is its only writer.
//!
//! # Delivery semantics
//!
//! A listener is never removed after a delivery. Every inbound message for its
//! transaction id that passes its address filters invokes the callback, until
//! the timer fires. Several listeners may share an id (a counter wraparound
//! or a deliberate reuse); each one applies its own filters independently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::QueryOptions;
use crate::protocol::{Dict, PeerError, TransactionId};
use crate::{log_debug, log_error, log_trace, Result, RpcError};

/// Callback invoked for each accepted delivery and once on expiry.
///
/// Receives `Ok(result)` for a response, `Err(RpcError::Peer(_))` for an error
/// message and `Err(RpcError::Timeout)` when the query expires. Callbacks run
/// on the registry's worker task and must not block. A panicking callback is
/// logged; its query stays armed and other queries are unaffected.
pub type QueryCallback = Box<dyn FnMut(Result<Dict>) + Send + 'static>;

/// Payload published on a transaction id's channel.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Response(Dict),
    Failure(PeerError),
}

impl Outcome {
    fn to_result(&self) -> Result<Dict> {
        // ---
        match self {
            Self::Response(result) => Ok(result.clone()),
            Self::Failure(error) => Err(RpcError::Peer(error.clone())),
        }
    }
}

enum Command {
    Register {
        transaction_id: TransactionId,
        options: QueryOptions,
        callback: QueryCallback,
    },
    Deliver {
        transaction_id: TransactionId,
        outcome: Outcome,
        from: SocketAddr,
    },
    Expire {
        transaction_id: TransactionId,
        entry: u64,
    },
    Close,
}

struct PendingQuery {
    // ---
    entry: u64,
    options: QueryOptions,
    callback: QueryCallback,
    timer: Option<JoinHandle<()>>,
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Handle to the pending-query registry.
///
/// Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct PendingQueryRegistry {
    // ---
    tx: mpsc::UnboundedSender<Command>,
    armed: Arc<AtomicUsize>,
}

impl PendingQueryRegistry {
    // ---

    /// Start the registry worker on the current tokio runtime.
    ///
    /// `default_timeout` applies to queries registered with
    /// [`Expiry::Default`](crate::Expiry::Default); `Duration::ZERO` disables
    /// expiry for them.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoRuntime`] when called outside a tokio runtime.
    pub fn spawn(default_timeout: Duration) -> Result<Self> {
        // ---
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RpcError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            rx,
            timer_tx: tx.downgrade(),
            default_timeout,
            queries: HashMap::new(),
            armed: armed.clone(),
            next_entry: 0,
        };
        runtime.spawn(worker.run());

        Ok(Self { tx, armed })
    }

    /// Register interest in replies carrying `transaction_id`.
    ///
    /// Without a callback nothing is recorded. With one, a listener is armed
    /// until its timer fires; see the module docs for delivery semantics.
    /// Returns immediately; the callback always runs on the worker task.
    pub fn register(
        &self,
        transaction_id: TransactionId,
        options: QueryOptions,
        callback: Option<QueryCallback>,
    ) {
        // ---
        let Some(callback) = callback else {
            log_trace!("fire-and-forget query {transaction_id}");
            return;
        };

        self.armed.fetch_add(1, Ordering::SeqCst);

        let cmd = Command::Register {
            transaction_id,
            options,
            callback,
        };
        if self.tx.send(cmd).is_err() {
            self.armed.fetch_sub(1, Ordering::SeqCst);
            log_debug!("registry closed, query dropped");
        }
    }

    /// Publish an inbound outcome on `transaction_id`'s channel.
    pub(crate) fn deliver(
        &self,
        transaction_id: TransactionId,
        outcome: Outcome,
        from: SocketAddr,
    ) {
        // ---
        let cmd = Command::Deliver {
            transaction_id,
            outcome,
            from,
        };
        if self.tx.send(cmd).is_err() {
            log_debug!("registry closed, delivery dropped");
        }
    }

    /// Number of armed listeners.
    ///
    /// Counts registrations that have been accepted but not yet expired or
    /// disposed, including ones the worker has not processed yet.
    pub fn pending_count(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    /// Dispose of every armed listener without invoking its callback and stop
    /// the worker.
    ///
    /// Later registrations and deliveries are dropped.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Worker {
    // ---
    rx: mpsc::UnboundedReceiver<Command>,
    timer_tx: mpsc::WeakUnboundedSender<Command>,
    default_timeout: Duration,
    queries: HashMap<TransactionId, Vec<PendingQuery>>,
    armed: Arc<AtomicUsize>,
    next_entry: u64,
}

impl Worker {
    // ---

    async fn run(mut self) {
        // ---
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register {
                    transaction_id,
                    options,
                    callback,
                } => self.register(transaction_id, options, callback),
                Command::Deliver {
                    transaction_id,
                    outcome,
                    from,
                } => self.deliver(&transaction_id, &outcome, from),
                Command::Expire {
                    transaction_id,
                    entry,
                } => self.expire(&transaction_id, entry),
                Command::Close => break,
            }
        }

        self.shutdown();
    }

    fn register(
        &mut self,
        transaction_id: TransactionId,
        options: QueryOptions,
        callback: QueryCallback,
    ) {
        // ---
        let entry = self.next_entry;
        self.next_entry += 1;

        let timer = options
            .expiry
            .resolve(self.default_timeout)
            .and_then(|timeout| self.arm_timer(transaction_id.clone(), entry, timeout));

        if timer.is_none() {
            log_debug!("query {transaction_id} registered without expiry");
        }

        self.queries
            .entry(transaction_id)
            .or_default()
            .push(PendingQuery {
                entry,
                options,
                callback,
                timer,
            });
    }

    fn arm_timer(
        &self,
        transaction_id: TransactionId,
        entry: u64,
        timeout: Duration,
    ) -> Option<JoinHandle<()>> {
        // ---
        // Every handle is gone; nothing could deliver to this query anyway.
        let tx = self.timer_tx.upgrade()?;

        Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Command::Expire {
                transaction_id,
                entry,
            });
        }))
    }

    fn deliver(&mut self, transaction_id: &TransactionId, outcome: &Outcome, from: SocketAddr) {
        // ---
        let Some(queries) = self.queries.get_mut(transaction_id) else {
            log_debug!("no pending query for {transaction_id} from {from}, dropped");
            return;
        };

        for query in queries.iter_mut() {
            if !query.options.accepts(from) {
                log_trace!("delivery for {transaction_id} from {from} filtered");
                continue;
            }
            invoke(&mut query.callback, transaction_id, outcome.to_result());
        }
    }

    fn expire(&mut self, transaction_id: &TransactionId, entry: u64) {
        // ---
        let Some(queries) = self.queries.get_mut(transaction_id) else {
            return;
        };
        let Some(pos) = queries.iter().position(|q| q.entry == entry) else {
            return;
        };

        let mut query = queries.remove(pos);
        if queries.is_empty() {
            self.queries.remove(transaction_id);
        }
        self.armed.fetch_sub(1, Ordering::SeqCst);

        // The timer task is the one that sent this command.
        query.timer = None;

        log_debug!("query {transaction_id} timed out");
        invoke(&mut query.callback, transaction_id, Err(RpcError::Timeout));
    }

    fn shutdown(&mut self) {
        // ---
        self.rx.close();

        // Registrations that raced with Close were counted but never armed.
        while let Ok(cmd) = self.rx.try_recv() {
            if let Command::Register { .. } = cmd {
                self.armed.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let disposed: usize = self.queries.values().map(Vec::len).sum();
        self.armed.fetch_sub(disposed, Ordering::SeqCst);
        self.queries.clear();

        log_debug!("pending-query registry stopped, {disposed} listeners disposed");
    }
}

/// Run a callback on the worker task. A panic is logged and goes no further.
fn invoke(callback: &mut QueryCallback, transaction_id: &TransactionId, outcome: Result<Dict>) {
    // ---
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(outcome))) {
        let reason = panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        log_error!("callback for query {transaction_id} panicked: {reason}");
    }
}
