//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Transport`] trait. It is intended for tests, local simulations of a set
//! of nodes, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - A transport owns exactly one [`SocketAddr`] on its hub; binding an
//!   address twice fails.
//! - Datagrams to an address nobody owns are dropped silently.
//! - Delivery never blocks the sender. When a receiver's queue is full the
//!   datagram is dropped, as a congested UDP socket would.
//! - Delivery order between two transports is preserved.
//!
//! ## Non-Goals
//!
//! This transport does not emulate packet loss, latency or MTU limits.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::{
    // ---
    log_debug,
    log_trace,
    Datagram,
    Result,
    RpcError,
    Transport,
    TransportPtr,
};

/// Inbound queue depth per bound address.
const INBOX_CAPACITY: usize = 64;

/// Shared datagram switch for the in-memory transport.
///
/// Every transport created on the same hub can reach every other one by
/// address, the way sockets on one network can.
///
/// For tests that run in parallel, construct a hub per test and pass it to
/// [`create_memory_transport_with_hub`]:
///
/// ```
/// # use krpc::MemoryHub;
/// # async fn example() -> krpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let a = krpc::create_memory_transport_with_hub("10.0.0.1:6881".parse().unwrap(), hub.clone()).await?;
/// let b = krpc::create_memory_transport_with_hub("10.0.0.2:6881".parse().unwrap(), hub.clone()).await?;
/// # let _ = (a, b);
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    routes: RwLock<HashMap<SocketAddr, mpsc::Sender<Datagram>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn bind(&self, addr: SocketAddr) -> Result<mpsc::Receiver<Datagram>> {
        // ---
        let mut routes = self.routes.write().await;
        if routes.contains_key(&addr) {
            return Err(RpcError::Transport(format!("address {addr} already bound")));
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        routes.insert(addr, tx);

        log_debug!("memory hub: bound {addr}");
        Ok(rx)
    }

    async fn route(&self, from: SocketAddr, to: SocketAddr, payload: Bytes) {
        // ---
        let routes = self.routes.read().await;

        let Some(sender) = routes.get(&to) else {
            log_trace!("memory hub: no route {from} -> {to}, dropped");
            return;
        };

        if let Err(_err) = sender.try_send(Datagram::new(from, payload)) {
            log_debug!("memory hub: dropped datagram {from} -> {to}: {_err}");
        }
    }

    async fn unbind(&self, addr: SocketAddr) {
        // ---
        self.routes.write().await.remove(&addr);
        log_debug!("memory hub: released {addr}");
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport bound to one address on a [`MemoryHub`].
struct MemoryTransport {
    // ---
    addr: SocketAddr,
    hub: Arc<MemoryHub>,
    inbox: Mutex<mpsc::Receiver<Datagram>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send_to(&self, payload: Bytes, peer: SocketAddr) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }
        self.hub.route(self.addr, peer, payload).await;
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Datagrams queued before `close()` are still returned; after that the
    /// call fails with [`RpcError::Closed`].
    async fn recv_from(&self) -> Result<Datagram> {
        // ---
        self.inbox.lock().await.recv().await.ok_or(RpcError::Closed)
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Dropping the hub's sender ends the inbox.
            self.hub.unbind(self.addr).await;
        }
        Ok(())
    }
}

/// Create an in-memory transport at `addr` on the process-global hub.
///
/// # Errors
///
/// Returns [`RpcError::Transport`] if `addr` is already bound.
pub async fn create_transport(addr: SocketAddr) -> Result<TransportPtr> {
    create_transport_with_hub(addr, global_hub()).await
}

/// Create an in-memory transport at `addr` on an explicit hub.
///
/// # Errors
///
/// Returns [`RpcError::Transport`] if `addr` is already bound on `hub`.
pub async fn create_transport_with_hub(
    addr: SocketAddr,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    let inbox = hub.bind(addr).await?;

    Ok(Arc::new(MemoryTransport {
        addr,
        hub,
        inbox: Mutex::new(inbox),
        closed: AtomicBool::new(false),
    }))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_datagram_carries_sender_address() {
        // ---
        let hub = MemoryHub::new();
        let a = create_transport_with_hub(addr("10.0.0.1:1000"), hub.clone())
            .await
            .unwrap();
        let b = create_transport_with_hub(addr("10.0.0.2:2000"), hub.clone())
            .await
            .unwrap();

        a.send_to(Bytes::from_static(b"hello"), b.local_addr())
            .await
            .unwrap();

        let datagram = b.recv_from().await.unwrap();
        assert_eq!(datagram.peer, addr("10.0.0.1:1000"));
        assert_eq!(&datagram.payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_duplicate_bind_rejected() {
        // ---
        let hub = MemoryHub::new();
        let _a = create_transport_with_hub(addr("10.0.0.1:1000"), hub.clone())
            .await
            .unwrap();

        let err = create_transport_with_hub(addr("10.0.0.1:1000"), hub.clone())
            .await
            .err()
            .expect("second bind succeeded");
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_dropped() {
        // ---
        let hub = MemoryHub::new();
        let a = create_transport_with_hub(addr("10.0.0.1:1000"), hub)
            .await
            .unwrap();

        assert!(a
            .send_to(Bytes::from_static(b"x"), addr("10.9.9.9:1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_receive_and_frees_address() {
        // ---
        let hub = MemoryHub::new();
        let a = create_transport_with_hub(addr("10.0.0.1:1000"), hub.clone())
            .await
            .unwrap();

        a.close().await.unwrap();
        a.close().await.unwrap();

        assert!(matches!(a.recv_from().await, Err(RpcError::Closed)));
        assert!(matches!(
            a.send_to(Bytes::from_static(b"x"), addr("10.0.0.2:1")).await,
            Err(RpcError::Closed)
        ));
        assert!(create_transport_with_hub(addr("10.0.0.1:1000"), hub)
            .await
            .is_ok());
    }
}
