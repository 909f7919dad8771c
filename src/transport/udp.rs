//! UDP transport.
//!
//! Wraps a tokio [`UdpSocket`]. One datagram on the wire is one KRPC
//! message; nothing is fragmented or reassembled here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

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

/// Largest UDP payload over IPv4 or IPv6 without jumbograms.
const MAX_DATAGRAM_SIZE: usize = 65_535;

struct UdpTransport {
    // ---
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    shutdown: Notify,
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    // ---
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, payload: Bytes, peer: SocketAddr) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let sent = self.socket.send_to(&payload, peer).await?;
        if sent != payload.len() {
            return Err(RpcError::Transport(format!(
                "short send to {peer}: {sent} of {} bytes",
                payload.len()
            )));
        }

        log_trace!("udp: {sent} bytes -> {peer}");
        Ok(())
    }

    async fn recv_from(&self) -> Result<Datagram> {
        // ---
        // Created before the flag check so a concurrent close() cannot slip
        // between the two.
        let shutdown = self.shutdown.notified();
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        tokio::select! {
            received = self.socket.recv_from(&mut buf) => {
                let (len, peer) = received?;
                log_trace!("udp: {len} bytes <- {peer}");
                Ok(Datagram::new(peer, Bytes::copy_from_slice(&buf[..len])))
            }
            _ = shutdown => Err(RpcError::Closed),
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.closed.swap(true, Ordering::AcqRel) {
            log_debug!("udp: closing {}", self.local_addr);
            self.shutdown.notify_waiters();
        }
        Ok(())
    }
}

/// Bind a UDP transport to `bind_addr`.
///
/// Use port 0 to let the operating system choose; the chosen address is
/// available from [`Transport::local_addr`].
///
/// # Errors
///
/// Returns [`RpcError::Io`] if the socket cannot be bound.
pub async fn create_transport(bind_addr: SocketAddr) -> Result<TransportPtr> {
    // ---
    let socket = UdpSocket::bind(bind_addr).await?;
    let local_addr = socket.local_addr()?;

    log_debug!("udp: bound {local_addr}");

    Ok(Arc::new(UdpTransport {
        socket,
        local_addr,
        closed: AtomicBool::new(false),
        shutdown: Notify::new(),
    }))
}
