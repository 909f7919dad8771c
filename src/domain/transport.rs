// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! A KRPC node exchanges single, unreliable datagrams with peers identified
//! by socket address. This module defines the minimal contract the protocol
//! layer needs from such a channel. It makes no reference to sockets or any
//! other concrete mechanism.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// A datagram received from, or addressed to, a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    // ---
    /// The remote endpoint: the sender for inbound datagrams.
    pub peer: SocketAddr,

    /// Opaque payload bytes. For KRPC traffic this is a bencoded dictionary.
    pub payload: Bytes,
}

impl Datagram {
    pub fn new(peer: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            peer,
            payload: payload.into(),
        }
    }
}

/// Datagram transport abstraction.
///
/// Delivery is best effort: datagrams may be dropped, duplicated or
/// reordered, and the protocol layer never assumes otherwise. Timeouts and
/// reply matching are handled above this trait.
///
/// Implementations must ensure that:
/// - `send_to()` never waits on the receiving side
/// - after `close()`, `recv_from()` fails with
///   [`RpcError::Closed`](crate::RpcError::Closed) instead of waiting forever
///   (datagrams already queued may still be returned first)
///
/// # Available Implementations
///
/// - `create_memory_transport` - In-process transport on a shared [`MemoryHub`](crate::MemoryHub)
/// - `create_udp_transport` - UDP socket
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Treat the methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// The address peers use to reach this transport.
    fn local_addr(&self) -> SocketAddr;

    /// Send one datagram to `peer`.
    ///
    /// Success means the datagram was handed off, not that it arrived.
    async fn send_to(&self, payload: Bytes, peer: SocketAddr) -> Result<()>;

    /// Wait for the next inbound datagram.
    async fn recv_from(&self) -> Result<Datagram>;

    /// Stop receiving. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a transport.
pub type TransportPtr = Arc<dyn Transport>;
