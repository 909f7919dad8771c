//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait, exposed
//! only through constructor functions, plus the receive loop that drives a
//! protocol instance from a transport.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod runner;
mod udp;

pub use memory::{
    // ---
    create_transport as create_memory_transport,
    create_transport_with_hub as create_memory_transport_with_hub,
    MemoryHub,
};
pub use runner::{run, DatagramConsumer};
pub use udp::create_transport as create_udp_transport;
