//! Domain layer public interface.
//!
//! Abstractions here are independent of concrete transports and of the KRPC
//! wire format. All consumers import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    Datagram,
    Transport,
    TransportPtr,
};
