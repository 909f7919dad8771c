//! KRPC: the bencoded query/response protocol of the BitTorrent DHT
//!
//! This library builds and parses KRPC messages, issues transaction ids,
//! tracks outstanding queries until their replies arrive or they time out,
//! and publishes inbound traffic on a typed event bus. Datagram delivery is
//! pluggable: a UDP transport and an in-process transport are provided.
//!
//! ```no_run
//! use krpc::{Dict, Krpc, KrpcConfig};
//!
//! # async fn example() -> krpc::Result<()> {
//! let krpc = Krpc::new(KrpcConfig::default())?;
//! let transport = krpc::create_udp_transport("0.0.0.0:6881".parse().unwrap()).await?;
//! krpc::run(transport.clone(), krpc.clone());
//!
//! let peer = "10.0.0.7:6881".parse().unwrap();
//! krpc.send_query(transport.as_ref(), peer, "ping", Dict::new(), |reply| {
//!     println!("ping: {reply:?}");
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod domain;
mod protocol;
mod transport;

mod config;
mod dispatcher;
mod events;
mod krpc;
mod pending;

mod error;
mod macros;
mod sync;

pub(crate) use macros::{log_debug, log_error, log_trace, log_warn};

// Re-export main types
pub use crate::krpc::Krpc;

pub use config::{Expiry, KrpcConfig, QueryOptions, DEFAULT_ID_WIDTH, DEFAULT_QUERY_TIMEOUT};
pub use error::{BoxError, MalformedReason, Result, RpcError};

pub use events::{
    //
    ErrorEvent,
    EventBus,
    HandlerResult,
    ParseErrorEvent,
    QueryEvent,
    ResponseEvent,
    SubscriptionId,
};
pub use pending::{PendingQueryRegistry, QueryCallback};

pub use protocol::{
    //
    build_error,
    build_query,
    build_response,
    byte_string,
    decode,
    dict,
    encode,
    Dict,
    ErrorCode,
    Message,
    MessageKind,
    PeerError,
    TransactionId,
    TransactionIdGenerator,
    Value,
};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    create_udp_transport,
    run,
    DatagramConsumer,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Datagram,
    Transport,
    TransportPtr,
};
