use std::fmt;

use thiserror::Error;

use crate::protocol::PeerError;

/// Boxed error returned by event handlers.
///
/// Handlers signal failure by returning `Err`; the dispatcher wraps it in
/// [`RpcError::Foreign`] before handing it back to the `parse` caller.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an inbound datagram was rejected by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// The codec could not decode the bytes.
    Undecodable(String),
    /// Decoded fine, but the top level is not a dictionary.
    NotADictionary,
    /// No `t` key.
    MissingTransactionId,
    /// `t` is present but not a byte string.
    InvalidTransactionId,
    /// `y` is missing or not one of `q`, `r`, `e`.
    UnknownKind,
    /// Query without a `q` key.
    MissingQueryName,
    /// `q` is not a UTF-8 byte string.
    InvalidQueryName,
    /// Query without an `a` key.
    MissingArguments,
    /// `a` is not a dictionary.
    InvalidArguments,
    /// Response without an `r` key.
    MissingResult,
    /// `r` is not a dictionary.
    InvalidResult,
    /// `e` is not a `[code, message]` list.
    InvalidErrorPayload,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            Self::Undecodable(detail) => write!(f, "undecodable message: {detail}"),
            Self::NotADictionary => f.write_str("message is not a dictionary"),
            Self::MissingTransactionId => f.write_str("missing transaction id"),
            Self::InvalidTransactionId => f.write_str("transaction id is not a byte string"),
            Self::UnknownKind => f.write_str("invalid message type"),
            Self::MissingQueryName => f.write_str("missing query type"),
            Self::InvalidQueryName => f.write_str("query type is not a utf-8 byte string"),
            Self::MissingArguments => f.write_str("missing query data"),
            Self::InvalidArguments => f.write_str("query data is not a dictionary"),
            Self::MissingResult => f.write_str("missing respond data"),
            Self::InvalidResult => f.write_str("respond data is not a dictionary"),
            Self::InvalidErrorPayload => f.write_str("invalid error data"),
        }
    }
}

/// Errors produced by the KRPC layer.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Inbound bytes were structurally invalid.
    #[error("malformed message: {0}")]
    Malformed(MalformedReason),

    /// A pending query expired before it was resolved.
    ///
    /// Only ever delivered through a query callback.
    #[error("query timed out")]
    Timeout,

    /// The remote peer answered with an error message.
    ///
    /// Delivered through a query callback; `parse` never returns it.
    #[error("peer error: {0}")]
    Peer(PeerError),

    /// An event handler failed while a message was being broadcast.
    #[error("event handler failed: {0}")]
    Foreign(#[source] BoxError),

    /// Encoding failed while building an outbound message.
    #[error("bencode error: {0}")]
    Codec(#[from] serde_bencode::Error),

    /// Configuration rejected by [`KrpcConfig::validate`](crate::KrpcConfig::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A `Krpc` instance was created outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Returns `true` for [`RpcError::Malformed`].
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Returns `true` for [`RpcError::Foreign`].
    pub fn is_foreign(&self) -> bool {
        matches!(self, Self::Foreign(_))
    }

    /// The rejection reason, if this is a malformed-message error.
    pub fn malformed_reason(&self) -> Option<&MalformedReason> {
        match self {
            Self::Malformed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<MalformedReason> for RpcError {
    fn from(reason: MalformedReason) -> Self {
        Self::Malformed(reason)
    }
}

/// Result type alias for KRPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
