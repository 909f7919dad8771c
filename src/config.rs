//! Protocol-instance and per-query configuration.
//!
//! Neither type knows anything about sockets; transports are configured
//! separately when they are created.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::{Result, RpcError};

/// Default transaction id width in bytes.
pub const DEFAULT_ID_WIDTH: usize = 2;

/// Default lifetime of a pending query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Configuration of a [`Krpc`](crate::Krpc) instance.
///
/// # Example
///
/// ```
/// use krpc::KrpcConfig;
/// use std::time::Duration;
///
/// let config = KrpcConfig::default()
///     .with_id_width(4)
///     .with_default_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct KrpcConfig {
    // ---
    /// Width of issued transaction ids in bytes.
    ///
    /// Ids repeat after `2^(8 * width)` queries. Pick a width that keeps the
    /// chance of two outstanding queries sharing an id negligible.
    ///
    /// Default: 2
    pub id_width_bytes: usize,

    /// Timeout applied to queries that do not set their own.
    ///
    /// `Duration::ZERO` disables automatic expiry: such listeners stay armed
    /// until the instance is closed.
    ///
    /// Default: 2 seconds
    pub default_timeout: Duration,
}

impl Default for KrpcConfig {
    fn default() -> Self {
        // ---
        Self {
            id_width_bytes: DEFAULT_ID_WIDTH,
            default_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl KrpcConfig {
    /// Set the transaction id width in bytes.
    pub fn with_id_width(mut self, bytes: usize) -> Self {
        self.id_width_bytes = bytes;
        self
    }

    /// Set the default query timeout (`Duration::ZERO` disables expiry).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Check the configuration for values the protocol cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if `id_width_bytes` is zero.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.id_width_bytes == 0 {
            return Err(RpcError::InvalidConfig(
                "id_width_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// When a pending query expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the instance's default timeout.
    #[default]
    Default,
    /// Expire after the given duration. `Duration::ZERO` means never.
    After(Duration),
    /// Never expire automatically.
    Never,
}

impl Expiry {
    /// Resolve against the instance default; `None` means no timer.
    pub(crate) fn resolve(self, default: Duration) -> Option<Duration> {
        // ---
        let timeout = match self {
            Self::Default => default,
            Self::After(timeout) => timeout,
            Self::Never => return None,
        };
        (!timeout.is_zero()).then_some(timeout)
    }
}

/// Per-query filtering and expiry options.
///
/// Filters restrict which senders may resolve the query; a delivery from any
/// other address is ignored and the query stays armed.
///
/// # Example
///
/// ```
/// use krpc::QueryOptions;
/// use std::time::Duration;
///
/// let options = QueryOptions::new()
///     .filter_peer("10.0.0.7:6881".parse().unwrap())
///     .timeout(Duration::from_millis(500));
/// assert_eq!(options.port_filter, Some(6881));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub ip_filter: Option<IpAddr>,
    pub port_filter: Option<u16>,
    pub expiry: Expiry,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept replies from `ip`.
    pub fn filter_ip(mut self, ip: IpAddr) -> Self {
        self.ip_filter = Some(ip);
        self
    }

    /// Only accept replies from source port `port`.
    pub fn filter_port(mut self, port: u16) -> Self {
        self.port_filter = Some(port);
        self
    }

    /// Only accept replies from exactly `peer`.
    pub fn filter_peer(self, peer: SocketAddr) -> Self {
        self.filter_ip(peer.ip()).filter_port(peer.port())
    }

    /// Expire after `timeout` instead of the instance default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.expiry = Expiry::After(timeout);
        self
    }

    /// Disable automatic expiry for this query.
    pub fn no_timeout(mut self) -> Self {
        self.expiry = Expiry::Never;
        self
    }

    /// Whether a delivery from `from` passes the filters.
    pub(crate) fn accepts(&self, from: SocketAddr) -> bool {
        // ---
        if matches!(self.ip_filter, Some(ip) if ip != from.ip()) {
            return false;
        }
        if matches!(self.port_filter, Some(port) if port != from.port()) {
            return false;
        }
        true
    }
}
