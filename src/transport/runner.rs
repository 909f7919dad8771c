//! Transport execution runner.
//!
//! Glue between a [`Transport`](crate::Transport) and whatever consumes its
//! datagrams, normally a [`Krpc`](crate::Krpc) instance.
//!
//! ## Explicit execution
//!
//! Nothing is received until [`run`] is called. Forgetting to call it simply
//! results in no messages being processed.
//!
//! ## Error handling
//!
//! Errors returned by [`DatagramConsumer::handle_datagram`] are per-datagram
//! failures: they are logged (when logging is enabled) and the loop carries
//! on with the next datagram. Malformed input from the network is expected
//! and logged at `debug`; errors raised by subscribers are logged at `warn`.
//! Receive errors other than [`RpcError::Closed`] are logged at `error` and
//! the loop keeps receiving.
//! The loop ends when the transport closes.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Datagram,
    Result,
    RpcError,
    TransportPtr,
};

/// A consumer of transport-delivered datagrams.
///
/// Implementations should assume datagrams may arrive out of order, be
/// duplicated, or never arrive at all.
#[async_trait::async_trait]
pub trait DatagramConsumer: Send + Sync {
    /// Handle a single inbound datagram.
    ///
    /// Returning an error does not terminate the receive loop.
    async fn handle_datagram(&self, datagram: Datagram) -> Result<()>;
}

/// Start a receive loop feeding `transport`'s datagrams to `consumer`.
///
/// The returned [`JoinHandle`] represents the lifetime of the loop. Dropping
/// it does not stop the loop; closing the transport does.
///
/// # Example
///
/// ```no_run
/// use krpc::{Krpc, KrpcConfig};
///
/// # async fn example() -> krpc::Result<()> {
/// let krpc = Krpc::new(KrpcConfig::default())?;
/// let transport = krpc::create_udp_transport("0.0.0.0:6881".parse().unwrap()).await?;
///
/// let receiver = krpc::run(transport.clone(), krpc.clone());
/// // ...
/// transport.close().await?;
/// receiver.await.ok();
/// # Ok(())
/// # }
/// ```
pub fn run<T>(transport: TransportPtr, consumer: T) -> JoinHandle<Result<()>>
where
    T: DatagramConsumer + 'static,
{
    // ---
    tokio::spawn(async move {
        // ---
        loop {
            match transport.recv_from().await {
                Ok(datagram) => {
                    let _peer = datagram.peer;
                    match consumer.handle_datagram(datagram).await {
                        Ok(()) => {}
                        Err(_err @ RpcError::Foreign(_)) => {
                            log_warn!("handler failed for datagram from {_peer}: {_err}");
                        }
                        Err(_err) => {
                            log_debug!("dropped datagram from {_peer}: {_err}");
                        }
                    }
                }
                Err(RpcError::Closed) => {
                    log_debug!("transport {} closed", transport.local_addr());
                    break;
                }
                Err(_err) => {
                    log_error!("receive error on {}: {_err}", transport.local_addr());
                }
            }
        }
        Ok(())
    })
}
