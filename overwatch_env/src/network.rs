//! Datagram transport abstraction for sensor channels.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Datagram;
use std::net::SocketAddr;

/// Abstraction for one inbound, unreliable, unordered sensor channel.
///
/// # Implementations
///
/// - **Production**: `UdpTransport` wraps a bound `tokio::net::UdpSocket`
/// - **Simulation**: channel-backed with configurable loss
///
/// # Packet Flow
///
/// ```text
/// Sensor                   Transport                  Adapter
///   |                          |                          |
///   |-- datagram ------------->|                          |
///   |                          |-- [loss / reorder] ----->|
///   |                          |                          |-- recv() -> Datagram
/// ```
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Waits for the next datagram.
    ///
    /// # Returns
    /// * `Ok(datagram)` - A datagram arrived
    /// * `Err(EnvError::Closed)` - The channel shut down
    /// * `Err(EnvError::NetworkError)` - Transient receive failure
    ///
    /// # Blocking
    /// This method waits indefinitely; callers bound it with a timeout.
    async fn recv(&self) -> Result<Datagram, EnvError>;

    /// Returns the local address the channel is bound to, if any.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Fault injection for simulated channels.
pub trait NetworkController: Send + Sync {
    /// Sets the probability (0.0 - 1.0) that a datagram is lost in flight.
    fn set_loss(&self, loss_rate: f64);

    /// Stops delivering datagrams until `heal` is called.
    fn sever(&self);

    /// Restores delivery.
    fn heal(&self);
}
