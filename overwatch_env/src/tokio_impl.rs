//! Production implementations backed by Tokio and the OS network stack.

use crate::{Datagram, DatagramTransport, EnvError, OverwatchContext};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Maximum datagram size accepted from a sensor.
const MAX_DATAGRAM: usize = 65_535;

/// Production context backed by Tokio and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverwatchContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// UDP datagram transport for one sensor channel.
pub struct UdpTransport<Ctx: OverwatchContext> {
    socket: UdpSocket,
    context: Arc<Ctx>,
}

impl<Ctx: OverwatchContext> UdpTransport<Ctx> {
    /// Binds a UDP socket on `addr`.
    ///
    /// A failure here is the channel's setup failure and is returned to the
    /// caller instead of being retried.
    pub async fn bind(addr: SocketAddr, context: Arc<Ctx>) -> Result<Self, EnvError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| EnvError::bind(addr, e))?;
        Ok(Self { socket, context })
    }
}

#[async_trait]
impl<Ctx: OverwatchContext> DatagramTransport for UdpTransport<Ctx> {
    async fn recv(&self) -> Result<Datagram, EnvError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, peer) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| EnvError::network(e.to_string()))?;
        buf.truncate(len);

        Ok(Datagram {
            payload: buf,
            peer: Some(peer),
            received_at: self.context.now(),
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_udp_transport_receives_datagram() {
        let ctx = TokioContext::shared();
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), ctx)
            .await
            .unwrap();
        let target = transport.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"{\"camera_id\":1}", target).await.unwrap();

        let datagram = transport.recv().await.unwrap();
        assert_eq!(datagram.payload, b"{\"camera_id\":1}");
        assert_eq!(datagram.peer, Some(sender.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_udp_transport_bind_conflict_is_reported() {
        let ctx = TokioContext::shared();
        let first = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), ctx.clone())
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        let err = UdpTransport::bind(taken, ctx).await.err().unwrap();
        assert!(matches!(err, EnvError::Bind { .. }));
        assert!(err.is_fatal());
    }
}
