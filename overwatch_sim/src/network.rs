//! Simulated sensor channels with fault injection.

use async_trait::async_trait;
use overwatch_env::{Datagram, DatagramTransport, EnvError, NetworkController, OverwatchContext};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::context::SimContext;

/// Creates one simulated sensor channel.
///
/// The sender side stands in for a camera or drone bridge; the transport side
/// is what an adapter reads. Both share the returned controller.
pub fn sim_channel(context: Arc<SimContext>, rng: ChaCha8Rng) -> (SimSensor, SimTransport, Arc<SimNetworkController>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let controller = Arc::new(SimNetworkController::new(rng));

    let sensor = SimSensor {
        tx,
        context,
        controller: controller.clone(),
        pending: pending.clone(),
    };
    let transport = SimTransport {
        rx: tokio::sync::Mutex::new(rx),
        pending,
    };
    (sensor, transport, controller)
}

/// Sending end of a simulated channel.
pub struct SimSensor {
    tx: mpsc::UnboundedSender<Datagram>,
    context: Arc<SimContext>,
    controller: Arc<SimNetworkController>,
    pending: Arc<AtomicUsize>,
}

impl SimSensor {
    /// Emits one datagram, stamped with the current virtual time.
    ///
    /// Returns false when the datagram was lost in flight.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> bool {
        if !self.controller.should_deliver() {
            return false;
        }
        let datagram = Datagram::new(payload.into(), self.context.now());
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(datagram).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Serializes `record` as JSON and emits it.
    pub fn send_json(&self, record: &serde_json::Value) -> bool {
        self.send(record.to_string())
    }
}

/// Receiving end of a simulated channel.
pub struct SimTransport {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    pending: Arc<AtomicUsize>,
}

impl SimTransport {
    /// Datagrams delivered but not yet received.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Shared handle to the pending counter, usable after the transport
    /// has been moved into an adapter.
    pub fn pending_handle(&self) -> Arc<AtomicUsize> {
        self.pending.clone()
    }
}

#[async_trait]
impl DatagramTransport for SimTransport {
    async fn recv(&self) -> Result<Datagram, EnvError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(datagram)
            }
            None => Err(EnvError::Closed),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Fault injection for one simulated channel.
pub struct SimNetworkController {
    /// Packet loss rate (0.0 - 1.0)
    loss_rate: Mutex<f64>,

    /// No delivery at all while set
    severed: AtomicBool,

    /// Seeded RNG deciding individual losses
    rng: Mutex<ChaCha8Rng>,

    sent: AtomicU64,
    lost: AtomicU64,
}

impl SimNetworkController {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            loss_rate: Mutex::new(0.0),
            severed: AtomicBool::new(false),
            rng: Mutex::new(rng),
            sent: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn loss_rate(&self) -> f64 {
        *self.loss_rate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }

    /// Datagrams offered to the channel so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Datagrams dropped by loss or severing.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Rolls the dice for one datagram.
    fn should_deliver(&self) -> bool {
        self.sent.fetch_add(1, Ordering::Relaxed);

        let delivered = if self.is_severed() {
            false
        } else {
            let loss = self.loss_rate();
            loss <= 0.0 || {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                rng.gen::<f64>() >= loss
            }
        };

        if !delivered {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }
}

impl NetworkController for SimNetworkController {
    fn set_loss(&self, loss_rate: f64) {
        *self.loss_rate.lock().unwrap_or_else(PoisonError::into_inner) = loss_rate.clamp(0.0, 1.0);
    }

    fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.severed.store(false, Ordering::SeqCst);
    }
}
