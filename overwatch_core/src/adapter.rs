//! Detection source adapters.
//!
//! One adapter per inbound sensor channel. Each runs its own loop: wait (with
//! a bounded timeout) for a datagram, decode it, and hand the event off to
//! the ingestion task over a bounded queue. A malformed datagram is logged
//! and skipped; it never stops the loop.

use crate::detection::{DecodeError, DetectionDecoder, DetectionEvent};
use overwatch_env::{ChannelId, DatagramTransport, EnvError};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Default wait for one datagram before re-checking for shutdown.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one bounded receive.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A datagram arrived and decoded
    Event(DetectionEvent),

    /// Nothing arrived within the receive timeout
    Timeout,

    /// A datagram arrived but could not be decoded
    Malformed(DecodeError),
}

/// Counters reported when an adapter loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterReport {
    pub channel: String,
    pub received: u64,
    pub malformed: u64,
    pub dropped_full: u64,
    pub timeouts: u64,
    pub transport_errors: u64,
}

/// Reads one sensor channel and feeds the decision engine.
pub struct DetectionSourceAdapter<T: DatagramTransport> {
    channel: ChannelId,
    transport: T,
    decoder: DetectionDecoder,
    receive_timeout: Duration,
}

impl<T: DatagramTransport> DetectionSourceAdapter<T> {
    pub fn new(channel: ChannelId, transport: T, decoder: DetectionDecoder) -> Self {
        Self {
            channel,
            transport,
            decoder,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Waits up to the receive timeout for one datagram and decodes it.
    pub async fn receive(&self) -> Result<ReceiveOutcome, EnvError> {
        let datagram = match tokio::time::timeout(self.receive_timeout, self.transport.recv()).await {
            Ok(result) => result?,
            Err(_) => return Ok(ReceiveOutcome::Timeout),
        };

        Ok(match self.decoder.decode(&datagram) {
            Ok(event) => ReceiveOutcome::Event(event),
            Err(e) => ReceiveOutcome::Malformed(e),
        })
    }

    /// Runs the receive loop until shutdown or a fatal transport error.
    pub async fn run(
        self,
        sink: mpsc::Sender<DetectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AdapterReport {
        let mut report = AdapterReport {
            channel: self.channel.to_string(),
            ..Default::default()
        };

        info!(
            channel = %self.channel,
            addr = ?self.transport.local_addr(),
            "Adapter listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.receive() => outcome,
            };

            match outcome {
                Ok(ReceiveOutcome::Event(event)) => {
                    report.received += 1;
                    match sink.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            report.dropped_full += 1;
                            warn!(
                                channel = %self.channel,
                                source_id = event.source_id(),
                                "Ingestion queue full, detection dropped"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!(channel = %self.channel, "Ingestion queue closed");
                            break;
                        }
                    }
                }
                Ok(ReceiveOutcome::Timeout) => report.timeouts += 1,
                Ok(ReceiveOutcome::Malformed(e)) => {
                    report.malformed += 1;
                    warn!(channel = %self.channel, error = %e, "Malformed datagram skipped");
                }
                Err(e) if e.is_fatal() => {
                    report.transport_errors += 1;
                    error!(channel = %self.channel, error = %e, "Transport failed, adapter stopping");
                    break;
                }
                Err(e) => {
                    report.transport_errors += 1;
                    warn!(channel = %self.channel, error = %e, "Receive error");
                }
            }
        }

        info!(
            channel = %report.channel,
            received = report.received,
            malformed = report.malformed,
            dropped = report.dropped_full,
            "Adapter stopped"
        );
        report
    }
}
