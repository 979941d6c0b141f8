//! Overwatch Runtime - wires adapters, the ingestion task and the engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   try_send    ┌─────────────────┐
//! │ camera       │──────────────►│                 │
//! │ adapter task │               │  bounded mpsc   │──► ingestion task ──► DecisionEngine
//! └──────────────┘               │  (capacity N)   │                          ▲
//! ┌──────────────┐   try_send    │                 │                          │
//! │ drone        │──────────────►│                 │                 DecisionQueryService
//! │ adapter task │               └─────────────────┘                          ▲
//! └──────────────┘                                                            │
//!        ▲                                                               caller (per tick)
//!        └── watch<bool> shutdown signal
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use overwatch_core::{DecisionEngine, EngineConfig, OverwatchRuntime, RuntimeConfig};
//! use overwatch_env::TokioContext;
//!
//! let engine = DecisionEngine::shared(TokioContext::shared(), EngineConfig::drone());
//! let mut runtime = OverwatchRuntime::start(engine, RuntimeConfig::default());
//! runtime.attach(camera_adapter);
//!
//! let queries = runtime.query_service();
//! // ... serve queries ...
//! let report = runtime.shutdown().await?;
//! ```

use crate::adapter::{AdapterReport, DetectionSourceAdapter};
use crate::detection::DetectionEvent;
use crate::engine::DecisionEngine;
use crate::query::DecisionQueryService;

use overwatch_env::{DatagramTransport, EnvError, OverwatchContext};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Runtime setup and teardown failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("transport setup failed: {0}")]
    Transport(#[from] EnvError),

    #[error("no detection source could be started")]
    NoAdapters,

    #[error("task failed: {0}")]
    Task(String),
}

/// Configuration for the runtime plumbing.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the adapter -> engine hand-off queue (default: 256)
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Final counters of a runtime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeReport {
    pub ingested: u64,
    pub adapters: Vec<AdapterReport>,
}

/// Running ingestion pipeline around one engine.
///
/// Generic over the context so the same wiring runs against the system
/// clock or a simulated one.
pub struct OverwatchRuntime<Ctx: OverwatchContext> {
    engine: Arc<DecisionEngine<Ctx>>,
    sink: mpsc::Sender<DetectionEvent>,
    shutdown_tx: watch::Sender<bool>,
    ingested: Arc<AtomicU64>,
    ingest_task: JoinHandle<()>,
    adapter_tasks: Vec<JoinHandle<AdapterReport>>,
}

impl<Ctx: OverwatchContext> OverwatchRuntime<Ctx> {
    /// Spawns the ingestion task. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<DecisionEngine<Ctx>>, config: RuntimeConfig) -> Self {
        let (sink, mut events) = mpsc::channel::<DetectionEvent>(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let ingested = Arc::new(AtomicU64::new(0));

        let ingest_task = {
            let engine = engine.clone();
            let ingested = ingested.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    engine.on_detection(&event);
                    ingested.fetch_add(1, Ordering::Relaxed);
                }
                debug!("Ingestion queue drained");
            })
        };

        info!(capacity = config.queue_capacity, "Runtime started");

        Self {
            engine,
            sink,
            shutdown_tx,
            ingested,
            ingest_task,
            adapter_tasks: Vec::new(),
        }
    }

    /// Spawns the receive loop of one adapter.
    pub fn attach<T: DatagramTransport>(&mut self, adapter: DetectionSourceAdapter<T>) {
        info!(channel = %adapter.channel(), "Attaching detection source");
        let task = tokio::spawn(adapter.run(self.sink.clone(), self.shutdown_tx.subscribe()));
        self.adapter_tasks.push(task);
    }

    pub fn adapter_count(&self) -> usize {
        self.adapter_tasks.len()
    }

    pub fn engine(&self) -> &Arc<DecisionEngine<Ctx>> {
        &self.engine
    }

    pub fn query_service(&self) -> DecisionQueryService<Ctx> {
        DecisionQueryService::new(self.engine.clone())
    }

    /// A receiver that flips to `true` when shutdown starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Events handed to the engine so far.
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Events waiting in the hand-off queue.
    pub fn pending(&self) -> usize {
        self.sink.max_capacity() - self.sink.capacity()
    }

    /// Signals shutdown, waits for every adapter, then drains the queue.
    pub async fn shutdown(self) -> Result<RuntimeReport, RuntimeError> {
        info!(adapters = self.adapter_tasks.len(), "Shutting down");
        // Fails only when no adapter is subscribed, which is fine.
        let _ = self.shutdown_tx.send(true);

        let mut adapters = Vec::with_capacity(self.adapter_tasks.len());
        for task in self.adapter_tasks {
            adapters.push(task.await.map_err(|e| RuntimeError::Task(e.to_string()))?);
        }

        drop(self.sink);
        self.ingest_task
            .await
            .map_err(|e| RuntimeError::Task(e.to_string()))?;

        let report = RuntimeReport {
            ingested: self.ingested.load(Ordering::Relaxed),
            adapters,
        };
        info!(ingested = report.ingested, "Runtime stopped");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::detection::{DetectionDecoder, SourceKind};
    use crate::decision::Decision;
    use overwatch_env::{AgentId, ChannelId, TokioContext, UdpTransport};
    use std::time::Duration;

    async fn settle<Ctx: OverwatchContext>(runtime: &OverwatchRuntime<Ctx>, expected: u64) {
        for _ in 0..200 {
            if runtime.ingested() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_udp_detection_reaches_engine() {
        let ctx = TokioContext::shared();
        let engine = DecisionEngine::shared(ctx.clone(), EngineConfig::drone());
        let mut runtime = OverwatchRuntime::start(engine, RuntimeConfig::default());

        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), ctx)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        runtime.attach(
            DetectionSourceAdapter::new(
                ChannelId::new("cameras"),
                transport,
                DetectionDecoder::new(SourceKind::CameraStatic),
            )
            .with_receive_timeout(Duration::from_millis(100)),
        );

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(br#"{"camera_id": 1, "track_id": 3, "confidence": 0.75}"#, addr)
            .await
            .unwrap();
        settle(&runtime, 1).await;

        let target = EngineConfig::drone().cameras.get(1).unwrap();
        let decision = runtime
            .query_service()
            .engine()
            .decide(AgentId(0), &crate::Position::new(500.0, 0.0, 500.0))
            .unwrap();
        assert_eq!(decision, Decision::MoveToTarget(target));

        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.adapters.len(), 1);
        assert_eq!(report.adapters[0].received, 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_adapters() {
        let engine = DecisionEngine::shared(TokioContext::shared(), EngineConfig::drone());
        let runtime = OverwatchRuntime::start(engine, RuntimeConfig { queue_capacity: 4 });

        assert_eq!(runtime.adapter_count(), 0);
        assert_eq!(runtime.pending(), 0);

        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.ingested, 0);
        assert!(report.adapters.is_empty());
    }
}
