//! The Decision Engine: shared, lock-guarded arbitration state.
//!
//! Adapters call [`DecisionEngine::on_detection`] from their ingestion task;
//! the query path calls [`DecisionEngine::decide`]. Both go through one
//! `Mutex` around the state map, because each operation reads several fields
//! and then writes several others and must see a consistent snapshot.
//! Critical sections are pure computation (no I/O, no awaits).

use crate::config::{EngineConfig, StateScope};
use crate::decision::Decision;
use crate::detection::{DetectionEvent, Position, SourceKind};
use crate::state::{AgentDecisionState, AgentPhase, IngestOutcome};

use overwatch_env::{AgentId, OverwatchContext};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Engine-level rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Per-agent scope only: the state table already holds `max_agents` agents
    #[error("{agent} rejected: agent table full ({limit} agents)")]
    AgentLimit { agent: AgentId, limit: usize },
}

/// Running totals of ingestion outcomes.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    cooled_down: AtomicU64,
    unknown_source: AtomicU64,
    below_threshold: AtomicU64,
    busy: AtomicU64,
}

/// Plain copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestCounts {
    pub accepted: u64,
    pub cooled_down: u64,
    pub unknown_source: u64,
    pub below_threshold: u64,
    pub busy: u64,
}

impl IngestStats {
    fn record(&self, outcome: &IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Accepted { .. } => &self.accepted,
            IngestOutcome::CooledDown { .. } => &self.cooled_down,
            IngestOutcome::UnknownSource(_) => &self.unknown_source,
            IngestOutcome::BelowThreshold { .. } => &self.below_threshold,
            IngestOutcome::Busy => &self.busy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> IngestCounts {
        IngestCounts {
            accepted: self.accepted.load(Ordering::Relaxed),
            cooled_down: self.cooled_down.load(Ordering::Relaxed),
            unknown_source: self.unknown_source.load(Ordering::Relaxed),
            below_threshold: self.below_threshold.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
        }
    }
}

/// Detection-driven decision engine.
///
/// Generic over the context so the same engine runs against the system clock
/// in production and a virtual clock in simulation.
pub struct DecisionEngine<Ctx: OverwatchContext> {
    context: Arc<Ctx>,
    config: EngineConfig,
    states: Mutex<BTreeMap<AgentId, AgentDecisionState>>,
    stats: IngestStats,
}

impl<Ctx: OverwatchContext> DecisionEngine<Ctx> {
    /// Creates an engine. In shared scope the fleet state exists from the start.
    pub fn new(context: Arc<Ctx>, config: EngineConfig) -> Self {
        let mut states = BTreeMap::new();
        if config.scope == StateScope::Shared {
            states.insert(AgentId::FLEET, AgentDecisionState::new());
        }

        info!(
            scope = ?config.scope,
            cameras = config.cameras.len(),
            human_priority = config.human_priority,
            "Decision engine ready"
        );

        Self {
            context,
            config,
            states: Mutex::new(states),
            stats: IngestStats::default(),
        }
    }

    /// Creates an Arc-wrapped engine for sharing with adapters and queries.
    pub fn shared(context: Arc<Ctx>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self::new(context, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn stats(&self) -> IngestCounts {
        self.stats.counts()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<AgentId, AgentDecisionState>> {
        // A panic elsewhere must not take decisions down with it.
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_key(&self, agent: AgentId) -> AgentId {
        match self.config.scope {
            StateScope::Shared => AgentId::FLEET,
            StateScope::PerAgent => agent,
        }
    }

    /// State for `key`, created on first use while the table has room.
    fn state_mut<'a>(
        &self,
        states: &'a mut BTreeMap<AgentId, AgentDecisionState>,
        key: AgentId,
    ) -> Result<&'a mut AgentDecisionState, EngineError> {
        if !states.contains_key(&key) && states.len() >= self.config.max_agents {
            return Err(EngineError::AgentLimit {
                agent: key,
                limit: self.config.max_agents,
            });
        }
        Ok(states.entry(key).or_default())
    }

    /// Makes an agent known before its first query, so that camera
    /// detections reach it in per-agent scope.
    pub fn register_agent(&self, agent: AgentId) -> Result<(), EngineError> {
        let key = self.state_key(agent);
        let mut states = self.lock();
        self.state_mut(&mut states, key).map(|_| ())
    }

    /// Ingestion entry point.
    ///
    /// In shared scope the event applies to the fleet state. In per-agent
    /// scope a drone's self-detection applies to that drone, and a camera
    /// detection applies to every known agent; the returned outcome is then
    /// `Accepted` if any agent took it, otherwise the first agent's outcome.
    pub fn on_detection(&self, event: &DetectionEvent) -> IngestOutcome {
        let mut states = self.lock();

        let keys: Vec<AgentId> = match (self.config.scope, event.source_kind()) {
            (StateScope::Shared, _) => vec![AgentId::FLEET],
            (StateScope::PerAgent, SourceKind::DroneSelf) => {
                vec![AgentId(u64::from(event.source_id()))]
            }
            (StateScope::PerAgent, SourceKind::CameraStatic) => states.keys().copied().collect(),
        };

        let mut summary: Option<IngestOutcome> = None;
        for key in keys {
            let outcome = match self.state_mut(&mut states, key) {
                Ok(state) => {
                    let outcome = state.apply_detection(event, &self.config);
                    log_outcome(key, event, &outcome);
                    outcome
                }
                Err(e) => {
                    warn!(error = %e, source_id = event.source_id(), "Detection dropped");
                    IngestOutcome::UnknownSource(event.source_id())
                }
            };
            self.stats.record(&outcome);

            summary = match summary {
                Some(prev) if prev.is_accepted() => Some(prev),
                Some(prev) if !outcome.is_accepted() => Some(prev),
                _ => Some(outcome),
            };
        }

        summary.unwrap_or(IngestOutcome::Busy)
    }

    /// Query entry point: what should `agent`, currently at `position`, do now?
    ///
    /// Fails only in per-agent scope, for a new agent once the state table
    /// is full.
    pub fn decide(&self, agent: AgentId, position: &Position) -> Result<Decision, EngineError> {
        let now = self.context.now();
        let key = self.state_key(agent);

        let mut states = self.lock();
        let state = self.state_mut(&mut states, key)?;

        let before = state.phase();
        let decision = state.decide(now, position, &self.config);
        let after = state.phase();

        if before != after {
            info!(%agent, ?before, ?after, %decision, "Phase change");
        } else {
            debug!(%agent, phase = ?after, %decision, "Decision");
        }

        Ok(decision)
    }

    /// Copy of one agent's state (the fleet state in shared scope).
    pub fn snapshot(&self, agent: AgentId) -> Option<AgentDecisionState> {
        let key = self.state_key(agent);
        self.lock().get(&key).cloned()
    }

    /// Copies of every state, keyed by agent (or by the fleet key).
    pub fn snapshots(&self) -> Vec<(AgentId, AgentDecisionState)> {
        self.lock().iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    /// Phase of one agent, `Idle` if never seen.
    pub fn phase(&self, agent: AgentId) -> AgentPhase {
        self.snapshot(agent)
            .map(|s| s.phase())
            .unwrap_or(AgentPhase::Idle)
    }
}

fn log_outcome(agent: AgentId, event: &DetectionEvent, outcome: &IngestOutcome) {
    let source = event.source_kind();
    let source_id = event.source_id();
    match outcome {
        IngestOutcome::Accepted { target, human } => info!(
            %agent, %source, source_id,
            confidence = event.confidence(),
            human,
            target = ?(target.x, target.y, target.z),
            "Detection accepted"
        ),
        IngestOutcome::UnknownSource(id) => {
            warn!(%agent, %source, source_id = id, "Detection from unknown camera dropped")
        }
        IngestOutcome::CooledDown { remaining } => {
            debug!(%agent, %source, source_id, remaining_ms = remaining.as_millis() as u64, "In cooldown")
        }
        IngestOutcome::BelowThreshold { confidence, threshold } => {
            debug!(%agent, %source, source_id, confidence, threshold, "Below threshold")
        }
        IngestOutcome::Busy => debug!(%agent, %source, source_id, "Already investigating"),
    }
}
