//! Per-agent arbitration state machine.
//!
//! Two forces drive [`AgentDecisionState`]:
//!
//! - **Ingestion** ([`AgentDecisionState::apply_detection`]): a detection may
//!   replace the current target, subject to the channel cooldown, the camera
//!   lookup and the confidence gate.
//! - **Query** ([`AgentDecisionState::decide`]): expires the human override,
//!   checks arrival, checks target freshness, then falls back to exploration.
//!
//! Both are pure functions of the state, the configuration and an explicit
//! `now`, so they are tested here without any clock or lock.
//!
//! ```text
//!            detection accepted              human detection
//!   Idle ───────────────────────► Investigating ──────────► WaitingOnHuman
//!    ▲  ▲                            │    ▲                     │
//!    │  │   arrived / timed out      │    │ override expired    │
//!    │  └────────────────────────────┘    └─────────────────────┘
//!    │
//!    └─── Exploring ◄──── no valid target on query
//! ```

use crate::config::EngineConfig;
use crate::decision::Decision;
use crate::detection::{DetectionEvent, Position, SourceKind};
use serde::Serialize;
use std::time::Duration;

/// Coarse phase derived from the state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Investigating,
    WaitingOnHuman,
    Exploring,
}

/// What ingestion did with a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// The detection became the current target
    Accepted { target: Position, human: bool },

    /// Dropped: another detection was accepted less than a cooldown ago
    CooledDown { remaining: Duration },

    /// Dropped: camera id missing from the position table, or no room
    /// left for a new agent's state
    UnknownSource(u32),

    /// Dropped: confidence not above the channel threshold
    BelowThreshold { confidence: f64, threshold: f64 },

    /// Dropped: a target is being investigated and pre-emption is disabled
    Busy,
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

/// Decision state of one agent (or of the whole fleet when shared).
///
/// Timestamps are `None` until the corresponding event first happens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentDecisionState {
    pub investigating: bool,
    pub current_target: Option<Position>,
    pub last_target_time: Option<Duration>,
    pub last_detection_time: Option<Duration>,
    pub last_human_detection_time: Option<Duration>,
    pub last_explore_time: Option<Duration>,
    pub waiting_on_human: bool,
    pub exploring: bool,
}

/// True if at least `span` has passed since `since` ("never" counts as long ago).
fn elapsed_at_least(now: Duration, since: Option<Duration>, span: Duration) -> bool {
    match since {
        Some(t) => now.saturating_sub(t) >= span,
        None => true,
    }
}

impl AgentDecisionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase, for logs and inspection.
    pub fn phase(&self) -> AgentPhase {
        if self.waiting_on_human {
            AgentPhase::WaitingOnHuman
        } else if self.current_target.is_some() {
            AgentPhase::Investigating
        } else if self.exploring {
            AgentPhase::Exploring
        } else {
            AgentPhase::Idle
        }
    }

    /// Applies one detection, using its receipt time as `now`.
    pub fn apply_detection(&mut self, event: &DetectionEvent, config: &EngineConfig) -> IngestOutcome {
        let now = event.timestamp();
        let policy = config.policy(event.source_kind());

        if let Some(last) = self.last_detection_time {
            let elapsed = now.saturating_sub(last);
            if elapsed < policy.cooldown {
                return IngestOutcome::CooledDown {
                    remaining: policy.cooldown - elapsed,
                };
            }
        }

        if self.investigating && !config.preempt_active_target {
            return IngestOutcome::Busy;
        }

        let target = match event.source_kind() {
            SourceKind::CameraStatic => match config.cameras.get(event.source_id()) {
                Some(p) => p,
                None => return IngestOutcome::UnknownSource(event.source_id()),
            },
            SourceKind::DroneSelf => match event.position() {
                Some(p) => p,
                // Unreachable for events built through DetectionEvent::new.
                None => return IngestOutcome::UnknownSource(event.source_id()),
            },
        };

        if event.confidence() <= policy.min_confidence {
            return IngestOutcome::BelowThreshold {
                confidence: event.confidence(),
                threshold: policy.min_confidence,
            };
        }

        self.current_target = Some(target);
        self.investigating = true;
        self.last_target_time = Some(now);
        self.last_detection_time = Some(now);
        self.exploring = false;

        let human = config.human_priority && event.detection_class().is_human();
        if human {
            self.waiting_on_human = true;
            self.last_human_detection_time = Some(now);
        }

        IngestOutcome::Accepted { target, human }
    }

    /// Answers a query for an agent at `position`.
    pub fn decide(&mut self, now: Duration, position: &Position, config: &EngineConfig) -> Decision {
        if self.waiting_on_human
            && elapsed_at_least(now, self.last_human_detection_time, config.human_detection_timeout)
        {
            self.waiting_on_human = false;
        }

        if self.waiting_on_human {
            return Decision::MoveToTargetHuman(*position);
        }

        if let Some(target) = self.current_target {
            // Arrival wins over freshness: a reached target is never re-announced.
            if (position - target).norm() < config.arrival_radius {
                self.investigating = false;
                self.current_target = None;
            } else if self.target_is_fresh(now, config) {
                self.exploring = false;
                return Decision::MoveToTarget(target);
            }
        }

        self.current_target = None;
        self.investigating = false;

        let may_explore = match config.explore_cooldown {
            Some(cooldown) => {
                !self.exploring || elapsed_at_least(now, self.last_explore_time, cooldown)
            }
            None => true,
        };

        if may_explore {
            self.exploring = true;
            self.last_explore_time = Some(now);
            Decision::Explore
        } else {
            Decision::Continue
        }
    }

    fn target_is_fresh(&self, now: Duration, config: &EngineConfig) -> bool {
        match config.target_timeout {
            Some(timeout) => !elapsed_at_least(now, self.last_target_time, timeout),
            None => true,
        }
    }
}
