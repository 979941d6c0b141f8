//! Overwatch Core - Detection-driven decision engine
//!
//! Turns a stream of noisy detections from fixed security cameras and from
//! the drones themselves into one navigation command per agent per tick:
//! 1. **Detection Source Adapters**: one receive loop per sensor channel,
//!    decoding datagrams into [`DetectionEvent`]s
//! 2. **Decision Engine**: cooldown, confidence gate, human-priority
//!    override, arrival and target timeout, exploration fallback
//! 3. **Decision Query Service**: answers a batch of agent positions with
//!    a parallel batch of [`Decision`]s

pub mod adapter;
pub mod camera_table;
pub mod config;
pub mod decision;
pub mod detection;
pub mod engine;
pub mod query;
pub mod runtime;
pub mod state;

// Re-export key types for convenience
pub use adapter::{AdapterReport, DetectionSourceAdapter, ReceiveOutcome};
pub use camera_table::CameraPositionTable;
pub use config::{ChannelPolicy, ConfigError, EngineConfig, StateScope};
pub use decision::Decision;
pub use detection::{
    DecodeError, DetectionClass, DetectionDecoder, DetectionEvent, Framing, Position, SourceKind,
    WirePosition,
};
pub use engine::{DecisionEngine, EngineError, IngestCounts};
pub use query::{AgentQuery, DecisionEntry, DecisionQueryService, DecisionRequest, DecisionResponse, QueryError};
pub use runtime::{OverwatchRuntime, RuntimeConfig, RuntimeError, RuntimeReport};
pub use state::{AgentDecisionState, AgentPhase, IngestOutcome};

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn far() -> Position {
        Position::new(1000.0, 0.0, 1000.0)
    }

    proptest! {
        #[test]
        fn below_threshold_camera_never_changes_decision(
            camera in 0u32..4,
            confidence in 0.0f64..=0.6,
            at in 3.0f64..100.0,
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();
            state.apply_detection(&DetectionEvent::camera(0, 0.9, Duration::ZERO).unwrap(), &config);
            let before = state.clone();

            let event = DetectionEvent::camera(camera, confidence, Duration::from_secs_f64(at)).unwrap();
            let outcome = state.apply_detection(&event, &config);

            prop_assert!(
                matches!(outcome, IngestOutcome::BelowThreshold { .. }),
                "expected threshold rejection, got {:?}",
                outcome
            );
            prop_assert_eq!(&state, &before);

            let mut untouched = before;
            let now = Duration::from_secs_f64(at);
            prop_assert_eq!(state.decide(now, &far(), &config), untouched.decide(now, &far(), &config));
        }

        #[test]
        fn below_threshold_drone_never_changes_decision(
            human in any::<bool>(),
            confidence in 0.0f64..=0.8,
            at in 3.0f64..100.0,
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();
            state.apply_detection(&DetectionEvent::camera(0, 0.9, Duration::ZERO).unwrap(), &config);
            let before = state.clone();

            let class = if human { DetectionClass::Human } else { DetectionClass::Other };
            let event = DetectionEvent::drone(
                0, class, confidence, Position::new(1.0, 2.0, 3.0), Duration::from_secs_f64(at),
            ).unwrap();
            let outcome = state.apply_detection(&event, &config);

            prop_assert!(
                matches!(outcome, IngestOutcome::BelowThreshold { .. }),
                "expected threshold rejection, got {:?}",
                outcome
            );
            prop_assert!(!state.waiting_on_human);

            let mut untouched = before;
            let now = Duration::from_secs_f64(at);
            prop_assert_eq!(state.decide(now, &far(), &config), untouched.decide(now, &far(), &config));
        }

        #[test]
        fn only_first_detection_in_cooldown_window_is_accepted(
            offsets in proptest::collection::vec(0.0f64..2.999, 1..20),
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();

            prop_assert!(state
                .apply_detection(&DetectionEvent::camera(1, 0.9, Duration::ZERO).unwrap(), &config)
                .is_accepted());
            for offset in offsets {
                let event = DetectionEvent::camera(2, 0.9, Duration::from_secs_f64(offset)).unwrap();
                let outcome = state.apply_detection(&event, &config);
                prop_assert!(
                    matches!(outcome, IngestOutcome::CooledDown { .. }),
                    "expected cooldown, got {:?}",
                    outcome
                );
            }
            prop_assert_eq!(state.current_target, config.cameras.get(1));
        }

        #[test]
        fn reached_target_is_never_announced(
            camera in 0u32..4,
            dx in -1.1f64..1.1,
            dy in -1.1f64..1.1,
            dz in -1.1f64..1.1,
            at in 0.0f64..20.0,
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();
            state.apply_detection(&DetectionEvent::camera(camera, 0.9, Duration::ZERO).unwrap(), &config);
            let target = config.cameras.get(camera).unwrap();

            let decision = state.decide(
                Duration::from_secs_f64(at),
                &(target + Position::new(dx, dy, dz)),
                &config,
            );

            prop_assert_ne!(decision, Decision::MoveToTarget(target));
            prop_assert!(state.current_target.is_none());
        }

        #[test]
        fn explore_then_continue_inside_cooldown(
            first in 0.0f64..100.0,
            gap in 0.0f64..9.999,
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();

            let t0 = Duration::from_secs_f64(first);
            let t1 = Duration::from_secs_f64(first + gap);
            prop_assert_eq!(state.decide(t0, &far(), &config), Decision::Explore);
            prop_assert_eq!(state.decide(t1, &far(), &config), Decision::Continue);
        }

        #[test]
        fn expired_human_override_clears_idempotently(
            extra in 0.0f64..20.0,
            repeats in 1usize..5,
        ) {
            let config = EngineConfig::drone();
            let mut state = AgentDecisionState::new();
            let sighting = DetectionEvent::drone(
                0, DetectionClass::Human, 0.9, Position::new(1.0, 2.0, 3.0), Duration::ZERO,
            ).unwrap();
            state.apply_detection(&sighting, &config);

            let now = Duration::from_secs_f64(5.0 + extra);
            for _ in 0..repeats {
                let decision = state.decide(now, &far(), &config);
                prop_assert!(!matches!(decision, Decision::MoveToTargetHuman(_)));
                prop_assert!(!state.waiting_on_human);
            }
        }
    }
}
