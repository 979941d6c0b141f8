//! Engine configuration and the two stock profiles.
//!
//! Every rule threshold of the arbitration state machine lives here. Files
//! use seconds as plain numbers, e.g.
//!
//! ```json
//! {
//!   "camera": { "cooldown": 3.0, "min_confidence": 0.6 },
//!   "target_timeout": 10.0,
//!   "explore_cooldown": null,
//!   "scope": "per_agent"
//! }
//! ```
//!
//! Omitted keys keep the values of a base profile: the drone profile for
//! [`EngineConfig::from_json_str`], any profile for
//! [`EngineConfig::from_json_str_with_base`]. Channel policies merge field by
//! field; a `cameras` table replaces the base table as a whole.

use crate::camera_table::CameraPositionTable;
use crate::detection::SourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-channel ingestion rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Minimum spacing between accepted detections
    #[serde(with = "secs")]
    pub cooldown: Duration,

    /// Detections must score strictly above this
    pub min_confidence: f64,
}

impl ChannelPolicy {
    pub fn new(cooldown: Duration, min_confidence: f64) -> Self {
        Self {
            cooldown,
            min_confidence,
        }
    }
}

/// Whether agents share one decision state or each get their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// One state for the whole fleet: a sighting redirects every agent
    #[default]
    Shared,

    /// Independent state per agent id
    PerAgent,
}

/// Configuration for the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Static camera channel rules (default: 3.0 s, > 0.6)
    pub camera: ChannelPolicy,

    /// Drone self-detection channel rules (default: 3.0 s, > 0.8)
    pub drone: ChannelPolicy,

    /// How long a human sighting holds the agent in place (default: 5.0 s)
    #[serde(with = "secs")]
    pub human_detection_timeout: Duration,

    /// Distance below which a target counts as reached (default: 2.0)
    pub arrival_radius: f64,

    /// Lifetime of an unreinforced target; `None` keeps it until reached
    #[serde(with = "opt_secs")]
    pub target_timeout: Option<Duration>,

    /// Minimum spacing between `Explore` commands; `None` re-issues every time
    #[serde(with = "opt_secs")]
    pub explore_cooldown: Option<Duration>,

    /// Human detections trigger the hold-position override
    pub human_priority: bool,

    /// A new detection may replace a target still being investigated
    pub preempt_active_target: bool,

    /// Shared fleet state or per-agent state
    pub scope: StateScope,

    /// Most agent states kept in per-agent scope (default: 256)
    pub max_agents: usize,

    /// Camera id -> watched position
    pub cameras: CameraPositionTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::drone()
    }
}

impl EngineConfig {
    /// Drone fleet profile: human priority and exploration cooldown enabled.
    pub fn drone() -> Self {
        Self {
            camera: ChannelPolicy::new(Duration::from_secs(3), 0.6),
            drone: ChannelPolicy::new(Duration::from_secs(3), 0.8),
            human_detection_timeout: Duration::from_secs(5),
            arrival_radius: 2.0,
            target_timeout: Some(Duration::from_secs(10)),
            explore_cooldown: Some(Duration::from_secs(10)),
            human_priority: true,
            preempt_active_target: true,
            scope: StateScope::Shared,
            max_agents: 256,
            cameras: CameraPositionTable::drone_site(),
        }
    }

    /// Single ground robot profile.
    ///
    /// Degenerate case of the drone profile: no human override, no target
    /// timeout, no exploration cooldown, and a running investigation is never
    /// interrupted by a newer detection.
    pub fn ground_robot() -> Self {
        Self {
            camera: ChannelPolicy::new(Duration::from_secs(5), 0.0),
            drone: ChannelPolicy::new(Duration::from_secs(5), 0.8),
            target_timeout: None,
            explore_cooldown: None,
            human_priority: false,
            preempt_active_target: false,
            cameras: CameraPositionTable::ground_site(),
            ..Self::drone()
        }
    }

    /// Returns the rules for a channel.
    pub fn policy(&self, kind: SourceKind) -> &ChannelPolicy {
        match kind {
            SourceKind::CameraStatic => &self.camera,
            SourceKind::DroneSelf => &self.drone,
        }
    }

    pub fn with_scope(mut self, scope: StateScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_cameras(mut self, cameras: CameraPositionTable) -> Self {
        self.cameras = cameras;
        self
    }

    pub fn with_target_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.target_timeout = timeout;
        self
    }

    pub fn with_explore_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.explore_cooldown = cooldown;
        self
    }

    pub fn with_human_detection_timeout(mut self, timeout: Duration) -> Self {
        self.human_detection_timeout = timeout;
        self
    }

    pub fn with_arrival_radius(mut self, radius: f64) -> Self {
        self.arrival_radius = radius;
        self
    }

    pub fn with_policy(mut self, kind: SourceKind, policy: ChannelPolicy) -> Self {
        match kind {
            SourceKind::CameraStatic => self.camera = policy,
            SourceKind::DroneSelf => self.drone = policy,
        }
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in [SourceKind::CameraStatic, SourceKind::DroneSelf] {
            let policy = self.policy(kind);
            if !(0.0..=1.0).contains(&policy.min_confidence) {
                return Err(ConfigError::Invalid(format!(
                    "{} min_confidence {} outside [0, 1]",
                    kind, policy.min_confidence
                )));
            }
        }
        if self.max_agents == 0 {
            return Err(ConfigError::Invalid("max_agents must be at least 1".to_string()));
        }
        if !(self.arrival_radius.is_finite() && self.arrival_radius >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "arrival_radius {} must be a non-negative number",
                self.arrival_radius
            )));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration over the drone profile.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_json_str_with_base(json, &Self::drone())
    }

    /// Parses a JSON configuration over `base` and validates the result.
    pub fn from_json_str_with_base(json: &str, base: &Self) -> Result<Self, ConfigError> {
        let patch: Value = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if !patch.is_object() {
            return Err(ConfigError::Parse("configuration must be a JSON object".to_string()));
        }

        let mut merged = serde_json::to_value(base).map_err(|e| ConfigError::Parse(e.to_string()))?;
        overlay(&mut merged, patch);

        let config: Self = serde_json::from_value(merged).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file over the drone profile.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_file_with_base(path, &Self::drone())
    }

    /// Loads a JSON configuration file over `base` and validates the result.
    pub fn from_json_file_with_base(path: impl AsRef<Path>, base: &Self) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str_with_base(&raw, base)
    }
}

/// Writes `patch` into `base`, merging nested objects except the camera table.
fn overlay(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = key != "cameras"
                    && value.is_object()
                    && base.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(slot) = base.get_mut(&key) {
                        overlay(slot, value);
                        continue;
                    }
                }
                base.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}

/// `Duration` <-> seconds as `f64`.
mod secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// `Option<Duration>` <-> seconds or `null`.
mod opt_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drone_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.camera.cooldown, Duration::from_secs(3));
        assert_eq!(config.camera.min_confidence, 0.6);
        assert_eq!(config.drone.min_confidence, 0.8);
        assert_eq!(config.human_detection_timeout, Duration::from_secs(5));
        assert_eq!(config.arrival_radius, 2.0);
        assert_eq!(config.target_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.explore_cooldown, Some(Duration::from_secs(10)));
        assert_eq!(config.scope, StateScope::Shared);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ground_robot_profile_disables_drone_features() {
        let config = EngineConfig::ground_robot();

        assert_eq!(config.camera.cooldown, Duration::from_secs(5));
        assert!(!config.human_priority);
        assert!(!config.preempt_active_target);
        assert_eq!(config.target_timeout, None);
        assert_eq!(config.explore_cooldown, None);
        assert_eq!(config.cameras.get(1).unwrap().x, -61.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{
            "camera": { "cooldown": 1.5, "min_confidence": 0.5 },
            "explore_cooldown": null,
            "scope": "per_agent",
            "cameras": { "9": { "x": 1, "y": 2, "z": 3 } }
        }"#;

        let config = EngineConfig::from_json_str(json).unwrap();

        assert_eq!(config.camera.cooldown, Duration::from_millis(1500));
        assert_eq!(config.drone.min_confidence, 0.8);
        assert_eq!(config.explore_cooldown, None);
        assert_eq!(config.target_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.scope, StateScope::PerAgent);
        assert_eq!(config.cameras.len(), 1);
    }

    #[test]
    fn test_file_overlays_ground_robot_base() {
        let json = r#"{ "scope": "per_agent", "camera": { "cooldown": 2.0 } }"#;

        let config = EngineConfig::from_json_str_with_base(json, &EngineConfig::ground_robot()).unwrap();

        assert_eq!(config.scope, StateScope::PerAgent);
        assert_eq!(config.camera.cooldown, Duration::from_secs(2));
        assert_eq!(config.camera.min_confidence, 0.0);
        assert!(!config.preempt_active_target);
        assert!(!config.human_priority);
        assert_eq!(config.target_timeout, None);
        assert_eq!(config.cameras, CameraPositionTable::ground_site());
    }

    #[test]
    fn test_non_object_file_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str("[1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let json = r#"{ "drone": { "cooldown": 3.0, "min_confidence": 1.2 } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "max_agents": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));

        let json = r#"{ "human_detection_timeout": -1.0 }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_config_serializes_seconds() {
        let value = serde_json::to_value(EngineConfig::ground_robot()).unwrap();

        assert_eq!(value["camera"]["cooldown"], 5.0);
        assert!(value["target_timeout"].is_null());
    }
}
