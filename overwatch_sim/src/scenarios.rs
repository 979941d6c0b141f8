//! Simulation scenarios for the decision engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// OW-001: A camera sighting sends every agent to the camera's position
    CameraDispatch,

    /// OW-002: A drone sees a human and holds position until the override lapses
    HumanHold,

    /// OW-003: No detections at all: explore, then keep exploring
    IdleExplore,

    /// OW-004: Detection burst; only the first inside each cooldown lands
    CooldownFlood,

    /// OW-005: Agents reach the target and go back to exploring
    ArrivalPreempt,

    /// OW-006: Lossy and severed channels, garbage datagrams
    LossyChannels,

    /// OW-007: Single ground robot with the degenerate profile
    GroundRobotPatrol,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CameraDispatch,
            ScenarioId::HumanHold,
            ScenarioId::IdleExplore,
            ScenarioId::CooldownFlood,
            ScenarioId::ArrivalPreempt,
            ScenarioId::LossyChannels,
            ScenarioId::GroundRobotPatrol,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CameraDispatch => "camera_dispatch",
            ScenarioId::HumanHold => "human_hold",
            ScenarioId::IdleExplore => "idle_explore",
            ScenarioId::CooldownFlood => "cooldown_flood",
            ScenarioId::ArrivalPreempt => "arrival_preempt",
            ScenarioId::LossyChannels => "lossy_channels",
            ScenarioId::GroundRobotPatrol => "ground_robot_patrol",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CameraDispatch => "Camera 1 at 0.75 confidence redirects the fleet to its position",
            ScenarioId::HumanHold => "Drone human sighting holds position for 5s, then the target resumes",
            ScenarioId::IdleExplore => "Explore once, Continue inside the 10s cooldown, Explore again after",
            ScenarioId::CooldownFlood => "20 Hz detection flood across all cameras, 3s cooldown",
            ScenarioId::ArrivalPreempt => "Fleet flies to the target; arrival clears it before the timeout",
            ScenarioId::LossyChannels => "50% loss, severed link, and malformed datagrams never stall decisions",
            ScenarioId::GroundRobotPatrol => "Robot ignores new sightings until it reaches its target",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "camera_dispatch" | "ow-001" => Ok(ScenarioId::CameraDispatch),
            "human_hold" | "ow-002" => Ok(ScenarioId::HumanHold),
            "idle_explore" | "ow-003" => Ok(ScenarioId::IdleExplore),
            "cooldown_flood" | "ow-004" => Ok(ScenarioId::CooldownFlood),
            "arrival_preempt" | "ow-005" => Ok(ScenarioId::ArrivalPreempt),
            "lossy_channels" | "ow-006" => Ok(ScenarioId::LossyChannels),
            "ground_robot_patrol" | "ground_robot" | "ow-007" => Ok(ScenarioId::GroundRobotPatrol),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
        assert_eq!("OW-003".parse::<ScenarioId>(), Ok(ScenarioId::IdleExplore));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
