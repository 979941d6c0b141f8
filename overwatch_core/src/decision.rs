//! The answer to "what should this agent do right now?".

use crate::detection::{Position, WirePosition};
use serde::{Serialize, Serializer};

/// Exactly one of these is produced per decision query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Navigate to the current target
    MoveToTarget(Position),

    /// Hold position: the target is the agent's own queried position
    MoveToTargetHuman(Position),

    /// Start a fresh exploration leg
    Explore,

    /// Keep running the exploration already in progress
    Continue,
}

impl Decision {
    /// Wire name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Decision::MoveToTarget(_) => "move_to_target",
            Decision::MoveToTargetHuman(_) => "move_to_target_human",
            Decision::Explore => "explore",
            Decision::Continue => "continue",
        }
    }

    /// The position carried by the decision, if any.
    pub fn target(&self) -> Option<Position> {
        match self {
            Decision::MoveToTarget(p) | Decision::MoveToTargetHuman(p) => Some(*p),
            Decision::Explore | Decision::Continue => None,
        }
    }

    /// True for `Explore` and `Continue`.
    pub fn is_exploration(&self) -> bool {
        matches!(self, Decision::Explore | Decision::Continue)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target() {
            Some(p) => write!(f, "{}({:.2}, {:.2}, {:.2})", self.name(), p.x, p.y, p.z),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Serialize)]
struct DecisionWire {
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<WirePosition>,
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DecisionWire {
            decision: self.name(),
            target: self.target().map(WirePosition::from),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let target = Position::new(1.0, 2.0, 3.0);

        assert_eq!(
            serde_json::to_value(Decision::MoveToTarget(target)).unwrap(),
            json!({"decision": "move_to_target", "target": {"x": 1.0, "y": 2.0, "z": 3.0}})
        );
        assert_eq!(
            serde_json::to_value(Decision::MoveToTargetHuman(target)).unwrap(),
            json!({"decision": "move_to_target_human", "target": {"x": 1.0, "y": 2.0, "z": 3.0}})
        );
        assert_eq!(
            serde_json::to_value(Decision::Explore).unwrap(),
            json!({"decision": "explore"})
        );
        assert_eq!(
            serde_json::to_value(Decision::Continue).unwrap(),
            json!({"decision": "continue"})
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Decision::Continue.to_string(), "continue");
        assert_eq!(
            Decision::MoveToTarget(Position::new(1.0, 0.5, -2.0)).to_string(),
            "move_to_target(1.00, 0.50, -2.00)"
        );
    }
}
