//! Decision Query Service.
//!
//! Thin glue between a batch of agent positions (one simulation tick) and the
//! engine. Framework plumbing lives in the service binary; this module only
//! knows the JSON shapes.

use crate::decision::Decision;
use crate::detection::{Position, WirePosition};
use crate::engine::{DecisionEngine, EngineError};
use overwatch_env::{AgentId, OverwatchContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single entry of a batch could not be answered.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("entry {index}: missing field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("entry {index}: invalid agent id")]
    InvalidId { index: usize },

    #[error("entry {index}: invalid position: {reason}")]
    InvalidPosition { index: usize, reason: String },

    #[error("entry {index}: {source}")]
    Engine { index: usize, source: EngineError },
}

/// Request body: `{"agentStates": [{"id"?: int, "state": {"position": {x,y,z}}}, ...]}`.
///
/// Entries are kept untyped so one bad entry cannot fail the whole batch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DecisionRequest {
    #[serde(rename = "agentStates", default)]
    pub agent_states: Vec<Value>,
}

/// One validated entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentQuery {
    pub agent: AgentId,
    pub position: Position,
}

impl AgentQuery {
    pub fn new(agent: AgentId, position: Position) -> Self {
        Self { agent, position }
    }

    /// Validates one raw entry. Without an explicit `id` the agent is
    /// identified by its index in the batch.
    pub fn from_value(index: usize, entry: &Value) -> Result<Self, QueryError> {
        let agent = match entry.get("id") {
            None | Some(Value::Null) => AgentId(index as u64),
            Some(id) => AgentId(id.as_u64().ok_or(QueryError::InvalidId { index })?),
        };

        let raw = entry
            .get("state")
            .ok_or(QueryError::MissingField { index, field: "state" })?
            .get("position")
            .ok_or(QueryError::MissingField { index, field: "position" })?;

        let wire = WirePosition::deserialize(raw).map_err(|e| QueryError::InvalidPosition {
            index,
            reason: e.to_string(),
        })?;
        let position = Position::from(wire);
        if !position.iter().all(|c| c.is_finite()) {
            return Err(QueryError::InvalidPosition {
                index,
                reason: "non-finite coordinate".to_string(),
            });
        }

        Ok(Self { agent, position })
    }
}

/// One answer: a decision, or an explicit error for a bad entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecisionEntry {
    Decision(Decision),
    Error {
        decision: &'static str,
        error: String,
    },
}

impl DecisionEntry {
    pub fn error(err: &QueryError) -> Self {
        DecisionEntry::Error {
            decision: "error",
            error: err.to_string(),
        }
    }

    pub fn decision(&self) -> Option<Decision> {
        match self {
            DecisionEntry::Decision(d) => Some(*d),
            DecisionEntry::Error { .. } => None,
        }
    }
}

/// Response body: one entry per request entry, same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionResponse {
    pub decisions: Vec<DecisionEntry>,
}

/// Answers per-tick decision queries against a shared engine.
pub struct DecisionQueryService<Ctx: OverwatchContext> {
    engine: Arc<DecisionEngine<Ctx>>,
}

impl<Ctx: OverwatchContext> Clone for DecisionQueryService<Ctx> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<Ctx: OverwatchContext> DecisionQueryService<Ctx> {
    pub fn new(engine: Arc<DecisionEngine<Ctx>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine<Ctx>> {
        &self.engine
    }

    /// Decides for already-validated entries, in order.
    pub fn decide_tick(&self, queries: &[AgentQuery]) -> Vec<Result<Decision, QueryError>> {
        queries
            .iter()
            .enumerate()
            .map(|(index, q)| self.decide_one(index, q))
            .collect()
    }

    fn decide_one(&self, index: usize, query: &AgentQuery) -> Result<Decision, QueryError> {
        self.engine
            .decide(query.agent, &query.position)
            .map_err(|source| QueryError::Engine { index, source })
    }

    /// Decides for a raw request. Invalid entries get an error result.
    pub fn handle(&self, request: &DecisionRequest) -> DecisionResponse {
        let decisions = request
            .agent_states
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                match AgentQuery::from_value(index, entry).and_then(|q| self.decide_one(index, &q)) {
                    Ok(decision) => DecisionEntry::Decision(decision),
                    Err(e) => {
                        warn!(error = %e, "Rejected query entry");
                        DecisionEntry::error(&e)
                    }
                }
            })
            .collect::<Vec<_>>();

        debug!(entries = decisions.len(), "Answered decision query");
        DecisionResponse { decisions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StateScope};
    use crate::detection::DetectionEvent;
    use overwatch_env::TokioContext;
    use serde_json::json;

    fn service() -> DecisionQueryService<TokioContext> {
        let engine = DecisionEngine::shared(TokioContext::shared(), EngineConfig::drone());
        DecisionQueryService::new(engine)
    }

    #[test]
    fn test_entry_parsing() {
        let entry = json!({"id": 4, "state": {"position": {"x": 1.0, "y": 2.0, "z": 3.0}}});
        let q = AgentQuery::from_value(0, &entry).unwrap();
        assert_eq!(q.agent, AgentId(4));
        assert_eq!(q.position, Position::new(1.0, 2.0, 3.0));

        let entry = json!({"state": {"position": {"x": 1, "y": 2, "z": 3}}});
        assert_eq!(AgentQuery::from_value(2, &entry).unwrap().agent, AgentId(2));

        assert_eq!(
            AgentQuery::from_value(1, &json!({"state": {}})),
            Err(QueryError::MissingField { index: 1, field: "position" })
        );
        assert_eq!(
            AgentQuery::from_value(0, &json!({"id": "x", "state": {}})),
            Err(QueryError::InvalidId { index: 0 })
        );
    }

    #[test]
    fn test_bad_entry_does_not_fail_batch() {
        let service = service();
        let request: DecisionRequest = serde_json::from_value(json!({
            "agentStates": [
                {"state": {"position": {"x": 0, "y": 0, "z": 0}}},
                {"state": {"position": {"x": 0, "y": 0}}},
                {"state": {"position": {"x": 5, "y": 0, "z": 5}}}
            ]
        }))
        .unwrap();

        let response = service.handle(&request);

        assert_eq!(response.decisions.len(), 3);
        assert_eq!(response.decisions[0].decision(), Some(Decision::Explore));
        assert!(response.decisions[1].decision().is_none());
        // Shared state: the second valid agent sees the exploration in progress.
        assert_eq!(response.decisions[2].decision(), Some(Decision::Continue));

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["decisions"][0], json!({"decision": "explore"}));
        assert_eq!(body["decisions"][1]["decision"], "error");
        assert!(body["decisions"][1]["error"].as_str().unwrap().contains("entry 1"));
    }

    #[test]
    fn test_every_agent_is_redirected_by_camera() {
        let service = service();
        let event = DetectionEvent::camera(1, 0.75, service.engine().context().now()).unwrap();
        service.engine().on_detection(&event);

        let far = Position::new(500.0, 0.0, 500.0);
        let decisions =
            service.decide_tick(&[AgentQuery::new(AgentId(0), far), AgentQuery::new(AgentId(1), far)]);

        let target = EngineConfig::drone().cameras.get(1).unwrap();
        assert_eq!(decisions, vec![Ok(Decision::MoveToTarget(target)); 2]);
    }

    #[test]
    fn test_agent_over_limit_gets_entry_error() {
        let config = EngineConfig {
            max_agents: 1,
            ..EngineConfig::drone().with_scope(StateScope::PerAgent)
        };
        let engine = DecisionEngine::shared(TokioContext::shared(), config);
        let service = DecisionQueryService::new(engine);
        let request: DecisionRequest = serde_json::from_value(json!({
            "agentStates": [
                {"id": 1, "state": {"position": {"x": 0, "y": 0, "z": 0}}},
                {"id": 2, "state": {"position": {"x": 0, "y": 0, "z": 0}}}
            ]
        }))
        .unwrap();

        let response = service.handle(&request);

        assert_eq!(response.decisions[0].decision(), Some(Decision::Explore));
        assert!(response.decisions[1].decision().is_none());
        assert_eq!(service.engine().snapshots().len(), 1);

        let body = serde_json::to_value(&response).unwrap();
        assert!(body["decisions"][1]["error"].as_str().unwrap().contains("agent table full"));
    }

    #[test]
    fn test_empty_request() {
        let request: DecisionRequest = serde_json::from_str("{}").unwrap();
        assert!(service().handle(&request).decisions.is_empty());
    }
}
