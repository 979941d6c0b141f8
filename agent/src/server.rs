//! HTTP query endpoint.
//!
//! - `POST /get_decisions` - one decision per agent for the current tick
//! - `GET /state` - snapshot of the decision state(s)
//! - `GET /health` - liveness

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use overwatch_core::{DecisionQueryService, DecisionRequest, WirePosition};
use overwatch_env::{OverwatchContext, TokioContext};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::instrument;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub queries: DecisionQueryService<TokioContext>,
    pub profile: String,
}

/// One entry of `GET /state`.
#[derive(Debug, Serialize)]
struct AgentStateView {
    agent: u64,
    phase: overwatch_core::AgentPhase,
    current_target: Option<WirePosition>,
    investigating: bool,
    waiting_on_human: bool,
    exploring: bool,
    last_detection_secs: Option<f64>,
}

/// Builds the router with permissive CORS (the simulator front end calls
/// from another origin).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/get_decisions", post(get_decisions))
        .route("/state", get(engine_state))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /get_decisions
///
/// Invalid entries get a per-entry error; the response is always 200 for a
/// well-formed body.
#[instrument(skip_all, fields(agents = request.agent_states.len()))]
pub async fn get_decisions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecisionRequest>,
) -> impl IntoResponse {
    Json(state.queries.handle(&request))
}

/// GET /state
pub async fn engine_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.queries.engine();
    let agents: Vec<AgentStateView> = engine
        .snapshots()
        .into_iter()
        .map(|(id, s)| AgentStateView {
            agent: id.as_u64(),
            phase: s.phase(),
            current_target: s.current_target.map(WirePosition::from),
            investigating: s.investigating,
            waiting_on_human: s.waiting_on_human,
            exploring: s.exploring,
            last_detection_secs: s.last_detection_time.map(|t| t.as_secs_f64()),
        })
        .collect();

    Json(serde_json::json!({
        "profile": state.profile,
        "scope": engine.config().scope,
        "now_secs": engine.context().now().as_secs_f64(),
        "stats": engine.stats(),
        "agents": agents,
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.queries.engine().context().now().as_secs_f64();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "uptime_secs": uptime })),
    )
}
