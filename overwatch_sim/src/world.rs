//! SimWorld - The simulation harness container.
//!
//! Wires a real [`OverwatchRuntime`] (adapters, ingestion task, engine) to
//! simulated camera and drone channels, and moves a handful of agents
//! according to the decisions they receive each tick.

use crate::context::SimContext;
use crate::network::{sim_channel, SimNetworkController, SimSensor};

use overwatch_core::{
    AgentQuery, Decision, DetectionDecoder, DecisionEngine, DetectionSourceAdapter, EngineConfig,
    OverwatchRuntime, Position, RuntimeConfig, RuntimeError, RuntimeReport, SourceKind,
};
use overwatch_env::{AgentId, ChannelId, OverwatchContext};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// RNG stream ids derived from the master seed.
const CAMERA_LINK_STREAM: u64 = 1;
const DRONE_LINK_STREAM: u64 = 2;
const WAYPOINT_STREAM: u64 = 3;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of agents to spawn
    pub num_agents: usize,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Agent speed in m/s
    pub agent_speed: f64,

    /// Half-width of the square area exploration waypoints are drawn from
    pub patrol_extent: f64,

    /// Engine rules
    pub engine: EngineConfig,

    /// Decoder for the camera channel
    pub camera_decoder: DetectionDecoder,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_agents: 3,
            tick_rate_hz: 10,
            agent_speed: 8.0,
            patrol_extent: 100.0,
            engine: EngineConfig::drone(),
            camera_decoder: DetectionDecoder::new(SourceKind::CameraStatic),
        }
    }
}

impl SimConfig {
    /// Single ground robot whose camera bridge omits confidence.
    pub fn ground_robot(seed: u64) -> Self {
        Self {
            seed,
            num_agents: 1,
            agent_speed: 4.0,
            engine: EngineConfig::ground_robot(),
            camera_decoder: DetectionDecoder::new(SourceKind::CameraStatic).with_assumed_confidence(1.0),
            ..Default::default()
        }
    }
}

/// A simulated agent moving in the world.
#[derive(Debug, Clone)]
pub struct SimAgent {
    pub id: AgentId,
    pub position: Position,

    /// Where the agent is heading, if anywhere
    pub heading: Option<Position>,

    pub last_decision: Option<Decision>,
}

impl SimAgent {
    fn step(&mut self, speed: f64, dt: f64) {
        let Some(goal) = self.heading else {
            return;
        };
        let delta = goal - self.position;
        let distance = delta.norm();
        let stride = speed * dt;
        if distance <= stride {
            self.position = goal;
        } else {
            self.position += delta * (stride / distance);
        }
    }
}

/// Per-decision tallies over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecisionTally {
    pub move_to_target: u64,
    pub move_to_target_human: u64,
    pub explore: u64,
    #[serde(rename = "continue")]
    pub continue_: u64,
}

impl DecisionTally {
    fn record(&mut self, decision: &Decision) {
        match decision {
            Decision::MoveToTarget(_) => self.move_to_target += 1,
            Decision::MoveToTargetHuman(_) => self.move_to_target_human += 1,
            Decision::Explore => self.explore += 1,
            Decision::Continue => self.continue_ += 1,
        }
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Agents, indexed by their id
    pub agents: Vec<SimAgent>,

    runtime: OverwatchRuntime<SimContext>,
    camera: SimSensor,
    drone: SimSensor,
    camera_link: Arc<SimNetworkController>,
    drone_link: Arc<SimNetworkController>,
    in_flight: Vec<Arc<AtomicUsize>>,
    waypoints: ChaCha8Rng,
    tally: DecisionTally,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld. Must be called inside a tokio runtime.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let engine = DecisionEngine::shared(context.clone(), config.engine.clone());
        let mut runtime = OverwatchRuntime::start(engine.clone(), RuntimeConfig::default());

        let (camera, camera_transport, camera_link) =
            sim_channel(context.clone(), context.rng(CAMERA_LINK_STREAM));
        let (drone, drone_transport, drone_link) =
            sim_channel(context.clone(), context.rng(DRONE_LINK_STREAM));
        let in_flight = vec![camera_transport.pending_handle(), drone_transport.pending_handle()];

        runtime.attach(DetectionSourceAdapter::new(
            ChannelId::new("sim-cameras"),
            camera_transport,
            config.camera_decoder.clone(),
        ));
        runtime.attach(DetectionSourceAdapter::new(
            ChannelId::new("sim-drones"),
            drone_transport,
            DetectionDecoder::new(SourceKind::DroneSelf),
        ));

        let agents = (0..config.num_agents)
            .map(|i| {
                let id = AgentId(i as u64);
                if let Err(e) = engine.register_agent(id) {
                    warn!(error = %e, "Agent not registered");
                }
                SimAgent {
                    id,
                    position: Position::new(i as f64 * 5.0, 10.0, 0.0),
                    heading: None,
                    last_decision: None,
                }
            })
            .collect();

        Self {
            waypoints: context.rng(WAYPOINT_STREAM),
            config,
            context,
            agents,
            runtime,
            camera,
            drone,
            camera_link,
            drone_link,
            in_flight,
            tally: DecisionTally::default(),
            tick_count: 0,
        }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine<SimContext>> {
        self.runtime.engine()
    }

    pub fn camera_link(&self) -> &Arc<SimNetworkController> {
        &self.camera_link
    }

    pub fn drone_link(&self) -> &Arc<SimNetworkController> {
        &self.drone_link
    }

    /// A camera bridge reports a detection.
    pub fn emit_camera(&self, camera_id: u32, confidence: f64) -> bool {
        self.camera.send_json(&json!({
            "camera_id": camera_id,
            "track_id": self.tick_count,
            "position": {"x": 0.5, "y": 0.5},
            "confidence": confidence,
        }))
    }

    /// A camera bridge that never reports confidence.
    pub fn emit_camera_unscored(&self, camera_id: u32) -> bool {
        self.camera.send_json(&json!({ "camera_id": camera_id }))
    }

    /// A drone reports something it sees at `position`.
    pub fn emit_drone(&self, agent: AgentId, label: &str, confidence: f64, position: Position) -> bool {
        self.drone.send_json(&json!({
            "type": label,
            "agent_id": agent.as_u64(),
            "confidence": confidence,
            "position": {"x": position.x, "y": position.y, "z": position.z},
        }))
    }

    /// Raw bytes on the camera channel.
    pub fn emit_camera_raw(&self, payload: &[u8]) -> bool {
        self.camera.send(payload.to_vec())
    }

    /// Lets adapters and the ingestion task drain everything delivered so far.
    pub async fn settle(&self) {
        for _ in 0..1_000 {
            let in_flight: usize = self.in_flight.iter().map(|p| p.load(Ordering::SeqCst)).sum();
            if in_flight == 0 && self.runtime.pending() == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        warn!("Simulation did not settle");
    }

    /// Queries every agent at the current time without moving anyone.
    pub async fn decide_all(&mut self) -> Vec<Decision> {
        self.settle().await;
        let queries: Vec<AgentQuery> = self
            .agents
            .iter()
            .map(|a| AgentQuery::new(a.id, a.position))
            .collect();
        let decisions: Vec<Decision> = self
            .runtime
            .query_service()
            .decide_tick(&queries)
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|e| {
                    warn!(error = %e, "Query rejected, agent keeps its course");
                    Decision::Continue
                })
            })
            .collect();
        for (agent, decision) in self.agents.iter_mut().zip(&decisions) {
            agent.last_decision = Some(*decision);
            self.tally.record(decision);
        }
        decisions
    }

    /// Decides, moves every agent by one tick, then advances the clock.
    pub async fn tick(&mut self) -> Vec<Decision> {
        let decisions = self.decide_all().await;

        let dt = 1.0 / self.config.tick_rate_hz as f64;
        for (i, decision) in decisions.iter().enumerate() {
            let heading = match decision {
                Decision::MoveToTarget(target) => Some(*target),
                Decision::MoveToTargetHuman(_) => None,
                Decision::Explore => Some(self.random_waypoint(self.agents[i].position.y)),
                Decision::Continue => self.agents[i].heading,
            };
            let agent = &mut self.agents[i];
            agent.heading = heading;
            agent.step(self.config.agent_speed, dt);
        }

        self.context.advance_time(Duration::from_secs_f64(dt));
        self.tick_count += 1;

        if self.tick_count % self.config.tick_rate_hz as u64 == 0 {
            debug!(
                t = self.time(),
                phase = ?self.engine().phase(AgentId::FLEET),
                "tick"
            );
        }
        decisions
    }

    /// Advances the clock without querying.
    pub fn advance(&self, duration: Duration) {
        self.context.advance_time(duration);
    }

    fn random_waypoint(&mut self, altitude: f64) -> Position {
        let extent = self.config.patrol_extent;
        Position::new(
            self.waypoints.gen_range(-extent..=extent),
            altitude,
            self.waypoints.gen_range(-extent..=extent),
        )
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tally(&self) -> DecisionTally {
        self.tally
    }

    /// Stops adapters and returns the runtime counters.
    pub async fn shutdown(self) -> Result<RuntimeReport, RuntimeError> {
        self.runtime.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_world_creation() {
        let world = SimWorld::new(SimConfig {
            num_agents: 4,
            ..Default::default()
        });

        assert_eq!(world.agents.len(), 4);
        assert_eq!(world.tick_count(), 0);
        assert_eq!(world.time(), 0.0);
        world.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sim_world_tick_advances_clock() {
        let mut world = SimWorld::new(SimConfig::default());

        let decisions = world.tick().await;

        assert_eq!(decisions.len(), 3);
        assert_eq!(world.tick_count(), 1);
        assert!((world.time() - 0.1).abs() < 1e-9);
        world.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_camera_detection_flows_through_adapter() {
        let mut world = SimWorld::new(SimConfig::default());

        assert!(world.emit_camera(2, 0.9));
        let decisions = world.decide_all().await;

        let target = world.config.engine.cameras.get(2).unwrap();
        assert!(decisions.iter().all(|d| *d == Decision::MoveToTarget(target)));

        let report = world.shutdown().await.unwrap();
        assert_eq!(report.ingested, 1);
    }

    proptest::proptest! {
        #[test]
        fn step_never_overshoots(
            gx in -50.0f64..50.0,
            gz in -50.0f64..50.0,
            speed in 0.1f64..20.0,
        ) {
            let goal = Position::new(gx, 0.0, gz);
            let mut agent = SimAgent {
                id: AgentId(0),
                position: Position::zeros(),
                heading: Some(goal),
                last_decision: None,
            };
            let before = goal.norm();
            agent.step(speed, 0.1);
            let after = (goal - agent.position).norm();

            proptest::prop_assert!(after <= before + 1e-9);
            proptest::prop_assert!((before - after) <= speed * 0.1 + 1e-9);
        }
    }

    #[test]
    fn test_agent_step_stops_at_goal() {
        let mut agent = SimAgent {
            id: AgentId(0),
            position: Position::new(0.0, 0.0, 0.0),
            heading: Some(Position::new(3.0, 0.0, 4.0)),
            last_decision: None,
        };

        agent.step(10.0, 0.1);
        assert!((agent.position.norm() - 1.0).abs() < 1e-9);

        agent.step(10.0, 1.0);
        assert_eq!(agent.position, Position::new(3.0, 0.0, 4.0));
    }
}
