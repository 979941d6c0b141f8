//! Scenario runner - drives the decision engine through simulated missions.

use crate::scenarios::ScenarioId;
use crate::world::{DecisionTally, SimConfig, SimWorld};

use overwatch_core::{Decision, EngineConfig};
use overwatch_env::{AgentId, NetworkController, OverwatchContext};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    #[serde(serialize_with = "scenario_name")]
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Number of simulated agents
    pub agents: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

fn scenario_name<S: serde::Serializer>(id: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(id.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Datagrams offered to the sensor channels
    pub datagrams_sent: u64,

    /// Datagrams lost to injected faults
    pub datagrams_lost: u64,

    /// Events handed to the engine
    pub ingested: u64,

    /// Datagrams the adapters could not decode
    pub malformed: u64,

    pub accepted: u64,
    pub cooled_down: u64,
    pub below_threshold: u64,
    pub unknown_source: u64,
    pub busy: u64,

    /// Decisions handed out, by kind
    pub decisions: DecisionTally,
}

/// Collects failed assertions of one run.
#[derive(Default)]
struct Checks(Vec<String>);

impl Checks {
    fn expect(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            let message = what();
            debug!("check failed: {}", message);
            self.0.push(message);
        }
    }
}

/// Runs simulation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of agents
    num_agents: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_agents: usize) -> Self {
        Self {
            seed,
            num_agents: num_agents.max(1),
            tick_rate_hz: 10,
            max_duration_secs: 15.0,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration. Scenarios that need longer to show their
    /// behaviour extend it.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario on a fresh single-threaded runtime.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Cannot build runtime: {}", e);
                return ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    agents: 0,
                    failure_reason: Some(format!("runtime: {}", e)),
                    metrics: ScenarioMetrics::default(),
                };
            }
        };

        rt.block_on(async {
            match scenario {
                ScenarioId::CameraDispatch => self.run_camera_dispatch().await,
                ScenarioId::HumanHold => self.run_human_hold().await,
                ScenarioId::IdleExplore => self.run_idle_explore().await,
                ScenarioId::CooldownFlood => self.run_cooldown_flood().await,
                ScenarioId::ArrivalPreempt => self.run_arrival_preempt().await,
                ScenarioId::LossyChannels => self.run_lossy_channels().await,
                ScenarioId::GroundRobotPatrol => self.run_ground_robot_patrol().await,
            }
        })
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            num_agents: self.num_agents,
            tick_rate_hz: self.tick_rate_hz,
            ..Default::default()
        }
    }

    fn ticks(&self, min_secs: f64) -> u64 {
        (self.max_duration_secs.max(min_secs) * self.tick_rate_hz as f64).ceil() as u64
    }

    /// OW-001: a camera detection redirects every agent to the camera.
    async fn run_camera_dispatch(&self) -> ScenarioResult {
        info!("OW-001: CameraDispatch");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();
        let target = world.config.engine.cameras.get(1);

        world.emit_camera(1, 0.75);
        let decisions = world.decide_all().await;
        checks.expect(
            target.is_some_and(|t| decisions.iter().all(|d| *d == Decision::MoveToTarget(t))),
            || format!("expected MoveToTarget(camera 1), got {:?}", decisions),
        );

        let start: Vec<f64> = world.agents.iter().map(|a| distance_to(a.position, target)).collect();
        for _ in 0..self.ticks(2.0).min(20) {
            world.tick().await;
        }
        for (agent, before) in world.agents.iter().zip(start) {
            let after = distance_to(agent.position, target);
            checks.expect(after < before, || {
                format!("{} did not close in ({:.1} -> {:.1})", agent.id, before, after)
            });
        }

        info!("✓ CameraDispatch: fleet heading to camera 1");
        finish(ScenarioId::CameraDispatch, world, checks).await
    }

    /// OW-002: a drone human sighting holds position until the override lapses.
    async fn run_human_hold(&self) -> ScenarioResult {
        info!("OW-002: HumanHold");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();
        let hold = world.config.engine.human_detection_timeout;
        let sighting = overwatch_core::Position::new(1.0, 2.0, 3.0);

        world.emit_drone(AgentId(0), "human", 0.9, sighting);

        for _ in 0..self.ticks(hold.as_secs_f64() + 2.0) {
            let now = world.context.now();
            let before: Vec<_> = world.agents.iter().map(|a| a.position).collect();
            let decisions = world.tick().await;

            for (decision, position) in decisions.iter().zip(before) {
                if now < hold {
                    checks.expect(*decision == Decision::MoveToTargetHuman(position), || {
                        format!("t={:?}: expected hold, got {}", now, decision)
                    });
                } else {
                    checks.expect(!matches!(decision, Decision::MoveToTargetHuman(_)), || {
                        format!("t={:?}: override still active", now)
                    });
                }
            }
        }

        let tally = world.tally();
        checks.expect(tally.move_to_target_human > 0, || "no hold issued".to_string());
        info!("✓ HumanHold: {} hold decisions", tally.move_to_target_human);
        finish(ScenarioId::HumanHold, world, checks).await
    }

    /// OW-003: with no detections the fleet explores, then continues.
    async fn run_idle_explore(&self) -> ScenarioResult {
        info!("OW-003: IdleExplore");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();
        let cooldown = world.config.engine.explore_cooldown.unwrap_or(Duration::ZERO);

        let mut explores = Vec::new();
        for _ in 0..self.ticks(cooldown.as_secs_f64() + 2.0) {
            let now = world.context.now();
            let decisions = world.tick().await;
            for decision in &decisions {
                checks.expect(decision.is_exploration(), || {
                    format!("t={:?}: unexpected {}", now, decision)
                });
                if *decision == Decision::Explore {
                    explores.push(now);
                }
            }
        }

        checks.expect(explores.first() == Some(&Duration::ZERO), || {
            "first query did not explore".to_string()
        });
        for pair in explores.windows(2) {
            checks.expect(pair[1] - pair[0] >= cooldown, || {
                format!("explore re-issued after {:?}", pair[1] - pair[0])
            });
        }
        checks.expect(explores.len() >= 2, || {
            format!("exploration never restarted: {:?}", explores)
        });

        info!("✓ IdleExplore: explore issued at {:?}", explores);
        finish(ScenarioId::IdleExplore, world, checks).await
    }

    /// OW-004: a detection flood; only one event per cooldown window lands.
    async fn run_cooldown_flood(&self) -> ScenarioResult {
        info!("OW-004: CooldownFlood");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();
        let cooldown = world.config.engine.camera.cooldown;

        let mut emitted = 0u64;
        let mut expected_accepts = 0u64;
        let mut last_accept: Option<Duration> = None;

        for tick in 0..self.ticks(10.0) {
            let now = world.context.now();
            for burst in 0..2u64 {
                world.emit_camera(((tick * 2 + burst) % 4) as u32, 0.9);
                emitted += 1;
                if last_accept.map_or(true, |t| now - t >= cooldown) {
                    last_accept = Some(now);
                    expected_accepts += 1;
                }
            }
            world.tick().await;
        }
        world.settle().await;

        let stats = world.engine().stats();
        checks.expect(stats.accepted == expected_accepts, || {
            format!("accepted {} detections, expected {}", stats.accepted, expected_accepts)
        });
        checks.expect(stats.accepted + stats.cooled_down == emitted, || {
            format!("{} accepted + {} cooled down != {} emitted", stats.accepted, stats.cooled_down, emitted)
        });

        info!("✓ CooldownFlood: {}/{} detections accepted", stats.accepted, emitted);
        finish(ScenarioId::CooldownFlood, world, checks).await
    }

    /// OW-005: a newer detection pre-empts the target; arrival clears it
    /// before the target timeout.
    async fn run_arrival_preempt(&self) -> ScenarioResult {
        info!("OW-005: ArrivalPreempt");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();
        let engine: EngineConfig = world.config.engine.clone();
        let first = engine.cameras.get(1);
        let second = engine.cameras.get(0);
        let switch_at = engine.camera.cooldown;
        let deadline = switch_at + engine.target_timeout.unwrap_or(Duration::MAX / 2);

        world.emit_camera(1, 0.9);
        let mut arrived_at: Option<Duration> = None;
        let mut switched = false;

        for _ in 0..self.ticks(15.0) {
            let now = world.context.now();
            if !switched && now >= switch_at {
                world.emit_camera(0, 0.9);
                switched = true;
            }
            let decisions = world.tick().await;
            let lead = decisions[0];

            match arrived_at {
                None if lead.is_exploration() => arrived_at = Some(now),
                None if !switched => checks.expect(first.map(Decision::MoveToTarget) == Some(lead), || {
                    format!("t={:?}: expected camera 1, got {}", now, lead)
                }),
                None => checks.expect(second.map(Decision::MoveToTarget) == Some(lead), || {
                    format!("t={:?}: expected camera 0, got {}", now, lead)
                }),
                Some(_) => checks.expect(decisions.iter().all(Decision::is_exploration), || {
                    format!("t={:?}: target re-announced after arrival", now)
                }),
            }
        }

        checks.expect(arrived_at.is_some_and(|t| t > switch_at && t < deadline), || {
            format!("arrival at {:?}, expected between {:?} and {:?}", arrived_at, switch_at, deadline)
        });

        info!("✓ ArrivalPreempt: target reached at {:?}", arrived_at);
        finish(ScenarioId::ArrivalPreempt, world, checks).await
    }

    /// OW-006: loss, a severed link and garbage never stall decisions.
    async fn run_lossy_channels(&self) -> ScenarioResult {
        info!("OW-006: LossyChannels");
        let mut world = SimWorld::new(self.config());
        let mut checks = Checks::default();

        world.camera_link().set_loss(0.5);
        world.drone_link().sever();

        let mut delivered_events = 0u64;
        let mut delivered_garbage = 0u64;
        let agents = world.agents.len();

        for tick in 0..self.ticks(10.0) {
            if world.emit_camera((tick % 4) as u32, 0.9) {
                delivered_events += 1;
            }
            if tick % 5 == 0 && world.emit_camera_raw(b"\xff\x00garbage") {
                delivered_garbage += 1;
            }
            if tick % 10 == 0 {
                world.emit_drone(AgentId(0), "human", 0.95, overwatch_core::Position::zeros());
            }
            let decisions = world.tick().await;
            checks.expect(decisions.len() == agents, || format!("tick {} answered short", tick));
        }
        world.settle().await;

        let tally = world.tally();
        checks.expect(tally.move_to_target_human == 0, || {
            "severed drone link still delivered".to_string()
        });
        checks.expect(world.camera_link().lost() > 0, || "no loss injected".to_string());
        checks.expect(world.drone_link().lost() == world.drone_link().sent(), || {
            "drone link leaked datagrams".to_string()
        });

        let mut result = finish(ScenarioId::LossyChannels, world, checks).await;
        if result.metrics.ingested != delivered_events || result.metrics.malformed != delivered_garbage {
            result.passed = false;
            result.failure_reason = Some(format!(
                "ingested {} (expected {}), malformed {} (expected {})",
                result.metrics.ingested, delivered_events, result.metrics.malformed, delivered_garbage
            ));
        }

        info!(
            "✓ LossyChannels: {} lost, {} ingested",
            result.metrics.datagrams_lost, result.metrics.ingested
        );
        result
    }

    /// OW-007: the ground robot finishes its investigation before taking new work.
    async fn run_ground_robot_patrol(&self) -> ScenarioResult {
        info!("OW-007: GroundRobotPatrol");
        let mut config = SimConfig::ground_robot(self.seed);
        config.tick_rate_hz = self.tick_rate_hz;
        let mut world = SimWorld::new(config);
        let mut checks = Checks::default();

        let first = world.config.engine.cameras.get(0);
        let second = world.config.engine.cameras.get(1);
        let cooldown = world.config.engine.camera.cooldown;

        world.emit_camera_unscored(0);
        let mut arrived_at: Option<Duration> = None;
        let mut interrupted = false;
        let mut reassigned = false;

        for _ in 0..self.ticks(40.0) {
            let now = world.context.now();
            if !interrupted && now >= cooldown + Duration::from_secs(1) {
                // Still on its way: must be ignored.
                world.emit_camera_unscored(1);
                interrupted = true;
            }
            if let Some(t) = arrived_at {
                if !reassigned && now >= t + Duration::from_secs(1) {
                    world.emit_camera_unscored(1);
                    reassigned = true;
                }
            }

            let decision = world.tick().await[0];
            match arrived_at {
                None if decision == Decision::Explore => arrived_at = Some(now),
                None => checks.expect(first.map(Decision::MoveToTarget) == Some(decision), || {
                    format!("t={:?}: expected camera 0, got {}", now, decision)
                }),
                Some(_) if reassigned => {
                    checks.expect(second.map(Decision::MoveToTarget) == Some(decision), || {
                        format!("t={:?}: expected camera 1, got {}", now, decision)
                    });
                    break;
                }
                Some(_) => checks.expect(decision == Decision::Explore, || {
                    format!("t={:?}: robot should re-issue explore, got {}", now, decision)
                }),
            }
        }

        let stats = world.engine().stats();
        checks.expect(arrived_at.is_some(), || "robot never reached camera 0".to_string());
        checks.expect(arrived_at.is_some_and(|t| t > Duration::from_secs(10)), || {
            "trip should outlast the drone target timeout".to_string()
        });
        checks.expect(stats.busy == 1, || format!("expected 1 busy rejection, got {}", stats.busy));
        checks.expect(reassigned && stats.accepted == 2, || {
            format!("expected 2 accepted detections, got {}", stats.accepted)
        });

        info!("✓ GroundRobotPatrol: arrived at {:?}", arrived_at);
        finish(ScenarioId::GroundRobotPatrol, world, checks).await
    }
}

fn distance_to(position: overwatch_core::Position, target: Option<overwatch_core::Position>) -> f64 {
    target.map_or(f64::INFINITY, |t| (position - t).norm())
}

/// Shuts the world down and assembles the result.
async fn finish(scenario: ScenarioId, world: SimWorld, mut checks: Checks) -> ScenarioResult {
    world.settle().await;

    let stats = world.engine().stats();
    let mut metrics = ScenarioMetrics {
        datagrams_sent: world.camera_link().sent() + world.drone_link().sent(),
        datagrams_lost: world.camera_link().lost() + world.drone_link().lost(),
        accepted: stats.accepted,
        cooled_down: stats.cooled_down,
        below_threshold: stats.below_threshold,
        unknown_source: stats.unknown_source,
        busy: stats.busy,
        decisions: world.tally(),
        ..Default::default()
    };
    let seed = world.config.seed;
    let agents = world.agents.len();
    let total_ticks = world.tick_count();
    let final_time_secs = world.time();

    match world.shutdown().await {
        Ok(report) => {
            metrics.ingested = report.ingested;
            metrics.malformed = report.adapters.iter().map(|a| a.malformed).sum();
        }
        Err(e) => checks.0.push(format!("shutdown: {}", e)),
    }

    let passed = checks.0.is_empty();
    ScenarioResult {
        scenario,
        seed,
        passed,
        total_ticks,
        final_time_secs,
        agents,
        failure_reason: if passed { None } else { Some(checks.0.join("; ")) },
        metrics,
    }
}
