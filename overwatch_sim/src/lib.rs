//! Overwatch Deterministic Simulation Harness
//!
//! Runs the real decision pipeline (adapters, ingestion task, engine, query
//! service) against simulated sensors so that every timing rule can be
//! exercised reproducibly.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock that only moves when the scenario ticks
//! - **Network**: channel-backed sensor links with seeded loss and severing
//! - **Randomness**: every stream derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────┐  SimTransport  ┌──────────────────────────┐   │
//! │  │ cameras  │───────────────►│                          │   │
//! │  └──────────┘                │     OverwatchRuntime     │   │
//! │  ┌──────────┐  SimTransport  │  (adapters + engine)     │   │
//! │  │ drones   │───────────────►│                          │   │
//! │  └──────────┘                └────────────▲─────────────┘   │
//! │                                           │ decide_tick     │
//! │                              ┌────────────┴─────────────┐   │
//! │                              │  SimAgents (kinematics)  │   │
//! │                              └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use overwatch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).run(ScenarioId::HumanHold);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod runner;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use network::{sim_channel, SimNetworkController, SimSensor, SimTransport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{DecisionTally, SimAgent, SimConfig, SimWorld};
