//! Overwatch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Overwatch
//! decision engine to run against **Production** I/O (tokio, UDP sockets) or a
//! **Simulation** (virtual clock, channel-backed datagrams).
//!
//! # Core Concept
//!
//! Everything the engine and its adapters observe from the outside world goes
//! through two traits:
//! - Time (`now()`, `sleep()`) via [`OverwatchContext`]
//! - Datagrams (`recv()`) via [`DatagramTransport`]
//!
//! Tests swap both for deterministic implementations so that cooldowns and
//! timeouts can be exercised without waiting on the wall clock.
//!
//! # Example
//!
//! ```ignore
//! use overwatch_env::{OverwatchContext, DatagramTransport};
//!
//! async fn receive_loop<Ctx: OverwatchContext, T: DatagramTransport>(
//!     ctx: &Ctx,
//!     transport: &T,
//! ) {
//!     loop {
//!         tokio::select! {
//!             datagram = transport.recv() => handle(datagram),
//!             _ = ctx.sleep(Duration::from_secs(1)) => check_shutdown(),
//!         }
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::OverwatchContext;
pub use network::{DatagramTransport, NetworkController};
pub use types::{AgentId, ChannelId, Datagram};
pub use error::EnvError;
pub use tokio_impl::{TokioContext, UdpTransport};
