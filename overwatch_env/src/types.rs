//! Common types for the Overwatch environment abstraction.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Identifier of an agent (robot or drone) known to the decision engine.
///
/// Matches the numeric ids the simulator assigns to its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl AgentId {
    /// Key used when the whole fleet shares a single decision state.
    pub const FLEET: AgentId = AgentId(0);

    /// Returns the inner numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Human-readable name of an inbound sensor channel (used in logs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of data received from a sensor channel.
///
/// This is a transport-layer wrapper - the payload is opaque bytes that the
/// detection decoder turns into a structured record.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// The raw bytes as received
    pub payload: Vec<u8>,

    /// Sender address, when the transport knows it
    pub peer: Option<SocketAddr>,

    /// Monotonic receipt time (context clock)
    pub received_at: Duration,
}

impl Datagram {
    /// Creates a new datagram from payload bytes.
    pub fn new(payload: Vec<u8>, received_at: Duration) -> Self {
        Self {
            payload,
            peer: None,
            received_at,
        }
    }
}
