//! Error types for the Overwatch environment abstraction.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A channel could not bind its transport at startup
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    /// Receive failed (socket error, connection reset, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The transport was closed and will not deliver more datagrams
    #[error("Transport closed")]
    Closed,
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a bind error for the given address.
    pub fn bind(addr: SocketAddr, reason: impl std::fmt::Display) -> Self {
        Self::Bind {
            addr,
            reason: reason.to_string(),
        }
    }

    /// Returns true if the transport can no longer produce datagrams.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Closed)
    }
}
