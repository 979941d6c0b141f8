//! Core environment context trait for Overwatch components.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for time.
///
/// This trait abstracts the "real world" so that the decision engine can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `std::time::Instant`, `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
///
/// # Determinism
///
/// Every cooldown and timeout in the engine is a comparison against
/// [`OverwatchContext::now`], so a simulated clock makes those rules fully
/// reproducible.
#[async_trait]
pub trait OverwatchContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Detection receipt timestamps and decision queries both read this clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);
}
