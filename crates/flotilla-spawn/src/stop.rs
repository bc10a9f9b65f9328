//! Graceful-stop signalling seam.
//!
//! The spawner cannot talk to tool-call sessions directly (that would invert
//! the dependency order), so the wiring layer hands it this trait.

/// Delivers a shutdown request to an agent's live tool-call session.
#[async_trait::async_trait]
pub trait StopSignaller: Send + Sync {
    /// Returns false when the agent has no live session to signal.
    async fn signal_shutdown(&self, agent_id: &str, reason: &str) -> bool;
}

/// No-op signaller for tests and headless bring-up.
pub struct NullSignaller;

#[async_trait::async_trait]
impl StopSignaller for NullSignaller {
    async fn signal_shutdown(&self, _agent_id: &str, _reason: &str) -> bool {
        false
    }
}
