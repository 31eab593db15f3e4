//! Engine state types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Starting
//!    │                              │
//!    │ shutdown()                   │ (config valid, loops spawned)
//!    │                              ↓
//!    │                          Running
//!    │                              │
//!    │                    shutdown()│
//!    │                              ↓
//!    └─────────────────────→ ShuttingDown ───→ Stopped
//!
//! Starting ──(invalid config)──→ Failed
//! ```
//!
//! - **Created**: after `Reconciler::new()`, nothing spawned.
//! - **Starting**: `start()` validating config and spawning loops.
//! - **Running**: log sync (and replication, if attached) on their intervals.
//! - **ShuttingDown**: loops signalled, in-flight cycles draining.
//! - **Stopped**: all loops finished or timed out. Safe to drop.
//! - **Failed**: could not start. Check logs.

/// State of the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but not started.
    ///
    /// Call [`start()`](super::Reconciler::start) to begin reconciling.
    Created,

    /// Validating configuration and spawning loops.
    Starting,

    /// Periodic loops are running.
    Running,

    /// Draining in-flight cycles.
    ShuttingDown,

    /// Shut down cleanly.
    Stopped,

    /// Failed to start.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Starting => write!(f, "Starting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time health snapshot.
///
/// Collected from atomics and watch channels only; no network I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: EngineState,
    /// Running (loops spawned)
    pub ready: bool,
    /// Ready and the last log sync cycle did not fail
    pub healthy: bool,
    pub node_id: String,
    /// Peer the log sync talks to
    pub peer: String,
    pub log_sync_enabled: bool,
    pub consecutive_failures: u32,
    /// `u64::MAX` if no cycle has succeeded yet
    pub millis_since_success: u64,
    /// Reconfigurations applied to the log sync task
    pub config_revision: u64,
    pub replication_attached: bool,
}
