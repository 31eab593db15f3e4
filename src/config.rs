//! Configuration for the reconciliation engine.
//!
//! This module defines all configuration types needed to run the engine.
//! Configuration is passed to [`Reconciler::new()`](crate::Reconciler::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use reconciliation_engine::config::{LogSyncMode, ReconcileConfig};
//!
//! let mut config = ReconcileConfig::for_testing("gw-1");
//! config.server_url = "http://server:8080".into();
//! config.log_sync.mode = LogSyncMode::PushPull;
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReconcileConfig
//! ├── node_id: String              # This node's identity (owner id of its logs)
//! ├── server_url: String           # Current peer address
//! ├── log_sync: LogSyncConfig      # Audit log reconciliation
//! ├── log_store: LogStoreConfig    # SQLite event storage
//! ├── repository: RepositoryConfig # Versioned repository + replication
//! └── cache: CacheConfig           # Local buffer for cached repositories
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! node_id: "gw-1"
//! server_url: "http://provisioning.example.com:8080"
//!
//! log_sync:
//!   interval: "30s"
//!   endpoint: "auditlog"
//!   mode: push_pull
//!
//! repository:
//!   sqlite_path: "/var/lib/app/repository.db"
//!   master_mode: false
//!   replication:
//!     enabled: true
//!     interval: "5m"
//! ```
//!
//! # Reconfiguration
//!
//! There is no implicit rebinding. A new config is applied by calling
//! `reconfigure` on the running task, or by publishing it on the watch
//! channel handed to the [`Reconciler`](crate::Reconciler).

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Reconciler::new()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Identity of this node. Used as the owner id of the logs it pushes.
    pub node_id: String,

    /// Base URL of the peer this node reconciles against.
    /// Example: `"http://server:8080"`
    pub server_url: String,

    #[serde(default)]
    pub log_sync: LogSyncConfig,

    #[serde(default)]
    pub log_store: LogStoreConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            node_id: "local.dev.node.default".to_string(),
            server_url: "http://localhost:8080".to_string(),
            log_sync: LogSyncConfig::default(),
            log_store: LogStoreConfig::default(),
            repository: RepositoryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ReconcileConfig {
    /// Create a minimal config for testing (in-memory stores, short intervals).
    pub fn for_testing(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            server_url: "http://localhost:8080".to_string(),
            log_sync: LogSyncConfig::for_testing(),
            log_store: LogStoreConfig::in_memory(),
            repository: RepositoryConfig::for_testing(),
            cache: CacheConfig::default(),
        }
    }

    /// Reject configs that cannot possibly run.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(ReconcileError::Config("node_id must not be empty".into()));
        }
        reqwest::Url::parse(&self.server_url).map_err(|e| {
            ReconcileError::Config(format!("Invalid server_url '{}': {}", self.server_url, e))
        })?;
        self.log_sync.validate()?;
        if self.repository.replication.enabled && self.repository.master_mode {
            return Err(ReconcileError::Config(
                "repository replication requires master_mode = false".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LogSyncConfig: audit log reconciliation
// ═══════════════════════════════════════════════════════════════════════════════

/// Which direction(s) a log sync cycle moves events in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSyncMode {
    /// Offer local events the peer has not seen.
    #[default]
    Push,
    /// Fetch peer events missing locally.
    Pull,
    /// Push, then pull.
    PushPull,
}

impl LogSyncMode {
    pub fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::PushPull)
    }

    pub fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::PushPull)
    }
}

/// Log sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSyncConfig {
    /// Whether the periodic log sync loop runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scheduling interval as a duration string (e.g., "30s").
    #[serde(default = "default_log_sync_interval")]
    pub interval: String,

    /// Endpoint name on the peer, e.g. `auditlog` for `/auditlog/query`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Query parameter carrying the owner id.
    #[serde(default = "default_owner_id_param")]
    pub owner_id_param: String,

    #[serde(default)]
    pub mode: LogSyncMode,

    /// Keep going with the remaining logs when one log hits a protocol error.
    /// `false` aborts the whole cycle on the first failure.
    #[serde(default = "default_true")]
    pub isolate_log_failures: bool,

    /// Per-request timeout as a duration string.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Maximum events read from the store (or requested from the peer) at once.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Most `receive` requests issued for one log in one pull cycle.
    /// Whatever is left of the delta is fetched by later cycles.
    #[serde(default = "default_max_pull_windows")]
    pub max_pull_windows: usize,

    /// Capacity of the outbound event channel feeding a streamed upload.
    #[serde(default = "default_upload_buffer")]
    pub upload_buffer: usize,

    /// Base backoff in seconds after a cycle fails on a transient error.
    /// Actual backoff = min(base * 2^(consecutive_failures - 1), max).
    #[serde(default = "default_backoff_base_sec")]
    pub backoff_base_sec: u64,

    /// Maximum backoff in seconds (ceiling).
    #[serde(default = "default_backoff_max_sec")]
    pub backoff_max_sec: u64,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_sync_interval() -> String {
    "30s".to_string()
}

fn default_endpoint() -> String {
    "auditlog".to_string()
}

fn default_owner_id_param() -> String {
    "tid".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_max_pull_windows() -> usize {
    256
}

fn default_upload_buffer() -> usize {
    64
}

fn default_backoff_base_sec() -> u64 {
    5
}

fn default_backoff_max_sec() -> u64 {
    300 // 5 minutes
}

impl Default for LogSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_log_sync_interval(),
            endpoint: default_endpoint(),
            owner_id_param: default_owner_id_param(),
            mode: LogSyncMode::Push,
            isolate_log_failures: true,
            request_timeout: default_request_timeout(),
            batch_size: default_batch_size(),
            max_pull_windows: default_max_pull_windows(),
            upload_buffer: default_upload_buffer(),
            backoff_base_sec: default_backoff_base_sec(),
            backoff_max_sec: default_backoff_max_sec(),
        }
    }
}

impl LogSyncConfig {
    /// Short interval, no backoff. Cycles in tests are usually driven by hand.
    pub fn for_testing() -> Self {
        Self {
            interval: "100ms".to_string(),
            request_timeout: "2s".to_string(),
            batch_size: 4,
            backoff_base_sec: 0,
            backoff_max_sec: 0,
            ..Default::default()
        }
    }

    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }

    /// Parse the request timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Backoff after `consecutive_failures` failed cycles in a row.
    pub fn backoff_for_failures(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let backoff_secs = self
            .backoff_base_sec
            .saturating_mul(2u64.saturating_pow(consecutive_failures - 1));
        Duration::from_secs(backoff_secs.min(self.backoff_max_sec))
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() || self.endpoint.contains('/') {
            return Err(ReconcileError::Config(format!(
                "log_sync.endpoint must be a single path segment, got '{}'",
                self.endpoint
            )));
        }
        if self.owner_id_param.is_empty() {
            return Err(ReconcileError::Config(
                "log_sync.owner_id_param must not be empty".into(),
            ));
        }
        if self.batch_size == 0 || self.upload_buffer == 0 || self.max_pull_windows == 0 {
            return Err(ReconcileError::Config(
                "log_sync.batch_size, max_pull_windows and upload_buffer must be positive".into(),
            ));
        }
        if self.interval_duration().is_zero() {
            return Err(ReconcileError::Config("log_sync.interval must be positive".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LogStoreConfig: SQLite event storage
// ═══════════════════════════════════════════════════════════════════════════════

/// Event storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStoreConfig {
    /// Path to the SQLite database holding events.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "reconcile_events.db".to_string(),
            wal_mode: true,
        }
    }
}

impl LogStoreConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: crate::sqlite::IN_MEMORY.to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RepositoryConfig: versioned repository store
// ═══════════════════════════════════════════════════════════════════════════════

/// Versioned repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the SQLite database holding versions.
    pub sqlite_path: String,

    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Masters accept `commit`; replicas only accept `put`.
    #[serde(default = "default_true")]
    pub master_mode: bool,

    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "reconcile_repository.db".to_string(),
            wal_mode: true,
            master_mode: true,
            replication: ReplicationConfig::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn for_testing() -> Self {
        Self {
            sqlite_path: crate::sqlite::IN_MEMORY.to_string(),
            wal_mode: false,
            ..Default::default()
        }
    }
}

/// Replica-side mirroring of a master repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// How often to compare version ranges with the master.
    #[serde(default = "default_replication_interval")]
    pub interval: String,

    /// Path of the master's repository endpoint below `server_url`.
    #[serde(default = "default_repository_path")]
    pub remote_path: String,

    /// Maximum versions copied per cycle. The rest follow next cycle.
    #[serde(default = "default_max_versions_per_cycle")]
    pub max_versions_per_cycle: usize,
}

fn default_replication_interval() -> String {
    "60s".to_string()
}

fn default_repository_path() -> String {
    "repository".to_string()
}

fn default_max_versions_per_cycle() -> usize {
    100
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_replication_interval(),
            remote_path: default_repository_path(),
            max_versions_per_cycle: default_max_versions_per_cycle(),
        }
    }
}

impl ReplicationConfig {
    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(60))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CacheConfig: local buffer directory
// ═══════════════════════════════════════════════════════════════════════════════

/// Where [`CachedRepository`](crate::repository::CachedRepository) keeps its files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: "reconcile_cache".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
