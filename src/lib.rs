//! # Reconciliation Engine
//!
//! Range-set based reconciliation for fleet nodes that are only sometimes
//! connected to their server.
//!
//! ## Architecture
//!
//! Two kinds of append-only data are reconciled whenever a node and the
//! server can talk: audit event logs and versioned repositories. Both describe
//! "which IDs do I hold" with the same [`RangeSet`] algebra, so each side can
//! compute exactly what the other lacks.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          reconciliation-engine                            │
//! │                                                                           │
//! │  ┌──────────┐   ┌─────────────┐   query/send    ┌─────────────────────┐   │
//! │  │ LogStore │◄─►│ LogSyncTask │◄───────────────►│ LogPeer             │   │
//! │  │ (SQLite) │   │ (per cycle) │   descriptors,  │ (HTTP or loopback)  │   │
//! │  └──────────┘   └─────────────┘   event lines   └─────────────────────┘   │
//! │                                                                           │
//! │  ┌──────────────────┐   ┌──────────────────────┐   ┌─────────────────┐    │
//! │  │ CachedRepository │──►│ Repository (commit,  │◄──│ Repository-     │    │
//! │  │ (offline edits)  │   │ get, put, range)     │   │ Replicator      │    │
//! │  └──────────────────┘   └──────────────────────┘   └─────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reconciliation_engine::{
//!     HttpLogPeer, ReconcileConfig, Reconciler, SqliteLogStore, StaticDiscovery, StaticIdentity,
//! };
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> reconciliation_engine::Result<()> {
//!     let config = ReconcileConfig::default();
//!     let (_tx, rx) = watch::channel(config.clone());
//!
//!     reconciliation_engine::init_http_client(config.log_sync.request_timeout_duration())?;
//!     let store = Arc::new(SqliteLogStore::new(&config.log_store.sqlite_path, true).await?);
//!     let discovery = Arc::new(StaticDiscovery::from_config(&config));
//!     let peer = Arc::new(HttpLogPeer::from_config(discovery, &config.log_sync)?);
//!     let identity = Arc::new(StaticIdentity::from_config(&config));
//!
//!     let mut engine = Reconciler::new(config, rx, store, peer, identity);
//!     engine.start().await?;
//!
//!     // Engine runs until shutdown signal
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod http;
pub mod log_store;
pub mod log_sync;
pub mod metrics;
pub mod peer;
pub mod range;
pub mod repository;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

// Re-exports for convenience
pub use config::{
    CacheConfig, LogStoreConfig, LogSyncConfig, LogSyncMode, ReconcileConfig, ReplicationConfig,
    RepositoryConfig,
};
pub use coordinator::{EngineState, HealthCheck, Reconciler};
pub use descriptor::Descriptor;
pub use discovery::{Discovery, Identification, StaticDiscovery, StaticIdentity};
pub use endpoint::{LogEndpoint, LoopbackPeer};
pub use error::{ReconcileError, Result};
pub use event::Event;
pub use http::{http_client, init_http_client};
pub use log_store::{LogStore, MemoryLogStore, SqliteLogStore};
pub use log_sync::{LogSyncTask, SyncStats};
pub use peer::{EventUpload, HttpLogPeer, LogPeer};
pub use range::{Range, RangeSet};
pub use repository::{
    CachedRepository, HttpRepository, Repository, RepositoryEndpoint, RepositoryReplicator,
    SqliteRepository,
};
