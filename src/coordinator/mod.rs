// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation engine coordinator.
//!
//! Ties together, by explicit construction:
//! - the [`LogSyncTask`] for this node's logs against one [`LogPeer`]
//! - optionally a [`RepositoryReplicator`] mirroring a master repository
//! - a config watcher forwarding new [`ReconcileConfig`]s to both
//!
//! # Lifecycle
//!
//! 1. `new()` wires the pieces; nothing runs yet
//! 2. `start()` validates the config and spawns the periodic loops
//! 3. `sync_now()` runs an extra log sync cycle on demand
//! 4. `shutdown()` signals the loops and waits for in-flight cycles

mod types;

pub use types::{EngineState, HealthCheck};

use crate::config::ReconcileConfig;
use crate::discovery::Identification;
use crate::error::{ReconcileError, Result};
use crate::log_store::LogStore;
use crate::log_sync::{LogSyncTask, SyncStats};
use crate::metrics;
use crate::peer::LogPeer;
use crate::repository::RepositoryReplicator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time each loop gets to finish its in-flight cycle on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The reconciliation engine.
pub struct Reconciler<S: LogStore, P: LogPeer> {
    /// Configuration the engine was started with
    config: ReconcileConfig,

    /// Runtime config updates
    config_rx: watch::Receiver<ReconcileConfig>,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    log_sync: Arc<LogSyncTask<S, P>>,
    replicator: Option<Arc<RepositoryReplicator>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl<S: LogStore, P: LogPeer> Reconciler<S, P> {
    /// Wire an engine. Starts in [`EngineState::Created`].
    pub fn new(
        config: ReconcileConfig,
        config_rx: watch::Receiver<ReconcileConfig>,
        store: Arc<S>,
        peer: Arc<P>,
        identity: Arc<dyn Identification>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log_sync = Arc::new(LogSyncTask::new(store, peer, identity, config.log_sync.clone()));

        Self {
            config,
            config_rx,
            state_tx,
            state_rx,
            log_sync,
            replicator: None,
            shutdown_tx,
            shutdown_rx,
            handles: RwLock::new(Vec::new()),
        }
    }

    /// Attach a repository replicator, run alongside the log sync.
    pub fn with_replicator(mut self, replicator: RepositoryReplicator) -> Self {
        self.replicator = Some(Arc::new(replicator));
        self
    }

    pub fn log_sync(&self) -> &Arc<LogSyncTask<S, P>> {
        &self.log_sync
    }

    pub fn replicator(&self) -> Option<&Arc<RepositoryReplicator>> {
        self.replicator.as_ref()
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Validate the config and spawn the periodic loops.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReconcileError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            node_id = %self.config.node_id,
            peer = %self.log_sync.peer().describe(),
            mode = ?self.config.log_sync.mode,
            replication = self.replicator.is_some(),
            "Starting reconciliation engine"
        );
        self.set_state(EngineState::Starting);

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid configuration, engine not started");
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        let mut handles = self.handles.write().await;

        let task = Arc::clone(&self.log_sync);
        handles.push(tokio::spawn(task.run(self.shutdown_rx.clone())));
        debug!("Spawned log sync task");

        if let Some(replicator) = &self.replicator {
            let replicator = Arc::clone(replicator);
            handles.push(tokio::spawn(replicator.run(self.shutdown_rx.clone())));
            debug!("Spawned repository replication task");
        }

        handles.push(self.spawn_config_watcher());
        drop(handles);

        self.set_state(EngineState::Running);
        info!("Reconciliation engine running");
        Ok(())
    }

    /// Forward config updates into the running tasks.
    fn spawn_config_watcher(&self) -> JoinHandle<()> {
        let mut config_rx = self.config_rx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let log_sync = Arc::clone(&self.log_sync);
        let replicator = self.replicator.clone();

        tokio::spawn(async move {
            // Only react to updates published after start
            let _ = config_rx.borrow_and_update();
            let _ = shutdown_rx.borrow_and_update();

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    result = config_rx.changed() => {
                        if result.is_err() {
                            debug!("Config channel closed, no further updates");
                            let _ = shutdown_rx.wait_for(|stop| *stop).await;
                            break;
                        }

                        let config = config_rx.borrow_and_update().clone();
                        if let Err(e) = config.validate() {
                            warn!(error = %e, "Ignoring invalid configuration update");
                            continue;
                        }
                        log_sync.reconfigure(config.log_sync.clone()).await;
                        if let Some(replicator) = &replicator {
                            replicator.reconfigure(config.repository.replication.clone()).await;
                        }
                    }
                }
            }
            debug!("Config watcher stopped");
        })
    }

    /// Run one log sync cycle now, outside the schedule.
    ///
    /// Returns skipped stats if a scheduled cycle is in flight.
    pub async fn sync_now(&self) -> Result<SyncStats> {
        match self.state() {
            EngineState::ShuttingDown | EngineState::Stopped => Err(ReconcileError::Shutdown),
            _ => self.log_sync.run_cycle().await,
        }
    }

    /// Health snapshot for monitoring endpoints.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let ready = state == EngineState::Running;
        let consecutive_failures = self.log_sync.consecutive_failures();

        HealthCheck {
            state,
            ready,
            healthy: ready && consecutive_failures == 0,
            node_id: self.config.node_id.clone(),
            peer: self.log_sync.peer().describe(),
            log_sync_enabled: self.log_sync.config().await.enabled,
            consecutive_failures,
            millis_since_success: self.log_sync.millis_since_success(),
            config_revision: self.log_sync.revision(),
            replication_attached: self.replicator.is_some(),
        }
    }

    /// Stop the loops, waiting up to a drain timeout for them together.
    pub async fn shutdown(&mut self) {
        info!("Shutting down reconciliation engine");
        self.set_state(EngineState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to finish in-flight cycles");
        }

        let results = futures::future::join_all(
            handles
                .into_iter()
                .map(|handle| tokio::time::timeout(DRAIN_TIMEOUT, handle)),
        )
        .await;

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed gracefully"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Task timed out during shutdown"),
            }
        }

        self.set_state(EngineState::Stopped);
        info!("Reconciliation engine stopped");
    }
}
