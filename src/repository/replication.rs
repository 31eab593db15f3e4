// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica-side mirroring of a master repository.
//!
//! # Cycle
//!
//! ```text
//! master.range()  ─┐
//!                  ├─► missing(replica, master) ─► for v ascending: get(v) ─► replica.put(v)
//! replica.range() ─┘
//! ```
//!
//! Versions are copied with their master numbers, so a replica can hold gaps
//! while it catches up. Any failure aborts the cycle; the next cycle starts
//! again from whatever is still missing. A version that vanished from the
//! master between `range` and `get` is skipped and retried next cycle.

use super::Repository;
use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::metrics;
use crate::range::RangeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn, Instrument};

/// Statistics from one replication cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Versions the replica lacked at the start of the cycle
    pub missing: u64,
    /// Versions copied this cycle
    pub copied: usize,
    /// Versions the replica already had by the time `put` ran
    pub already_present: usize,
    pub skipped: bool,
}

/// Keeps a replica repository level with a master.
pub struct RepositoryReplicator {
    master: Arc<dyn Repository>,
    replica: Arc<dyn Repository>,
    config: RwLock<ReplicationConfig>,
    revision: AtomicU64,
    in_flight: Mutex<()>,
}

impl RepositoryReplicator {
    pub fn new(
        master: Arc<dyn Repository>,
        replica: Arc<dyn Repository>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            master,
            replica,
            config: RwLock::new(config),
            revision: AtomicU64::new(0),
            in_flight: Mutex::new(()),
        }
    }

    pub async fn config(&self) -> ReplicationConfig {
        self.config.read().await.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub async fn reconfigure(&self, config: ReplicationConfig) {
        let mut current = self.config.write().await;
        if *current == config {
            return;
        }
        *current = config;
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            revision,
            enabled = current.enabled,
            interval = %current.interval,
            "Repository replication reconfigured"
        );
    }

    /// Copy up to `max_versions_per_cycle` missing versions now.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> Result<ReplicationStats> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Replication cycle already in flight, skipping");
            return Ok(ReplicationStats {
                skipped: true,
                ..Default::default()
            });
        };

        let limit = self.config.read().await.max_versions_per_cycle.max(1);
        let start = Instant::now();

        let master_range = self.master.range().await?;
        let replica_range = self.replica.range().await?;
        let missing = RangeSet::missing(&replica_range, &master_range);

        let mut stats = ReplicationStats {
            missing: missing.len(),
            ..Default::default()
        };

        for version in missing.iter().take(limit) {
            let Some(data) = self.master.get(version).await? else {
                debug!(version, "Version disappeared from master, skipping");
                continue;
            };
            if self.replica.put(data, version).await? {
                stats.copied += 1;
            } else {
                stats.already_present += 1;
            }
        }

        let backlog = stats
            .missing
            .saturating_sub((stats.copied + stats.already_present) as u64);
        metrics::record_replication_cycle(stats.copied, start.elapsed());
        metrics::set_replication_backlog(backlog);

        if stats.copied > 0 {
            info!(
                copied = stats.copied,
                backlog,
                master_high = master_range.high(),
                "Replicated repository versions"
            );
        } else {
            debug!(master_high = master_range.high(), "Replica up to date");
        }
        Ok(stats)
    }

    /// Periodic loop until `shutdown_rx` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let span = tracing::info_span!("repository_replication");

        async move {
            let _ = shutdown_rx.borrow_and_update();

            let mut interval = self.config().await.interval_duration();
            info!(interval_ms = interval.as_millis(), "Starting repository replication");

            let mut timer = tokio::time::interval_at(Instant::now(), interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping repository replication");
                            break;
                        }
                        continue;
                    }

                    _ = timer.tick() => {}
                }

                let config = self.config().await;
                let wanted = config.interval_duration();
                if wanted != interval {
                    interval = wanted;
                    timer = tokio::time::interval_at(Instant::now() + interval, interval);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                }
                if !config.enabled {
                    continue;
                }

                if let Err(e) = self.run_cycle().await {
                    if e.is_retryable() {
                        warn!(error = %e, "Replication cycle aborted, master unavailable");
                    } else {
                        warn!(error = %e, kind = e.kind(), "Replication cycle failed");
                    }
                }
            }

            info!("Repository replication stopped");
        }
        .instrument(span)
        .await
    }
}
