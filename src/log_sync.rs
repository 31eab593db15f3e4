// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log sync: move exactly the missing audit events between two sides.
//!
//! Each cycle is stateless: everything it needs is recomputed from the local
//! store and the peer's descriptors, so a cycle that dies half way is simply
//! repeated next interval.
//!
//! # Push (per local log)
//!
//! 1. `highest = store.highest_id(log)`; skip the log if 0
//! 2. `local = [1, highest]`
//! 3. `remote = peer.query(owner, log)`
//! 4. `delta = missing(remote.ranges, local)`, bounded to `[1, highest]`
//! 5. Stream the events in `delta`, ascending, into the cycle's upload,
//!    paging through the store by events held so gaps cost nothing
//! 6. After the last log, finish the upload
//!
//! The upload is opened lazily and shared by every log in the cycle. It is
//! always finished, also when the cycle fails part way: events already
//! written are valid and the receiver upserts by identity.
//!
//! # Pull
//!
//! `peer.query_all(owner)`, then per log `missing(local, remote)` is fetched
//! with `peer.receive` in `batch_size` windows and appended locally. At most
//! `max_pull_windows` requests go out per log and cycle; the rest of the
//! delta is picked up by later cycles.
//!
//! # Failures
//!
//! | Error | Effect |
//! |-------|--------|
//! | Retryable (peer away) | Whole cycle aborted, backoff before the next one |
//! | Other, `isolate_log_failures = true` | Logged, counted, next log continues |
//! | Other, `isolate_log_failures = false` | Whole cycle aborted |
//!
//! # Single Flight
//!
//! A cycle holds the task's in-flight lock. An overlapping call (a manual
//! trigger racing the timer, say) returns [`SyncStats::skipped()`] instead of
//! running concurrently.

use crate::config::LogSyncConfig;
use crate::descriptor::Descriptor;
use crate::discovery::Identification;
use crate::error::{ReconcileError, Result};
use crate::log_store::LogStore;
use crate::metrics;
use crate::peer::{EventUpload, LogPeer};
use crate::range::{Range, RangeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Statistics from one sync cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Logs compared with the peer (per direction)
    pub logs_checked: usize,
    /// Logs where nothing had to move
    pub logs_in_sync: usize,
    /// Logs that failed and were skipped
    pub logs_failed: usize,
    /// Events written to the peer
    pub events_sent: usize,
    /// Events fetched from the peer and stored locally
    pub events_received: usize,
    /// The cycle did not run because another one was in flight
    pub skipped: bool,
}

impl SyncStats {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Whether any event moved in either direction.
    pub fn moved_events(&self) -> bool {
        self.events_sent > 0 || self.events_received > 0
    }
}

fn epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Inclusive `(low, high)` windows of at most `size` IDs covering a range
/// set, produced lazily so a huge set never materialises.
struct Windows<'a> {
    ranges: std::slice::Iter<'a, Range>,
    pending: Option<(i64, i64)>,
    span: i64,
}

fn windows(ranges: &RangeSet, size: usize) -> Windows<'_> {
    Windows {
        ranges: ranges.ranges().iter(),
        pending: None,
        span: i64::try_from(size.max(1)).unwrap_or(i64::MAX),
    }
}

impl Iterator for Windows<'_> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        let (low, end) = match self.pending.take() {
            Some(rest) => rest,
            None => {
                let range = self.ranges.next()?;
                (range.low(), range.high())
            }
        };
        let high = low.saturating_add(self.span - 1).min(end);
        if high < end {
            self.pending = Some((high + 1, end));
        }
        Some((low, high))
    }
}

fn check_descriptor(descriptor: &Descriptor, owner_id: &str, log_id: i64) -> Result<()> {
    if descriptor.owner_id != owner_id || descriptor.log_id != log_id {
        return Err(ReconcileError::protocol(
            log_id,
            format!(
                "asked for log {} of '{}', peer described log {} of '{}'",
                log_id, owner_id, descriptor.log_id, descriptor.owner_id
            ),
        ));
    }
    Ok(())
}

fn new_timer(start: Instant, period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(start, period);
    // Skip missed ticks instead of bursting to catch up
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Periodic reconciliation of one node's logs against one peer.
pub struct LogSyncTask<S: LogStore, P: LogPeer> {
    store: Arc<S>,
    peer: Arc<P>,
    identity: Arc<dyn Identification>,
    config: RwLock<LogSyncConfig>,
    /// Bumped on every applied reconfiguration
    revision: AtomicU64,
    in_flight: Mutex<()>,
    consecutive_failures: AtomicU32,
    /// Epoch millis of the last successful cycle, 0 = never
    last_success: AtomicU64,
}

impl<S: LogStore, P: LogPeer> LogSyncTask<S, P> {
    pub fn new(
        store: Arc<S>,
        peer: Arc<P>,
        identity: Arc<dyn Identification>,
        config: LogSyncConfig,
    ) -> Self {
        Self {
            store,
            peer,
            identity,
            config: RwLock::new(config),
            revision: AtomicU64::new(0),
            in_flight: Mutex::new(()),
            consecutive_failures: AtomicU32::new(0),
            last_success: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn peer(&self) -> &Arc<P> {
        &self.peer
    }

    /// Snapshot of the active configuration.
    pub async fn config(&self) -> LogSyncConfig {
        self.config.read().await.clone()
    }

    /// Number of reconfigurations applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Replace the configuration. Takes effect from the next cycle; a cycle
    /// already running finishes with the settings it started with.
    pub async fn reconfigure(&self, config: LogSyncConfig) {
        let mut current = self.config.write().await;
        if *current == config {
            return;
        }
        *current = config;
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            revision,
            mode = ?current.mode,
            interval = %current.interval,
            enabled = current.enabled,
            "Log sync reconfigured"
        );
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Milliseconds since the last successful cycle (`u64::MAX` if never).
    pub fn millis_since_success(&self) -> u64 {
        let last = self.last_success.load(Ordering::Acquire);
        if last == 0 {
            return u64::MAX;
        }
        epoch_millis().saturating_sub(last)
    }

    /// Run one cycle now.
    pub async fn run_cycle(&self) -> Result<SyncStats> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Log sync cycle already in flight, skipping");
            metrics::record_sync_skipped("in_flight");
            return Ok(SyncStats::skipped());
        };

        let config = self.config().await;
        let owner_id = self.identity.node_id();
        let start = Instant::now();

        let result = self.reconcile(&owner_id, &config).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(stats) => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.last_success.store(epoch_millis(), Ordering::Release);
                metrics::record_sync_cycle("success", elapsed);

                if stats.moved_events() || stats.logs_failed > 0 {
                    info!(
                        logs_checked = stats.logs_checked,
                        logs_failed = stats.logs_failed,
                        events_sent = stats.events_sent,
                        events_received = stats.events_received,
                        duration_ms = elapsed.as_millis(),
                        "Log sync cycle complete"
                    );
                } else {
                    debug!(
                        logs_checked = stats.logs_checked,
                        "Log sync cycle complete, all in sync"
                    );
                }
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if e.is_retryable() {
                    metrics::record_sync_cycle("transient_failure", elapsed);
                    warn!(
                        peer = %self.peer.describe(),
                        failures,
                        error = %e,
                        "Log sync cycle aborted, peer unavailable"
                    );
                } else {
                    metrics::record_sync_cycle("failure", elapsed);
                    error!(
                        peer = %self.peer.describe(),
                        failures,
                        error = %e,
                        "Log sync cycle failed"
                    );
                }
            }
        }
        metrics::set_consecutive_failures("log_sync", self.consecutive_failures());

        result
    }

    #[instrument(skip_all, fields(owner = %owner_id, mode = ?config.mode))]
    async fn reconcile(&self, owner_id: &str, config: &LogSyncConfig) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        if config.mode.pushes() {
            self.push(owner_id, config, &mut stats).await?;
        }
        if config.mode.pulls() {
            self.pull(owner_id, config, &mut stats).await?;
        }
        Ok(stats)
    }

    /// A failed log either aborts the cycle (returned) or is absorbed.
    fn absorb_log_failure(
        &self,
        log_id: i64,
        e: ReconcileError,
        config: &LogSyncConfig,
        stats: &mut SyncStats,
    ) -> Result<()> {
        if e.is_retryable() || !config.isolate_log_failures {
            return Err(e);
        }
        error!(log_id, error = %e, "Log reconciliation failed, continuing with remaining logs");
        metrics::record_log_failure(e.kind());
        stats.logs_failed += 1;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    async fn push(&self, owner_id: &str, config: &LogSyncConfig, stats: &mut SyncStats) -> Result<()> {
        let log_ids = self.store.list_log_ids(owner_id).await?;
        let mut upload: Option<Box<dyn EventUpload>> = None;

        let result = self
            .push_logs(owner_id, &log_ids, config, &mut upload, stats)
            .await;

        // The upload is closed whatever happened above
        let finished = match upload {
            Some(upload) => upload.finish().await.map(Some),
            None => Ok(None),
        };

        match (result, finished) {
            (Ok(()), Ok(written)) => {
                if let Some(written) = written {
                    metrics::record_events_sent(written);
                }
                Ok(())
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(close_error)) => {
                debug!(error = %close_error, "Closing upload also failed");
                Err(e)
            }
        }
    }

    async fn push_logs(
        &self,
        owner_id: &str,
        log_ids: &[i64],
        config: &LogSyncConfig,
        upload: &mut Option<Box<dyn EventUpload>>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        for &log_id in log_ids {
            let delta = match self.push_delta(owner_id, log_id).await {
                Ok(Some(delta)) => delta,
                Ok(None) => continue,
                Err(e) => {
                    self.absorb_log_failure(log_id, e, config, stats)?;
                    continue;
                }
            };

            stats.logs_checked += 1;
            if delta.is_empty() {
                stats.logs_in_sync += 1;
                continue;
            }

            // Failures past this point leave the shared upload unusable
            let sink = match upload.take() {
                Some(sink) => sink,
                None => self.peer.open_upload().await?,
            };
            let sink = upload.insert(sink);
            let sent = self
                .stream_delta(owner_id, log_id, &delta, config.batch_size, &mut **sink)
                .await?;

            debug!(log_id, delta = %delta, sent, "Pushed log delta");
            stats.events_sent += sent;
        }
        Ok(())
    }

    /// What the peer lacks of this log, or `None` if nothing is held locally.
    async fn push_delta(&self, owner_id: &str, log_id: i64) -> Result<Option<RangeSet>> {
        let highest = self.store.highest_id(owner_id, log_id).await?;
        if highest <= 0 {
            return Ok(None);
        }
        let local = RangeSet::from(Range::new(1, highest)?);

        let remote = self.peer.query(owner_id, log_id).await?;
        check_descriptor(&remote, owner_id, log_id)?;

        let delta = RangeSet::missing(&remote.ranges, &local).bounded(1, highest);
        debug!(
            log_id,
            local = %local,
            remote = %remote.ranges,
            delta = %delta,
            "Computed push delta"
        );
        Ok(Some(delta))
    }

    /// Stream the held events inside `delta`, paging by events rather than
    /// by ID so sparse logs cost what they hold.
    async fn stream_delta(
        &self,
        owner_id: &str,
        log_id: i64,
        delta: &RangeSet,
        batch_size: usize,
        upload: &mut dyn EventUpload,
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let mut sent = 0;
        for range in delta.range_iter() {
            let mut from = range.low();
            loop {
                let page = self
                    .store
                    .get_page(owner_id, log_id, from, range.high(), batch_size)
                    .await?;
                let Some(last) = page.last().map(|e| e.id) else {
                    break;
                };
                for event in &page {
                    upload.write_event(event).await?;
                }
                sent += page.len();
                if page.len() < batch_size || last >= range.high() {
                    break;
                }
                from = last + 1;
            }
        }
        Ok(sent)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    async fn pull(&self, owner_id: &str, config: &LogSyncConfig, stats: &mut SyncStats) -> Result<()> {
        let remote_logs = self.peer.query_all(owner_id).await?;

        for remote in &remote_logs {
            match self
                .pull_log(owner_id, remote, config.batch_size, config.max_pull_windows)
                .await
            {
                Ok(received) => {
                    stats.logs_checked += 1;
                    if received == 0 {
                        stats.logs_in_sync += 1;
                    }
                    stats.events_received += received;
                }
                Err(e) => self.absorb_log_failure(remote.log_id, e, config, stats)?,
            }
        }

        metrics::record_events_received(stats.events_received);
        Ok(())
    }

    async fn pull_log(
        &self,
        owner_id: &str,
        remote: &Descriptor,
        batch_size: usize,
        max_windows: usize,
    ) -> Result<usize> {
        let log_id = remote.log_id;
        check_descriptor(remote, owner_id, log_id)?;

        let local = self.store.descriptor(owner_id, log_id).await?;
        let delta = RangeSet::missing(&local.ranges, &remote.ranges);
        if delta.is_empty() {
            return Ok(0);
        }

        let mut received = 0;
        let mut plan = windows(&delta, batch_size);
        for (low, high) in plan.by_ref().take(max_windows) {
            let wanted = RangeSet::from(Range::new(low, high)?);
            let events = self.peer.receive(owner_id, log_id, &wanted).await?;

            if let Some(stray) = events
                .iter()
                .find(|e| e.owner_id != owner_id || e.log_id != log_id || !wanted.contains(e.id))
            {
                return Err(ReconcileError::protocol(
                    log_id,
                    format!("peer sent event {} outside requested range {}", stray.id, wanted),
                ));
            }
            received += self.store.append(events).await?;
        }

        if let Some((next, _)) = plan.next() {
            debug!(log_id, max_windows, next, "Pull window limit reached, rest follows next cycle");
        }
        debug!(log_id, delta = %delta, received, "Pulled log delta");
        Ok(received)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Periodic loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Run cycles on the configured interval until shutdown is signaled.
    ///
    /// The first cycle runs immediately. Interval changes made through
    /// [`reconfigure`](Self::reconfigure) are picked up at the next tick.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let span = tracing::info_span!("log_sync");

        async move {
            // Mark initial shutdown value as seen so changed() only fires on actual changes
            let _ = shutdown_rx.borrow_and_update();

            let mut interval = self.config().await.interval_duration();
            info!(
                interval_ms = interval.as_millis(),
                peer = %self.peer.describe(),
                "Starting log sync task"
            );

            let mut timer = new_timer(Instant::now(), interval);
            let mut backoff_until: Option<Instant> = None;

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping log sync task");
                            break;
                        }
                        continue;
                    }

                    _ = timer.tick() => {}
                }

                let config = self.config().await;
                let wanted = config.interval_duration();
                if wanted != interval {
                    info!(
                        old_ms = interval.as_millis(),
                        new_ms = wanted.as_millis(),
                        "Log sync interval changed"
                    );
                    interval = wanted;
                    timer = new_timer(Instant::now() + interval, interval);
                }

                if !config.enabled {
                    metrics::record_sync_skipped("disabled");
                    continue;
                }

                if let Some(until) = backoff_until {
                    if Instant::now() < until {
                        debug!(
                            remaining_ms = (until - Instant::now()).as_millis(),
                            "Log sync in backoff, skipping cycle"
                        );
                        metrics::record_sync_skipped("backoff");
                        continue;
                    }
                }

                backoff_until = match self.run_cycle().await {
                    Err(e) if e.is_retryable() => {
                        let backoff = config.backoff_for_failures(self.consecutive_failures());
                        Some(Instant::now() + backoff)
                    }
                    _ => None,
                };
            }

            info!("Log sync task stopped");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticIdentity;
    use crate::endpoint::LoopbackPeer;
    use crate::event::Event;
    use crate::log_store::MemoryLogStore;

    type Task = LogSyncTask<MemoryLogStore, LoopbackPeer<MemoryLogStore>>;

    fn event(owner: &str, log_id: i64, id: i64) -> Event {
        Event::new(owner, log_id, id, 1).with_timestamp(id * 100)
    }

    async fn setup(local: Vec<Event>, remote: Vec<Event>, config: LogSyncConfig) -> (Arc<Task>, Arc<MemoryLogStore>) {
        let local_store = Arc::new(MemoryLogStore::new());
        local_store.append(local).await.unwrap();
        let remote_store = Arc::new(MemoryLogStore::new());
        remote_store.append(remote).await.unwrap();

        let peer = Arc::new(LoopbackPeer::for_store(Arc::clone(&remote_store)));
        let task = LogSyncTask::new(local_store, peer, Arc::new(StaticIdentity::new("gw-1")), config);
        (Arc::new(task), remote_store)
    }

    #[test]
    fn test_windows() {
        let set: RangeSet = "1-10,15".parse().unwrap();
        assert_eq!(windows(&set, 4).collect::<Vec<_>>(), vec![(1, 4), (5, 8), (9, 10), (15, 15)]);
        assert_eq!(windows(&set, 100).collect::<Vec<_>>(), vec![(1, 10), (15, 15)]);
        assert_eq!(windows(&RangeSet::new(), 3).count(), 0);

        let top: RangeSet = format!("{}-{}", i64::MAX - 2, i64::MAX).parse().unwrap();
        assert_eq!(
            windows(&top, 2).collect::<Vec<_>>(),
            vec![(i64::MAX - 2, i64::MAX - 1), (i64::MAX, i64::MAX)]
        );
    }

    #[test]
    fn test_windows_are_lazy_over_huge_sets() {
        let huge: RangeSet = format!("1-{}", i64::MAX).parse().unwrap();
        let first: Vec<_> = windows(&huge, 500).take(3).collect();
        assert_eq!(first, vec![(1, 500), (501, 1000), (1001, 1500)]);
    }

    #[test]
    fn test_check_descriptor() {
        let ok: Descriptor = "gw-1,2,1-3".parse().unwrap();
        assert!(check_descriptor(&ok, "gw-1", 2).is_ok());
        assert!(check_descriptor(&ok, "gw-1", 3).is_err());
        assert!(check_descriptor(&ok, "gw-2", 2).is_err());
    }

    #[tokio::test]
    async fn test_push_sends_only_missing_events() {
        let local = (1..=10).map(|id| event("gw-1", 1, id)).collect();
        let remote = (1..=5).map(|id| event("gw-1", 1, id)).collect();
        let (task, remote_store) = setup(local, remote, LogSyncConfig::for_testing()).await;

        let stats = task.run_cycle().await.unwrap();
        assert_eq!(stats.events_sent, 5);
        assert_eq!(stats.logs_checked, 1);
        assert_eq!(remote_store.len().await, 10);

        // Second cycle finds nothing to do
        let stats = task.run_cycle().await.unwrap();
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.logs_in_sync, 1);
        assert_eq!(task.consecutive_failures(), 0);
        assert!(task.millis_since_success() < u64::MAX);
    }

    #[tokio::test]
    async fn test_push_fills_remote_gaps() {
        let local = (1..=6).map(|id| event("gw-1", 1, id)).collect();
        let remote = vec![event("gw-1", 1, 1), event("gw-1", 1, 4)];
        let (task, remote_store) = setup(local, remote, LogSyncConfig::for_testing()).await;

        let stats = task.run_cycle().await.unwrap();
        assert_eq!(stats.events_sent, 4);
        assert_eq!(remote_store.descriptor("gw-1", 1).await.unwrap().ranges.to_string(), "1-6");
    }

    #[tokio::test]
    async fn test_pull_fetches_missing_events() {
        let local = vec![event("gw-1", 1, 1)];
        let remote = (1..=9)
            .map(|id| event("gw-1", 1, id))
            .chain([event("gw-1", 2, 1), event("other", 1, 1)])
            .collect();
        let config = LogSyncConfig {
            mode: crate::config::LogSyncMode::Pull,
            ..LogSyncConfig::for_testing()
        };
        let (task, _remote) = setup(local, remote, config).await;

        let stats = task.run_cycle().await.unwrap();
        assert_eq!(stats.events_received, 9);
        assert_eq!(stats.events_sent, 0);
        assert_eq!(task.store().highest_id("gw-1", 1).await.unwrap(), 9);
        assert_eq!(task.store().highest_id("gw-1", 2).await.unwrap(), 1);
        // Other owners' logs are never pulled
        assert_eq!(task.store().highest_id("other", 1).await.unwrap(), 0);
    }

    /// Memory store that counts paged reads.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryLogStore,
        pages: AtomicU64,
    }

    impl LogStore for CountingStore {
        fn highest_id(&self, owner_id: &str, log_id: i64) -> crate::BoxFuture<'_, i64> {
            self.inner.highest_id(owner_id, log_id)
        }

        fn get(&self, owner_id: &str, log_id: i64, from_id: i64, to_id: i64) -> crate::BoxFuture<'_, Vec<Event>> {
            self.inner.get(owner_id, log_id, from_id, to_id)
        }

        fn get_page(
            &self,
            owner_id: &str,
            log_id: i64,
            from_id: i64,
            to_id: i64,
            limit: usize,
        ) -> crate::BoxFuture<'_, Vec<Event>> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.inner.get_page(owner_id, log_id, from_id, to_id, limit)
        }

        fn list_log_ids(&self, owner_id: &str) -> crate::BoxFuture<'_, Vec<i64>> {
            self.inner.list_log_ids(owner_id)
        }

        fn list_owners(&self) -> crate::BoxFuture<'_, Vec<String>> {
            self.inner.list_owners()
        }

        fn append(&self, events: Vec<Event>) -> crate::BoxFuture<'_, usize> {
            self.inner.append(events)
        }
    }

    /// Peer claiming to hold every ID of log 1 while holding only a few.
    struct BoastingPeer {
        held: Vec<Event>,
        receives: AtomicU64,
    }

    impl LogPeer for BoastingPeer {
        fn describe(&self) -> String {
            "boasting".to_string()
        }

        fn query(&self, owner_id: &str, log_id: i64) -> crate::BoxFuture<'_, Descriptor> {
            let owner_id = owner_id.to_string();
            Box::pin(async move { Ok(Descriptor::empty(owner_id, log_id)) })
        }

        fn query_all(&self, owner_id: &str) -> crate::BoxFuture<'_, Vec<Descriptor>> {
            let line = format!("{},1,1-{}", owner_id, i64::MAX);
            Box::pin(async move { Ok(vec![line.parse::<Descriptor>()?]) })
        }

        fn receive(&self, _owner_id: &str, _log_id: i64, ranges: &RangeSet) -> crate::BoxFuture<'_, Vec<Event>> {
            let ranges = ranges.clone();
            Box::pin(async move {
                self.receives.fetch_add(1, Ordering::SeqCst);
                Ok(self.held.iter().filter(|e| ranges.contains(e.id)).cloned().collect())
            })
        }

        fn open_upload(&self) -> crate::BoxFuture<'_, Box<dyn EventUpload>> {
            Box::pin(async { Err(ReconcileError::Internal("read-only peer".into())) })
        }
    }

    #[tokio::test]
    async fn test_push_of_sparse_log_pages_by_events_held() {
        let store = Arc::new(CountingStore::default());
        store
            .append(vec![event("gw-1", 1, 1), event("gw-1", 1, 2_000_000)])
            .await
            .unwrap();
        let remote_store = Arc::new(MemoryLogStore::new());
        let peer = Arc::new(LoopbackPeer::for_store(Arc::clone(&remote_store)));
        let task = LogSyncTask::new(
            Arc::clone(&store),
            peer,
            Arc::new(StaticIdentity::new("gw-1")),
            LogSyncConfig::for_testing(),
        );

        let stats = tokio::time::timeout(Duration::from_secs(5), task.run_cycle())
            .await
            .expect("sparse push took too long")
            .unwrap();
        assert_eq!(stats.events_sent, 2);
        assert_eq!(remote_store.descriptor("gw-1", 1).await.unwrap().ranges.to_string(), "1,2000000");
        assert!(store.pages.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pull_against_unbounded_descriptor_is_capped() {
        let peer = Arc::new(BoastingPeer {
            held: vec![event("gw-1", 1, 2), event("gw-1", 1, 7)],
            receives: AtomicU64::new(0),
        });
        let local_store = Arc::new(MemoryLogStore::new());
        let config = LogSyncConfig {
            mode: crate::config::LogSyncMode::Pull,
            max_pull_windows: 8,
            ..LogSyncConfig::for_testing()
        };
        let task = LogSyncTask::new(
            Arc::clone(&local_store),
            Arc::clone(&peer),
            Arc::new(StaticIdentity::new("gw-1")),
            config,
        );

        let stats = tokio::time::timeout(Duration::from_secs(5), task.run_cycle())
            .await
            .expect("pull did not stop at the window limit")
            .unwrap();
        assert_eq!(peer.receives.load(Ordering::SeqCst), 8);
        assert_eq!(stats.events_received, 2);
        assert_eq!(local_store.descriptor("gw-1", 1).await.unwrap().ranges.to_string(), "2,7");
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let (task, _remote) = setup(vec![], vec![], LogSyncConfig::for_testing()).await;

        let _held = task.in_flight.lock().await;
        let stats = task.run_cycle().await.unwrap();
        assert!(stats.skipped);
    }

    #[tokio::test]
    async fn test_reconfigure_bumps_revision_only_on_change() {
        let (task, _remote) = setup(vec![], vec![], LogSyncConfig::for_testing()).await;
        assert_eq!(task.revision(), 0);

        task.reconfigure(LogSyncConfig::for_testing()).await;
        assert_eq!(task.revision(), 0);

        let changed = LogSyncConfig {
            interval: "5s".to_string(),
            ..LogSyncConfig::for_testing()
        };
        task.reconfigure(changed.clone()).await;
        assert_eq!(task.revision(), 1);
        assert_eq!(task.config().await, changed);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let local = (1..=3).map(|id| event("gw-1", 1, id)).collect();
        let (task, remote_store) = setup(local, vec![], LogSyncConfig::for_testing()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&task).run(shutdown_rx));

        // The first tick fires immediately
        for _ in 0..50 {
            if remote_store.len().await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remote_store.len().await, 3);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("log sync loop did not stop")
            .unwrap();
    }
}
