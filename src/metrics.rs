//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Log sync cycles (outcome, duration, events moved)
//! - Per-log failures
//! - Peer request latency
//! - Repository commits, conflicts and replication
//! - Local store retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `reconcile_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use reconciliation_engine::metrics;
//! use std::time::Duration;
//!
//! metrics::record_events_sent(42);
//! metrics::record_sync_cycle("success", Duration::from_millis(120));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Log Sync Metrics
// =============================================================================

/// Record a completed (or aborted) sync cycle.
pub fn record_sync_cycle(outcome: &str, duration: Duration) {
    counter!("reconcile_sync_cycles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("reconcile_sync_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a sync cycle that did not run.
pub fn record_sync_skipped(reason: &str) {
    counter!("reconcile_sync_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record events streamed to the peer.
pub fn record_events_sent(count: usize) {
    counter!("reconcile_events_sent_total").increment(count as u64);
}

/// Record events fetched from the peer and appended locally.
pub fn record_events_received(count: usize) {
    counter!("reconcile_events_received_total").increment(count as u64);
}

/// Record events accepted by the receiving endpoint.
pub fn record_events_accepted(count: usize) {
    counter!("reconcile_endpoint_events_accepted_total").increment(count as u64);
}

/// Record a log whose reconciliation failed within a cycle.
pub fn record_log_failure(error_kind: &str) {
    counter!("reconcile_log_failures_total", "error_type" => error_kind.to_string()).increment(1);
}

/// Record peer request latency by operation type (query, receive, send).
pub fn record_peer_request(operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "reconcile_peer_requests_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "reconcile_peer_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Gauge for consecutive failed cycles (drives backoff).
pub fn set_consecutive_failures(task: &str, count: u32) {
    gauge!("reconcile_consecutive_failures", "task" => task.to_string()).set(count as f64);
}

// =============================================================================
// Repository Metrics
// =============================================================================

/// Record a commit attempt: `committed` or `conflict`.
pub fn record_repository_commit(outcome: &str) {
    counter!("reconcile_repository_commits_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an explicit-version put.
pub fn record_repository_put(accepted: bool) {
    let outcome = if accepted { "stored" } else { "exists" };
    counter!("reconcile_repository_puts_total", "outcome" => outcome).increment(1);
}

/// Record a replication cycle.
pub fn record_replication_cycle(versions_copied: usize, duration: Duration) {
    counter!("reconcile_replication_cycles_total").increment(1);
    counter!("reconcile_replicated_versions_total").increment(versions_copied as u64);
    histogram!("reconcile_replication_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Gauge for how many versions a replica still lacks.
pub fn set_replication_backlog(missing: u64) {
    gauge!("reconcile_replication_backlog_versions").set(missing as f64);
}

/// Record a cached repository operation.
pub fn record_cache_operation(operation: &str) {
    counter!("reconcile_cache_operations_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Store / Engine Metrics
// =============================================================================

/// Record SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_store_retry(operation: &str) {
    counter!("reconcile_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("reconcile_engine_state").set(value);
}
