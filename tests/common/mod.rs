//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Event and store helpers
//! - [`ScriptedPeer`]: a loopback peer that records what it was sent and
//!   can be told to go offline, break individual logs or cut uploads short
//! - Log capture through `tracing-subscriber`
//! - [`server::TestServer`]: the log and repository endpoints over real HTTP

#![allow(dead_code)] // Each test binary uses a different subset

pub mod server;

use reconciliation_engine::{
    BoxFuture, Descriptor, Event, EventUpload, LogPeer, LogStore, LoopbackPeer, MemoryLogStore,
    RangeSet, ReconcileError, StaticIdentity,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Owner ID used unless a test needs something special.
pub const OWNER: &str = "gw-1";

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Event with a deterministic timestamp derived from its ID.
pub fn event(owner: &str, log_id: i64, id: i64) -> Event {
    Event::new(owner, log_id, id, 2001)
        .with_timestamp(1_700_000_000_000 + id)
        .with_property("seq", id.to_string())
}

/// Events `ids` of one log.
pub fn events(owner: &str, log_id: i64, ids: impl IntoIterator<Item = i64>) -> Vec<Event> {
    ids.into_iter().map(|id| event(owner, log_id, id)).collect()
}

/// Memory store pre-filled with `events`.
pub async fn store_with(events: Vec<Event>) -> Arc<MemoryLogStore> {
    let store = Arc::new(MemoryLogStore::new());
    store.append(events).await.unwrap();
    store
}

pub fn identity(owner: &str) -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity::new(owner))
}

/// Loopback peer with fault injection and a record of every event sent.
pub struct ScriptedPeer {
    inner: LoopbackPeer<MemoryLogStore>,
    sent: Arc<Mutex<Vec<Event>>>,
    queries: AtomicUsize,
    uploads: AtomicUsize,
    offline: AtomicBool,
    broken_logs: Mutex<HashSet<i64>>,
    /// Events each upload accepts before the connection "resets"
    upload_limit: AtomicUsize,
}

impl ScriptedPeer {
    pub fn new(remote: Arc<MemoryLogStore>) -> Self {
        Self {
            inner: LoopbackPeer::for_store(remote).with_name("scripted"),
            sent: Arc::new(Mutex::new(Vec::new())),
            queries: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            broken_logs: Mutex::new(HashSet::new()),
            upload_limit: AtomicUsize::new(usize::MAX),
        }
    }

    /// Every event written to an upload, in order.
    pub fn sent(&self) -> Vec<Event> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_ids(&self, log_id: i64) -> Vec<i64> {
        self.sent()
            .iter()
            .filter(|e| e.log_id == log_id)
            .map(|e| e.id)
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Answer queries for `log_id` with garbage.
    pub fn break_log(&self, log_id: i64) {
        self.broken_logs.lock().unwrap().insert(log_id);
    }

    pub fn repair_log(&self, log_id: i64) {
        self.broken_logs.lock().unwrap().remove(&log_id);
    }

    pub fn limit_uploads(&self, events: usize) {
        self.upload_limit.store(events, Ordering::SeqCst);
    }

    fn check_online(&self) -> reconciliation_engine::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ReconcileError::PeerConnection {
                peer: "scripted".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn check_log(&self, log_id: i64) -> reconciliation_engine::Result<()> {
        if self.broken_logs.lock().unwrap().contains(&log_id) {
            return Err(ReconcileError::protocol(log_id, "malformed descriptor line"));
        }
        Ok(())
    }
}

impl LogPeer for ScriptedPeer {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn query(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.check_online()?;
            self.check_log(log_id)?;
            self.inner.query(&owner_id, log_id).await
        })
    }

    fn query_all(&self, owner_id: &str) -> BoxFuture<'_, Vec<Descriptor>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.check_online()?;
            self.inner.query_all(&owner_id).await
        })
    }

    fn receive(&self, owner_id: &str, log_id: i64, ranges: &RangeSet) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        let ranges = ranges.clone();
        Box::pin(async move {
            self.check_online()?;
            self.check_log(log_id)?;
            self.inner.receive(&owner_id, log_id, &ranges).await
        })
    }

    fn open_upload(&self) -> BoxFuture<'_, Box<dyn EventUpload>> {
        Box::pin(async move {
            self.check_online()?;
            self.uploads.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.open_upload().await?;
            let upload: Box<dyn EventUpload> = Box::new(ScriptedUpload {
                inner,
                sent: Arc::clone(&self.sent),
                remaining: self.upload_limit.load(Ordering::SeqCst),
            });
            Ok(upload)
        })
    }
}

struct ScriptedUpload {
    inner: Box<dyn EventUpload>,
    sent: Arc<Mutex<Vec<Event>>>,
    remaining: usize,
}

impl EventUpload for ScriptedUpload {
    fn write_event<'a>(&'a mut self, event: &'a Event) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.remaining == 0 {
                return Err(ReconcileError::PeerConnection {
                    peer: "scripted".to_string(),
                    message: "connection reset by peer".to_string(),
                });
            }
            self.remaining -= 1;
            self.inner.write_event(event).await?;
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, usize> {
        self.inner.finish()
    }
}

/// Peer whose every request fails as unreachable.
pub struct UnreachablePeer;

impl UnreachablePeer {
    fn refused() -> ReconcileError {
        ReconcileError::PeerConnection {
            peer: "unreachable".to_string(),
            message: "connection refused".to_string(),
        }
    }
}

impl LogPeer for UnreachablePeer {
    fn describe(&self) -> String {
        "unreachable".to_string()
    }

    fn query(&self, _owner_id: &str, _log_id: i64) -> BoxFuture<'_, Descriptor> {
        Box::pin(async { Err(Self::refused()) })
    }

    fn query_all(&self, _owner_id: &str) -> BoxFuture<'_, Vec<Descriptor>> {
        Box::pin(async { Err(Self::refused()) })
    }

    fn receive(&self, _owner_id: &str, _log_id: i64, _ranges: &RangeSet) -> BoxFuture<'_, Vec<Event>> {
        Box::pin(async { Err(Self::refused()) })
    }

    fn open_upload(&self) -> BoxFuture<'_, Box<dyn EventUpload>> {
        Box::pin(async { Err(Self::refused()) })
    }
}
