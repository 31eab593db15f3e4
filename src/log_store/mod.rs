// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log store integration trait.
//!
//! Defines what the sync protocol needs from local event storage. The store
//! itself belongs to the embedding process; two implementations ship here:
//!
//! - [`MemoryLogStore`]: in-process, for tests and short-lived tools
//! - [`SqliteLogStore`]: durable, keyed by `(owner_id, log_id, id)`
//!
//! # Idempotent Append
//!
//! Delivery is at-least-once: a cycle interrupted after streaming events may
//! be retried wholesale. Every implementation must treat `append` as an
//! upsert by `(owner_id, log_id, id)` so that re-delivery never creates
//! duplicates.
//!
//! # Example
//!
//! ```rust,no_run
//! use reconciliation_engine::log_store::{BoxFuture, LogStore};
//! use reconciliation_engine::event::Event;
//!
//! struct MyStore { /* ... */ }
//!
//! impl LogStore for MyStore {
//!     fn highest_id(&self, _owner_id: &str, _log_id: i64) -> BoxFuture<'_, i64> {
//!         Box::pin(async move { Ok(0) })
//!     }
//!
//!     fn get(&self, _owner_id: &str, _log_id: i64, _from_id: i64, _to_id: i64) -> BoxFuture<'_, Vec<Event>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!
//!     fn list_log_ids(&self, _owner_id: &str) -> BoxFuture<'_, Vec<i64>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!
//!     fn list_owners(&self) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!
//!     fn append(&self, events: Vec<Event>) -> BoxFuture<'_, usize> {
//!         Box::pin(async move { Ok(events.len()) })
//!     }
//! }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

use crate::descriptor::Descriptor;
use crate::error::{ReconcileError, Result};
use crate::event::Event;
use crate::range::RangeSet;

pub use crate::BoxFuture;

/// What the sync protocol needs from local event storage.
pub trait LogStore: Send + Sync + 'static {
    /// Highest record ID held for the log, `0` if empty or unknown.
    fn highest_id(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, i64>;

    /// Events with `from_id <= id <= to_id`, ascending by ID.
    fn get(&self, owner_id: &str, log_id: i64, from_id: i64, to_id: i64)
        -> BoxFuture<'_, Vec<Event>>;

    /// At most `limit` events with `from_id <= id <= to_id`, ascending by ID.
    ///
    /// Sync pages through a log with this, so its cost follows the events
    /// held rather than the width of the ID window. The default filters
    /// [`get`](Self::get); stores that can limit at the source should.
    fn get_page(
        &self,
        owner_id: &str,
        log_id: i64,
        from_id: i64,
        to_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let mut events = self.get(&owner_id, log_id, from_id, to_id).await?;
            events.truncate(limit);
            Ok(events)
        })
    }

    /// Log IDs held for `owner_id`, ascending.
    fn list_log_ids(&self, owner_id: &str) -> BoxFuture<'_, Vec<i64>>;

    /// Every owner with at least one event.
    fn list_owners(&self) -> BoxFuture<'_, Vec<String>>;

    /// Upsert events by `(owner_id, log_id, id)`.
    ///
    /// Events with a non-positive ID are rejected before anything is written.
    /// Returns the number of events written (including overwrites).
    fn append(&self, events: Vec<Event>) -> BoxFuture<'_, usize>;

    /// Describe the IDs actually held for the log, gaps included.
    fn descriptor(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let highest = self.highest_id(&owner_id, log_id).await?;
            if highest == 0 {
                return Ok(Descriptor::empty(owner_id, log_id));
            }
            let events = self.get(&owner_id, log_id, 1, highest).await?;
            let ranges = RangeSet::from_values(events.iter().map(|e| e.id))?;
            Ok(Descriptor::new(owner_id, log_id, ranges))
        })
    }

    /// Events whose IDs fall in `ranges`, ascending.
    fn get_ranges(&self, owner_id: &str, log_id: i64, ranges: &RangeSet) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        let ranges = ranges.clone();
        Box::pin(async move {
            let mut out = Vec::new();
            for range in ranges.range_iter() {
                out.extend(self.get(&owner_id, log_id, range.low(), range.high()).await?);
            }
            Ok(out)
        })
    }
}

/// Reject a batch holding any event with `id < 1`.
///
/// Such an event could never be described by a [`RangeSet`], so storing it
/// would leave its log unqueryable.
pub(crate) fn check_appendable(events: &[Event]) -> Result<()> {
    match events.iter().find(|e| e.id < 1) {
        Some(bad) => Err(ReconcileError::InvalidInput(format!(
            "event id {} in log {} of '{}' is not positive",
            bad.id, bad.log_id, bad.owner_id
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(log_id: i64, id: i64) -> Event {
        Event::new("owner", log_id, id, 1).with_timestamp(id)
    }

    #[tokio::test]
    async fn test_default_descriptor_tolerates_gaps() {
        let store = MemoryLogStore::new();
        store
            .append(vec![event(1, 1), event(1, 2), event(1, 5), event(1, 9)])
            .await
            .unwrap();

        let d = store.descriptor("owner", 1).await.unwrap();
        assert_eq!(d.to_string(), "owner,1,1-2,5,9");
    }

    #[tokio::test]
    async fn test_default_descriptor_for_unknown_log_is_empty() {
        let store = MemoryLogStore::new();
        let d = store.descriptor("nobody", 4).await.unwrap();
        assert_eq!(d, Descriptor::empty("nobody", 4));
    }

    #[tokio::test]
    async fn test_default_get_ranges() {
        let store = MemoryLogStore::new();
        store
            .append((1..=10).map(|id| event(2, id)).collect())
            .await
            .unwrap();

        let ranges: RangeSet = "2-3,7,9-20".parse().unwrap();
        let ids: Vec<i64> = store
            .get_ranges("owner", 2, &ranges)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 7, 9, 10]);
    }

    #[test]
    fn test_check_appendable() {
        assert!(check_appendable(&[event(1, 1), event(1, 9)]).is_ok());
        assert!(check_appendable(&[]).is_ok());

        let err = check_appendable(&[event(1, 1), event(1, 0)]).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidInput(_)));
        assert!(check_appendable(&[event(1, -3)]).is_err());
    }
}
