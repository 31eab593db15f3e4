// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::{check_appendable, BoxFuture, LogStore};
use crate::event::Event;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

type LogKey = (String, i64);

/// In-process log store.
///
/// Events are keyed by ID inside each `(owner_id, log_id)` log, so appending
/// the same identity twice overwrites instead of duplicating.
#[derive(Default)]
pub struct MemoryLogStore {
    logs: RwLock<HashMap<LogKey, BTreeMap<i64, Event>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across all logs.
    pub async fn len(&self) -> usize {
        self.logs.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl LogStore for MemoryLogStore {
    fn highest_id(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, i64> {
        let key = (owner_id.to_string(), log_id);
        Box::pin(async move {
            let logs = self.logs.read().await;
            Ok(logs
                .get(&key)
                .and_then(|log| log.keys().next_back().copied())
                .unwrap_or(0))
        })
    }

    fn get(
        &self,
        owner_id: &str,
        log_id: i64,
        from_id: i64,
        to_id: i64,
    ) -> BoxFuture<'_, Vec<Event>> {
        let key = (owner_id.to_string(), log_id);
        Box::pin(async move {
            if from_id > to_id {
                return Ok(Vec::new());
            }
            let logs = self.logs.read().await;
            Ok(logs
                .get(&key)
                .map(|log| log.range(from_id..=to_id).map(|(_, e)| e.clone()).collect())
                .unwrap_or_default())
        })
    }

    fn get_page(
        &self,
        owner_id: &str,
        log_id: i64,
        from_id: i64,
        to_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, Vec<Event>> {
        let key = (owner_id.to_string(), log_id);
        Box::pin(async move {
            if from_id > to_id {
                return Ok(Vec::new());
            }
            let logs = self.logs.read().await;
            Ok(logs
                .get(&key)
                .map(|log| {
                    log.range(from_id..=to_id)
                        .take(limit)
                        .map(|(_, e)| e.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn list_log_ids(&self, owner_id: &str) -> BoxFuture<'_, Vec<i64>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let logs = self.logs.read().await;
            let mut ids: Vec<i64> = logs
                .keys()
                .filter(|(owner, _)| *owner == owner_id)
                .map(|(_, log_id)| *log_id)
                .collect();
            ids.sort_unstable();
            Ok(ids)
        })
    }

    fn list_owners(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let logs = self.logs.read().await;
            let mut owners: Vec<String> = logs.keys().map(|(owner, _)| owner.clone()).collect();
            owners.sort();
            owners.dedup();
            Ok(owners)
        })
    }

    fn append(&self, events: Vec<Event>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            check_appendable(&events)?;
            let count = events.len();
            let mut logs = self.logs.write().await;
            for event in events {
                logs.entry((event.owner_id.clone(), event.log_id))
                    .or_default()
                    .insert(event.id, event);
            }
            tracing::trace!(count, "Appended events to memory log store");
            Ok(count)
        })
    }
}
