// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable log store backed by SQLite.
//!
//! The primary key is the logical identity `(owner_id, log_id, id)`, and
//! writes use `INSERT .. ON CONFLICT DO UPDATE`. A retried sync cycle that
//! re-delivers events therefore overwrites rows instead of adding new ones.

use super::{check_appendable, BoxFuture, LogStore};
use crate::descriptor::Descriptor;
use crate::error::{ReconcileError, Result};
use crate::event::Event;
use crate::range::RangeSet;
use crate::sqlite::{close_pool, execute_with_retry, open_pool};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info};

type EventRow = (String, i64, i64, i64, i32, String);

/// SQLite-backed [`LogStore`].
pub struct SqliteLogStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteLogStore {
    /// Open (or create) the store at `path`.
    ///
    /// Pass [`crate::sqlite::IN_MEMORY`] for a throwaway store.
    pub async fn new(path: &str, wal_mode: bool) -> Result<Self> {
        info!(path = %path, "Initializing log store");
        let pool = open_pool(path, wal_mode).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                owner_id TEXT NOT NULL,
                log_id INTEGER NOT NULL,
                id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                event_type INTEGER NOT NULL,
                properties TEXT NOT NULL,
                PRIMARY KEY (owner_id, log_id, id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            path: path.to_string(),
        })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoint WAL and close the pool.
    pub async fn close(&self) {
        close_pool(&self.pool, "log_store").await;
    }

    /// Total rows across all logs.
    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn row_to_event(row: EventRow) -> Result<Event> {
    let (owner_id, log_id, id, timestamp, event_type, properties) = row;
    let properties: BTreeMap<String, String> = serde_json::from_str(&properties)
        .map_err(|e| ReconcileError::Internal(format!("corrupt properties for event {}: {}", id, e)))?;
    Ok(Event {
        owner_id,
        log_id,
        id,
        timestamp,
        event_type,
        properties,
    })
}

impl LogStore for SqliteLogStore {
    fn highest_id(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, i64> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let highest: Option<i64> =
                sqlx::query_scalar("SELECT MAX(id) FROM events WHERE owner_id = ? AND log_id = ?")
                    .bind(&owner_id)
                    .bind(log_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(highest.unwrap_or(0))
        })
    }

    fn get(
        &self,
        owner_id: &str,
        log_id: i64,
        from_id: i64,
        to_id: i64,
    ) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let rows: Vec<EventRow> = sqlx::query_as(
                r#"
                SELECT owner_id, log_id, id, timestamp, event_type, properties
                FROM events
                WHERE owner_id = ? AND log_id = ? AND id BETWEEN ? AND ?
                ORDER BY id
                "#,
            )
            .bind(&owner_id)
            .bind(log_id)
            .bind(from_id)
            .bind(to_id)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(row_to_event).collect()
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
        let owner_id = owner_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(async move {
            let rows: Vec<EventRow> = sqlx::query_as(
                r#"
                SELECT owner_id, log_id, id, timestamp, event_type, properties
                FROM events
                WHERE owner_id = ? AND log_id = ? AND id BETWEEN ? AND ?
                ORDER BY id
                LIMIT ?
                "#,
            )
            .bind(&owner_id)
            .bind(log_id)
            .bind(from_id)
            .bind(to_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(row_to_event).collect()
        })
    }

    fn list_log_ids(&self, owner_id: &str) -> BoxFuture<'_, Vec<i64>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            Ok(sqlx::query_scalar(
                "SELECT DISTINCT log_id FROM events WHERE owner_id = ? ORDER BY log_id",
            )
            .bind(&owner_id)
            .fetch_all(&self.pool)
            .await?)
        })
    }

    fn list_owners(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            Ok(sqlx::query_scalar("SELECT DISTINCT owner_id FROM events ORDER BY owner_id")
                .fetch_all(&self.pool)
                .await?)
        })
    }

    fn append(&self, events: Vec<Event>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            if events.is_empty() {
                return Ok(0);
            }
            check_appendable(&events)?;

            let rows = events
                .iter()
                .map(|e| {
                    serde_json::to_string(&e.properties)
                        .map(|props| (e, props))
                        .map_err(|err| ReconcileError::Internal(err.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let pool = &self.pool;
            execute_with_retry("event_append", || async {
                let mut tx = pool.begin().await?;
                for (event, properties) in &rows {
                    sqlx::query(
                        r#"
                        INSERT INTO events (owner_id, log_id, id, timestamp, event_type, properties)
                        VALUES (?, ?, ?, ?, ?, ?)
                        ON CONFLICT(owner_id, log_id, id) DO UPDATE SET
                            timestamp = excluded.timestamp,
                            event_type = excluded.event_type,
                            properties = excluded.properties
                        "#,
                    )
                    .bind(&event.owner_id)
                    .bind(event.log_id)
                    .bind(event.id)
                    .bind(event.timestamp)
                    .bind(event.event_type)
                    .bind(properties)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await
            })
            .await?;

            debug!(count = rows.len(), "Appended events to log store");
            Ok(rows.len())
        })
    }

    fn descriptor(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let ids: Vec<i64> =
                sqlx::query_scalar("SELECT id FROM events WHERE owner_id = ? AND log_id = ? ORDER BY id")
                    .bind(&owner_id)
                    .bind(log_id)
                    .fetch_all(&self.pool)
                    .await?;
            let ranges = RangeSet::from_values(ids)?;
            Ok(Descriptor::new(owner_id, log_id, ranges))
        })
    }
}
