// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed repository.
//!
//! # Atomic Commit
//!
//! `commit` is check-then-write: read the highest version, compare, insert
//! `from + 1`. Two guards keep that safe:
//!
//! - a process-local lock serializes commits through this handle
//! - `version` is the primary key and inserts use `INSERT OR IGNORE`, so if
//!   another process wins the race the insert affects no row and the commit
//!   reports a conflict

use super::{validate_from_version, validate_version, Repository};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::range::RangeSet;
use crate::sqlite::{close_pool, execute_with_retry, open_pool};
use crate::BoxFuture;
use sqlx::sqlite::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// SQLite-backed [`Repository`].
pub struct SqliteRepository {
    pool: SqlitePool,
    master_mode: bool,
    commit_lock: Mutex<()>,
}

impl SqliteRepository {
    /// Open (or create) the repository at `path`.
    pub async fn new(path: &str, wal_mode: bool, master_mode: bool) -> Result<Self> {
        let pool = open_pool(path, wal_mode).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                version INTEGER PRIMARY KEY,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let repo = Self {
            pool,
            master_mode,
            commit_lock: Mutex::new(()),
        };

        // Highest version is always derived from storage, never cached
        let highest = repo.stored_highest().await?;
        info!(path = %path, master_mode, highest, "Opened repository");
        Ok(repo)
    }

    pub fn is_master(&self) -> bool {
        self.master_mode
    }

    /// Checkpoint WAL and close the pool.
    pub async fn close(&self) {
        close_pool(&self.pool, "repository").await;
    }

    async fn stored_highest(&self) -> Result<i64> {
        let highest: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM versions")
            .fetch_one(&self.pool)
            .await?;
        Ok(highest.unwrap_or(0))
    }

    /// Insert unless the version exists. Returns whether a row was written.
    async fn insert_version(&self, operation: &str, version: i64, data: &[u8]) -> Result<bool> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let result = execute_with_retry(operation, || async {
            sqlx::query("INSERT OR IGNORE INTO versions (version, data, created_at) VALUES (?, ?, ?)")
                .bind(version)
                .bind(data)
                .bind(created_at)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

impl Repository for SqliteRepository {
    fn commit(&self, data: Vec<u8>, from_version: i64) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if !self.master_mode {
                return Err(ReconcileError::InvalidState {
                    expected: "master repository".to_string(),
                    actual: "replica repository".to_string(),
                });
            }
            validate_from_version(from_version)?;

            let _guard = self.commit_lock.lock().await;
            let highest = self.stored_highest().await?;
            if from_version != highest {
                debug!(from_version, highest, "Commit conflict, stale base version");
                metrics::record_repository_commit("conflict");
                return Ok(false);
            }

            let version = from_version + 1;
            let stored = self.insert_version("repository_commit", version, &data).await?;
            if stored {
                debug!(version, bytes = data.len(), "Committed repository version");
                metrics::record_repository_commit("committed");
            } else {
                debug!(version, "Commit lost race to another writer");
                metrics::record_repository_commit("conflict");
            }
            Ok(stored)
        })
    }

    fn get(&self, version: i64) -> BoxFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            validate_version(version)?;
            Ok(sqlx::query_scalar("SELECT data FROM versions WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await?)
        })
    }

    fn put(&self, data: Vec<u8>, version: i64) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            validate_version(version)?;
            let stored = self.insert_version("repository_put", version, &data).await?;
            metrics::record_repository_put(stored);
            Ok(stored)
        })
    }

    fn range(&self) -> BoxFuture<'_, RangeSet> {
        Box::pin(async move {
            let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM versions ORDER BY version")
                .fetch_all(&self.pool)
                .await?;
            RangeSet::from_values(versions)
        })
    }

    fn highest_version(&self) -> BoxFuture<'_, i64> {
        Box::pin(self.stored_highest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::IN_MEMORY;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn master() -> SqliteRepository {
        SqliteRepository::new(IN_MEMORY, false, true).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_sequence() {
        let repo = master().await;
        assert_eq!(repo.highest_version().await.unwrap(), 0);

        assert!(repo.commit(b"one".to_vec(), 0).await.unwrap());
        assert_eq!(repo.get(1).await.unwrap(), Some(b"one".to_vec()));

        // Stale base
        assert!(!repo.commit(b"again".to_vec(), 0).await.unwrap());
        assert!(repo.commit(b"two".to_vec(), 1).await.unwrap());
        assert!(!repo.commit(b"far".to_vec(), 999).await.unwrap());

        assert_eq!(repo.highest_version().await.unwrap(), 2);
        assert_eq!(repo.range().await.unwrap().to_string(), "1-2");
        assert_eq!(repo.checkout(2).await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_non_positive_versions_are_rejected() {
        let repo = master().await;
        for version in [0, -1] {
            assert!(matches!(repo.get(version).await, Err(ReconcileError::InvalidArgument(_))));
            assert!(matches!(repo.checkout(version).await, Err(ReconcileError::InvalidArgument(_))));
            assert!(matches!(
                repo.put(b"x".to_vec(), version).await,
                Err(ReconcileError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            repo.commit(b"x".to_vec(), -1).await,
            Err(ReconcileError::InvalidArgument(_))
        ));
        assert_eq!(repo.get(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replica_rejects_commit_but_accepts_put() {
        let replica = SqliteRepository::new(IN_MEMORY, false, false).await.unwrap();
        assert!(!replica.is_master());

        let err = replica.commit(b"x".to_vec(), 0).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidState { .. }));

        assert!(replica.put(b"v3".to_vec(), 3).await.unwrap());
        assert!(!replica.put(b"other".to_vec(), 3).await.unwrap());
        assert_eq!(replica.get(3).await.unwrap(), Some(b"v3".to_vec()));
        assert_eq!(replica.range().await.unwrap().to_string(), "3");
    }

    #[tokio::test]
    async fn test_concurrent_commits_from_same_base() {
        let repo = Arc::new(master().await);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move { repo.commit(vec![i], 0).await.unwrap() }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(repo.range().await.unwrap().to_string(), "1");
    }

    #[tokio::test]
    async fn test_two_handles_on_one_file_cannot_both_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        let path = path.to_str().unwrap();

        let a = SqliteRepository::new(path, true, true).await.unwrap();
        let b = SqliteRepository::new(path, true, true).await.unwrap();

        assert!(a.commit(b"from a".to_vec(), 0).await.unwrap());
        assert!(!b.commit(b"from b".to_vec(), 0).await.unwrap());
        assert_eq!(b.get(1).await.unwrap(), Some(b"from a".to_vec()));

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_highest_version_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        let path = path.to_str().unwrap();

        {
            let repo = SqliteRepository::new(path, true, true).await.unwrap();
            assert!(repo.commit(b"1".to_vec(), 0).await.unwrap());
            assert!(repo.commit(b"2".to_vec(), 1).await.unwrap());
            repo.close().await;
        }

        let repo = SqliteRepository::new(path, true, true).await.unwrap();
        assert_eq!(repo.highest_version().await.unwrap(), 2);
        assert!(repo.commit(b"3".to_vec(), 2).await.unwrap());
        repo.close().await;
    }
}
