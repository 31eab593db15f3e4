// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline edit buffer over a [`Repository`].
//!
//! Two files live in the cache directory:
//!
//! | File | Holds |
//! |------|-------|
//! | `local` | Pending edits from [`write_local`](CachedRepository::write_local) |
//! | `backup` | The last checked-out or committed version |
//!
//! ```text
//!  write_local ──► local ──commit()──► remote.commit(local, most_recent)
//!                    │                     ok: local → backup, most_recent += 1
//!                    │                     conflict: local kept, Ok(false)
//!               revert() removes it
//!
//!  checkout() ──► remote.checkout(highest) → backup, local removed
//! ```
//!
//! Files are replaced through a temporary file and a rename, so a crash
//! leaves either the old or the new content.

use super::Repository;
use crate::error::{ReconcileError, Result};
use crate::metrics;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const LOCAL_FILE: &str = "local";
const BACKUP_FILE: &str = "backup";

/// Local write-buffering wrapper over a repository.
pub struct CachedRepository {
    remote: Arc<dyn Repository>,
    directory: PathBuf,
    /// Version the backup file holds, 0 = none. Operations are serialized on it.
    most_recent_version: Mutex<i64>,
}

impl CachedRepository {
    /// Open a cache with nothing checked out yet.
    pub async fn open(remote: Arc<dyn Repository>, directory: impl Into<PathBuf>) -> Result<Self> {
        Self::with_version(remote, directory, 0).await
    }

    /// Open a cache whose backup file is known to hold `most_recent_version`.
    pub async fn with_version(
        remote: Arc<dyn Repository>,
        directory: impl Into<PathBuf>,
        most_recent_version: i64,
    ) -> Result<Self> {
        if most_recent_version < 0 {
            return Err(ReconcileError::InvalidArgument(format!(
                "most recent version must not be negative, got {}",
                most_recent_version
            )));
        }
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        debug!(directory = %directory.display(), most_recent_version, "Opened repository cache");
        Ok(Self {
            remote,
            directory,
            most_recent_version: Mutex::new(most_recent_version),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn most_recent_version(&self) -> i64 {
        *self.most_recent_version.lock().await
    }

    fn local_path(&self) -> PathBuf {
        self.directory.join(LOCAL_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.directory.join(BACKUP_FILE)
    }

    /// Replace the pending buffer. The remote is not touched.
    pub async fn write_local(&self, data: &[u8]) -> Result<()> {
        let _guard = self.most_recent_version.lock().await;
        write_atomic(&self.local_path(), data).await?;
        metrics::record_cache_operation("write_local");
        Ok(())
    }

    /// Pending edits if any, else the last checked-out or committed version.
    ///
    /// With neither present: an `Io(NotFound)` error if `fail_if_absent`,
    /// otherwise empty content.
    pub async fn get_local(&self, fail_if_absent: bool) -> Result<Vec<u8>> {
        let _guard = self.most_recent_version.lock().await;
        if let Some(data) = read_optional(&self.local_path()).await? {
            return Ok(data);
        }
        if let Some(data) = read_optional(&self.backup_path()).await? {
            return Ok(data);
        }
        absent(fail_if_absent, "no local or checked out content")
    }

    /// Whether there are pending edits.
    pub async fn is_modified(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.local_path()).await?)
    }

    /// Commit the pending edits on top of the most recent version.
    ///
    /// `Ok(false)` on conflict; the edits stay pending so the caller can
    /// [`checkout`](Self::checkout), reapply and retry.
    pub async fn commit(&self) -> Result<bool> {
        let mut most_recent = self.most_recent_version.lock().await;
        let local = self.local_path();
        let Some(data) = read_optional(&local).await? else {
            return Err(ReconcileError::InvalidState {
                expected: "pending local changes".to_string(),
                actual: "nothing to commit".to_string(),
            });
        };

        if !self.remote.commit(data.clone(), *most_recent).await? {
            debug!(from_version = *most_recent, "Cached commit conflicted, local changes kept");
            metrics::record_cache_operation("commit_conflict");
            return Ok(false);
        }

        // The remote has the version now, whatever happens to the files
        *most_recent += 1;
        if let Err(e) = tokio::fs::rename(&local, self.backup_path()).await {
            warn!(version = *most_recent, error = %e, "Could not move committed changes to backup");
            if let Err(e) = write_atomic(&self.backup_path(), &data).await {
                warn!(version = *most_recent, error = %e, "Could not write backup of committed changes");
            }
            // Committed edits must not stay pending
            if let Err(e) = remove_optional(&local).await {
                warn!(error = %e, "Could not clear committed local changes");
            }
        }
        info!(version = *most_recent, "Committed local changes");
        metrics::record_cache_operation("commit");
        Ok(true)
    }

    /// Fetch the remote's highest version, discarding pending edits.
    ///
    /// An empty remote clears the cache and, unless `fail_if_absent`,
    /// returns empty content.
    pub async fn checkout(&self, fail_if_absent: bool) -> Result<Vec<u8>> {
        let mut most_recent = self.most_recent_version.lock().await;
        let highest = self.remote.highest_version().await?;

        let data = if highest > 0 {
            self.remote.checkout(highest).await?
        } else {
            None
        };

        remove_optional(&self.local_path()).await?;
        metrics::record_cache_operation("checkout");

        match data {
            Some(data) => {
                write_atomic(&self.backup_path(), &data).await?;
                *most_recent = highest;
                debug!(version = highest, bytes = data.len(), "Checked out repository version");
                Ok(data)
            }
            None => {
                remove_optional(&self.backup_path()).await?;
                *most_recent = 0;
                absent(fail_if_absent, "remote repository is empty")
            }
        }
    }

    /// Drop pending edits, falling back to the most recent version.
    pub async fn revert(&self) -> Result<()> {
        let _guard = self.most_recent_version.lock().await;
        if remove_optional(&self.local_path()).await? {
            debug!("Reverted local changes");
        }
        metrics::record_cache_operation("revert");
        Ok(())
    }

    /// Whether the most recent version is the remote's highest.
    pub async fn is_current(&self) -> Result<bool> {
        let most_recent = *self.most_recent_version.lock().await;
        Ok(self.remote.highest_version().await? == most_recent)
    }
}

fn absent(fail_if_absent: bool, what: &str) -> Result<Vec<u8>> {
    if fail_if_absent {
        Err(std::io::Error::new(ErrorKind::NotFound, what.to_string()).into())
    } else {
        Ok(Vec::new())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Returns whether a file was removed.
async fn remove_optional(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
