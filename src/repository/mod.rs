// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned repositories.
//!
//! A repository is a sequence of immutable blobs numbered from 1. Masters
//! grow it through optimistic-concurrency [`commit`](Repository::commit);
//! replicas mirror a master's exact version numbers through
//! [`put`](Repository::put). Which versions a side holds is a [`RangeSet`],
//! so replicas find what they lack with the same algebra the log sync uses.
//!
//! # Commit Semantics
//!
//! ```text
//! commit(data, from)   from == highest && from+1 absent  → Ok(true), stored as from+1
//!                      otherwise                        → Ok(false)  (refresh, retry)
//!                      on a replica                     → Err(InvalidState)
//! ```
//!
//! A conflict is not an error. The caller checks out the latest version,
//! reapplies its change and commits again.
//!
//! # Implementations
//!
//! - [`SqliteRepository`]: local storage, master or replica
//! - [`HttpRepository`]: a remote repository through [`RepositoryEndpoint`]
//! - [`CachedRepository`]: offline edit buffer over any of the above
//! - [`RepositoryReplicator`]: keeps a replica level with a master

mod cached;
mod endpoint;
mod http;
mod replication;
mod sqlite;

pub use cached::CachedRepository;
pub use endpoint::{EndpointResponse, RepositoryEndpoint, RepositoryRequest};
pub use http::HttpRepository;
pub use replication::{ReplicationStats, RepositoryReplicator};
pub use sqlite::SqliteRepository;

use crate::error::{ReconcileError, Result};
use crate::range::RangeSet;
use crate::BoxFuture;

/// A versioned blob store.
pub trait Repository: Send + Sync + 'static {
    /// Store `data` as version `from_version + 1` if `from_version` is the
    /// current highest version. `Ok(false)` on conflict.
    fn commit(&self, data: Vec<u8>, from_version: i64) -> BoxFuture<'_, bool>;

    /// The blob stored as `version`, `None` if absent.
    fn get(&self, version: i64) -> BoxFuture<'_, Option<Vec<u8>>>;

    /// Store `data` as exactly `version`. `Ok(false)` if it already exists.
    fn put(&self, data: Vec<u8>, version: i64) -> BoxFuture<'_, bool>;

    /// The versions currently stored.
    fn range(&self) -> BoxFuture<'_, RangeSet>;

    /// Read-only access to a version; same contract as [`get`](Self::get).
    fn checkout(&self, version: i64) -> BoxFuture<'_, Option<Vec<u8>>> {
        self.get(version)
    }

    /// Highest stored version, `0` if empty.
    fn highest_version(&self) -> BoxFuture<'_, i64> {
        Box::pin(async move { Ok(self.range().await?.high()) })
    }
}

/// Versions are numbered from 1.
pub(crate) fn validate_version(version: i64) -> Result<()> {
    if version <= 0 {
        return Err(ReconcileError::InvalidArgument(format!(
            "version must be positive, got {}",
            version
        )));
    }
    Ok(())
}

/// `from_version` 0 means "the repository is empty".
pub(crate) fn validate_from_version(from_version: i64) -> Result<()> {
    if from_version < 0 {
        return Err(ReconcileError::InvalidArgument(format!(
            "from version must not be negative, got {}",
            from_version
        )));
    }
    Ok(())
}
