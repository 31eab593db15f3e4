// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! [`Repository`] client for a remote [`RepositoryEndpoint`](super::RepositoryEndpoint).

use super::endpoint::{
    STATUS_BAD_REQUEST, STATUS_NOT_ACCEPTABLE, STATUS_NOT_ALLOWED, STATUS_NOT_FOUND, STATUS_OK,
};
use super::{validate_from_version, validate_version, Repository};
use crate::discovery::Discovery;
use crate::error::{ReconcileError, Result};
use crate::http::{http_client, join_url, request_error, status_error};
use crate::metrics;
use crate::range::RangeSet;
use crate::BoxFuture;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Remote repository reached over HTTP.
pub struct HttpRepository {
    client: reqwest::Client,
    discovery: Arc<dyn Discovery>,
    remote_path: String,
    request_timeout: Duration,
}

impl HttpRepository {
    pub fn new(
        client: reqwest::Client,
        discovery: Arc<dyn Discovery>,
        remote_path: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            discovery,
            remote_path: remote_path.into(),
            request_timeout,
        }
    }

    /// Build on the shared client from [`crate::http::init_http_client`].
    pub fn from_shared_client(
        discovery: Arc<dyn Discovery>,
        remote_path: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self::new(http_client()?, discovery, remote_path, request_timeout))
    }

    fn url(&self, operation: &str) -> Result<(String, String)> {
        let base = self
            .discovery
            .server_url()
            .ok_or_else(|| ReconcileError::PeerConnection {
                peer: "<unresolved>".to_string(),
                message: "no server address known".to_string(),
            })?;
        let url = join_url(&base, &format!("{}/{}", self.remote_path, operation));
        Ok((base, url))
    }

    async fn request(
        &self,
        operation: &str,
        query: &[(&str, i64)],
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let (base, url) = self.url(operation)?;
        let start = Instant::now();

        let result: Result<(StatusCode, Vec<u8>)> = async {
            let request = match body {
                Some(data) => self.client.post(&url).body(data),
                None => self.client.get(&url),
            };
            let response = request
                .query(query)
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(|e| request_error(&base, operation, e))?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| request_error(&base, operation, e))?;
            Ok((status, bytes.to_vec()))
        }
        .await;

        let success = matches!(&result, Ok((status, _)) if !status.is_server_error());
        metrics::record_peer_request(operation, success, start.elapsed());
        if let Err(e) = &result {
            debug!(url = %url, error = %e, "Repository request failed");
        }
        result
    }
}

/// Map a put/commit answer onto the `Ok(bool)` contract.
pub(crate) fn accepted_from_status(operation: &str, status: StatusCode, body: &[u8]) -> Result<bool> {
    let text = String::from_utf8_lossy(body);
    match status.as_u16() {
        STATUS_OK => Ok(true),
        STATUS_NOT_ACCEPTABLE => Ok(false),
        STATUS_BAD_REQUEST => Err(ReconcileError::InvalidArgument(text.trim().to_string())),
        STATUS_NOT_ALLOWED => Err(ReconcileError::InvalidState {
            expected: "master repository".to_string(),
            actual: format!("remote refused {}", operation),
        }),
        _ => Err(status_error(operation, status, &text)),
    }
}

/// Map a get answer onto `Ok(Option<bytes>)`.
pub(crate) fn blob_from_status(status: StatusCode, body: Vec<u8>) -> Result<Option<Vec<u8>>> {
    match status.as_u16() {
        STATUS_OK => Ok(Some(body)),
        STATUS_NOT_FOUND => Ok(None),
        STATUS_BAD_REQUEST => Err(ReconcileError::InvalidArgument(
            String::from_utf8_lossy(&body).trim().to_string(),
        )),
        _ => Err(status_error("get", status, &String::from_utf8_lossy(&body))),
    }
}

impl Repository for HttpRepository {
    fn commit(&self, data: Vec<u8>, from_version: i64) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            validate_from_version(from_version)?;
            let (status, body) = self
                .request("commit", &[("from", from_version)], Some(data))
                .await?;
            let committed = accepted_from_status("commit", status, &body)?;
            metrics::record_repository_commit(if committed { "committed" } else { "conflict" });
            Ok(committed)
        })
    }

    fn get(&self, version: i64) -> BoxFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            validate_version(version)?;
            let (status, body) = self.request("get", &[("version", version)], None).await?;
            blob_from_status(status, body)
        })
    }

    fn put(&self, data: Vec<u8>, version: i64) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            validate_version(version)?;
            let (status, body) = self
                .request("put", &[("version", version)], Some(data))
                .await?;
            accepted_from_status("put", status, &body)
        })
    }

    fn range(&self) -> BoxFuture<'_, RangeSet> {
        Box::pin(async move {
            let (status, body) = self.request("range", &[], None).await?;
            let text = String::from_utf8_lossy(&body);
            if !status.is_success() {
                return Err(status_error("range", status, &text));
            }
            text.trim().parse::<RangeSet>().map_err(|e| e.into_protocol(None))
        })
    }
}
