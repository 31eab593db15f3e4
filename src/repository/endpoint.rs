// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Serving half of the repository wire protocol, framework-free.
//!
//! A web layer extracts path, query string and body, hands them to
//! [`RepositoryEndpoint::handle`] and writes back the [`EndpointResponse`].
//!
//! | Request | 200 | 404 | 406 | 400 | 405 |
//! |---------|-----|-----|-----|-----|-----|
//! | `GET get?version=N` | blob | absent | | bad version | |
//! | `POST put?version=N` | stored | | exists | bad version | |
//! | `POST commit?from=N` | committed | | conflict | bad version | replica |
//! | `GET range` | range text | | | | |

use super::Repository;
use crate::error::{ReconcileError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) const STATUS_OK: u16 = 200;
pub(crate) const STATUS_BAD_REQUEST: u16 = 400;
pub(crate) const STATUS_NOT_FOUND: u16 = 404;
pub(crate) const STATUS_NOT_ALLOWED: u16 = 405;
pub(crate) const STATUS_NOT_ACCEPTABLE: u16 = 406;
pub(crate) const STATUS_SERVER_ERROR: u16 = 500;

/// A parsed repository request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryRequest {
    Get { version: i64 },
    Put { version: i64, data: Vec<u8> },
    Commit { from_version: i64, data: Vec<u8> },
    Range,
}

impl RepositoryRequest {
    /// Parse the operation (last path segment) and its query string.
    pub fn from_parts(path: &str, query: &str, body: Vec<u8>) -> Result<Self> {
        let operation = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        match operation {
            "get" => Ok(Self::Get {
                version: query_number(query, "version")?,
            }),
            "put" => Ok(Self::Put {
                version: query_number(query, "version")?,
                data: body,
            }),
            "commit" => Ok(Self::Commit {
                from_version: query_number(query, "from")?,
                data: body,
            }),
            "range" => Ok(Self::Range),
            other => Err(ReconcileError::InvalidArgument(format!(
                "unknown repository operation '{}'",
                other
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Commit { .. } => "commit",
            Self::Range => "range",
        }
    }
}

fn query_number(query: &str, key: &str) -> Result<i64> {
    let raw = query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .ok_or_else(|| ReconcileError::InvalidArgument(format!("missing '{}' parameter", key)))?;

    raw.parse::<i64>()
        .map_err(|_| ReconcileError::InvalidArgument(format!("'{}' is not a number: {}", key, raw)))
}

/// Status and body to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl EndpointResponse {
    fn ok(body: Vec<u8>) -> Self {
        Self { status: STATUS_OK, body }
    }

    fn empty(status: u16) -> Self {
        Self { status, body: Vec::new() }
    }

    fn accepted(accepted: bool) -> Self {
        if accepted {
            Self::empty(STATUS_OK)
        } else {
            Self::empty(STATUS_NOT_ACCEPTABLE)
        }
    }

    fn from_error(error: &ReconcileError) -> Self {
        let status = match error {
            ReconcileError::InvalidArgument(_) | ReconcileError::InvalidInput(_) => STATUS_BAD_REQUEST,
            ReconcileError::InvalidState { .. } => STATUS_NOT_ALLOWED,
            _ => STATUS_SERVER_ERROR,
        };
        Self {
            status,
            body: error.to_string().into_bytes(),
        }
    }
}

/// Serves a [`Repository`] over the repository wire protocol.
pub struct RepositoryEndpoint {
    repository: Arc<dyn Repository>,
}

impl RepositoryEndpoint {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Parse and dispatch in one step. Parse failures answer 400.
    pub async fn handle_raw(&self, path: &str, query: &str, body: Vec<u8>) -> EndpointResponse {
        match RepositoryRequest::from_parts(path, query, body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!(path, query, error = %e, "Rejected repository request");
                EndpointResponse::from_error(&e)
            }
        }
    }

    pub async fn handle(&self, request: RepositoryRequest) -> EndpointResponse {
        let operation = request.name();
        let result = match request {
            RepositoryRequest::Get { version } => {
                self.repository.get(version).await.map(|found| match found {
                    Some(data) => EndpointResponse::ok(data),
                    None => EndpointResponse::empty(STATUS_NOT_FOUND),
                })
            }
            RepositoryRequest::Put { version, data } => self
                .repository
                .put(data, version)
                .await
                .map(EndpointResponse::accepted),
            RepositoryRequest::Commit { from_version, data } => self
                .repository
                .commit(data, from_version)
                .await
                .map(EndpointResponse::accepted),
            RepositoryRequest::Range => self
                .repository
                .range()
                .await
                .map(|range| EndpointResponse::ok(range.to_representation().into_bytes())),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                let response = EndpointResponse::from_error(&e);
                if response.status == STATUS_SERVER_ERROR {
                    warn!(operation, error = %e, "Repository request failed");
                } else {
                    debug!(operation, status = response.status, error = %e, "Repository request refused");
                }
                response
            }
        }
    }
}
