// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-wide HTTP client and shared request plumbing.
//!
//! The client is created once at startup by [`init_http_client`] and then
//! cloned (cheaply, it is reference counted) into each HTTP peer. It only
//! carries a connect timeout; request timeouts are applied per request so
//! that streamed uploads are not cut off.

use crate::error::{ReconcileError, Result};
use reqwest::StatusCode;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the shared client. Later calls are no-ops.
pub fn init_http_client(request_timeout: Duration) -> Result<()> {
    if HTTP_CLIENT.get().is_some() {
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .connect_timeout(request_timeout.min(MAX_CONNECT_TIMEOUT))
        .user_agent(concat!("reconciliation-engine/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ReconcileError::Config(format!("Failed to build HTTP client: {}", e)))?;

    // Losing the race to another initializer is fine, both clients are equivalent
    if HTTP_CLIENT.set(client).is_ok() {
        debug!("HTTP client initialized");
    }
    Ok(())
}

/// The shared client.
///
/// Fails if [`init_http_client`] has not been called yet.
pub fn http_client() -> Result<reqwest::Client> {
    HTTP_CLIENT.get().cloned().ok_or_else(|| {
        ReconcileError::Internal("HTTP client not initialized; call init_http_client at startup".into())
    })
}

/// `base` + `/` + `path`, tolerating a trailing slash on `base`.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Classify a failed request: connect/timeout failures mean the peer is away.
pub(crate) fn request_error(peer: &str, operation: &str, e: reqwest::Error) -> ReconcileError {
    if e.is_connect() || e.is_timeout() {
        ReconcileError::PeerConnection {
            peer: peer.to_string(),
            message: format!("{}: {}", operation, e),
        }
    } else {
        ReconcileError::http(operation, e)
    }
}

/// Classify a non-success status.
///
/// Server-side and throttling statuses are worth retrying next cycle; any
/// other client error means the request or the answer is wrong.
pub(crate) fn status_error(operation: &str, status: StatusCode, body: &str) -> ReconcileError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ReconcileError::http_msg(operation, message)
    } else {
        ReconcileError::Protocol {
            log_id: None,
            message: format!("{} rejected: {}", operation, message),
        }
    }
}
