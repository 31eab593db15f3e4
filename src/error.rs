// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the reconciliation engine.
//!
//! Errors are grouped by how the caller should react to them, not by which
//! module raised them.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `PeerConnection` | Yes | Peer unreachable, connection dropped |
//! | `Http` | Yes | Request to a peer failed in transit or with a server error |
//! | `Protocol` | No | Malformed descriptor/event line from a peer |
//! | `InvalidInput` | No | Malformed range-set, descriptor or event literal |
//! | `InvalidArgument` | No | Contract violation, e.g. version `<= 0` |
//! | `InvalidState` | No | Operation not allowed in the current mode/state |
//! | `Store` | No | Local SQLite errors (needs operator attention) |
//! | `Io` | No | Local disk buffer errors |
//! | `Config` | No | Configuration invalid |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Sync tasks use [`ReconcileError::is_retryable()`] to decide whether a
//! failure means "peer is away, try next interval" (logged as a warning) or
//! "something is wrong with the data" (logged as an error).
//!
//! Optimistic-concurrency conflicts are never errors: repository `commit`
//! returns `Ok(false)` instead.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that can occur while reconciling logs and repositories.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Peer unreachable or the connection dropped mid-exchange.
    ///
    /// Aborts the current cycle; retried on the next scheduled one.
    #[error("Peer connection error ({peer}): {message}")]
    PeerConnection { peer: String, message: String },

    /// HTTP request to a peer failed.
    #[error("HTTP error ({operation}): {message}")]
    Http {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The peer answered, but the answer could not be understood.
    ///
    /// `log_id` is set when the failure is scoped to one logical log.
    #[error("Protocol error (log {log_id:?}): {message}")]
    Protocol { log_id: Option<i64>, message: String },

    /// A textual literal (range-set, descriptor, event) is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An argument violates the operation's contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong state or mode
    /// (e.g. `commit` on a replica repository).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// SQLite error in the log store or repository store.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Local filesystem error (cached repository buffers).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Create an HTTP error from a reqwest error.
    pub fn http(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an HTTP error without source.
    pub fn http_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error scoped to one logical log.
    pub fn protocol(log_id: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            log_id: Some(log_id),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PeerConnection { .. } => true,
            Self::Http { .. } => true,
            Self::Protocol { .. } => false,
            Self::InvalidInput(_) => false,
            Self::InvalidArgument(_) => false,
            Self::InvalidState { .. } => false,
            Self::Store(_) => false, // Local DB issues need attention
            Self::Io(_) => false,
            Self::Config(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerConnection { .. } => "peer_connection",
            Self::Http { .. } => "http",
            Self::Protocol { .. } => "protocol",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState { .. } => "invalid_state",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }

    /// Re-scope an input error, or a protocol error tied to no log, as a
    /// protocol error for `log_id`.
    ///
    /// Parse failures on data received from a peer are protocol errors, not
    /// caller bugs.
    pub(crate) fn into_protocol(self, log_id: Option<i64>) -> Self {
        match self {
            Self::InvalidInput(message) => Self::Protocol { log_id, message },
            Self::Protocol { log_id: None, message } => Self::Protocol { log_id, message },
            other => other,
        }
    }
}

impl From<reqwest::Error> for ReconcileError {
    fn from(e: reqwest::Error) -> Self {
        Self::http("unknown", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_peer_connection() {
        let err = ReconcileError::PeerConnection {
            peer: "http://server:8080".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("http://server:8080"));
    }

    #[test]
    fn test_is_retryable_http() {
        let err = ReconcileError::http_msg("query", "503 Service Unavailable");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_not_retryable_protocol() {
        let err = ReconcileError::protocol(7, "missing log id");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Some(7)"));
    }

    #[test]
    fn test_not_retryable_contract_violations() {
        assert!(!ReconcileError::InvalidInput("8-5".into()).is_retryable());
        assert!(!ReconcileError::InvalidArgument("version 0".into()).is_retryable());
        let err = ReconcileError::InvalidState {
            expected: "master".to_string(),
            actual: "replica".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("master"));
        assert!(err.to_string().contains("replica"));
    }

    #[test]
    fn test_not_retryable_shutdown_and_internal() {
        assert!(!ReconcileError::Shutdown.is_retryable());
        assert!(!ReconcileError::Internal("unexpected".into()).is_retryable());
        assert!(!ReconcileError::Config("bad url".into()).is_retryable());
    }

    #[test]
    fn test_into_protocol_rescopes_input_errors() {
        let err = ReconcileError::InvalidInput("bad range".into()).into_protocol(Some(3));
        match err {
            ReconcileError::Protocol { log_id, message } => {
                assert_eq!(log_id, Some(3));
                assert_eq!(message, "bad range");
            }
            other => panic!("Expected Protocol error, got {other:?}"),
        }

        // Unscoped protocol errors (a rejected request) pick up the log
        let rejected = ReconcileError::Protocol {
            log_id: None,
            message: "query rejected: 400 Bad Request".into(),
        };
        assert!(matches!(
            rejected.into_protocol(Some(5)),
            ReconcileError::Protocol { log_id: Some(5), .. }
        ));

        // An already scoped error keeps its log
        let scoped = ReconcileError::protocol(2, "x").into_protocol(Some(5));
        assert!(matches!(scoped, ReconcileError::Protocol { log_id: Some(2), .. }));

        // Other variants pass through untouched
        let err = ReconcileError::Shutdown.into_protocol(Some(3));
        assert!(matches!(err, ReconcileError::Shutdown));
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ReconcileError::Shutdown.kind(), "shutdown");
        assert_eq!(ReconcileError::protocol(1, "x").kind(), "protocol");
        assert_eq!(ReconcileError::http_msg("send", "x").kind(), "http");
    }
}
