//! The remote side of a log sync.
//!
//! [`LogPeer`] is what a sync cycle talks to: the server when running on a
//! target, or a target when the server reconciles against it. Two
//! implementations exist:
//!
//! - [`HttpLogPeer`]: the wire protocol over HTTP (this module)
//! - [`LoopbackPeer`](crate::endpoint::LoopbackPeer): an in-process
//!   [`LogEndpoint`](crate::endpoint::LogEndpoint), for tests and for
//!   reconciling two local stores
//!
//! # Wire Protocol
//!
//! ```text
//! GET  {server}/{endpoint}/query?{owner_param}=<owner>&logid=<id>   → one descriptor line
//! GET  {server}/{endpoint}/query?{owner_param}=<owner>              → one descriptor line per log
//! GET  {server}/{endpoint}/receive?{owner_param}=<owner>&logid=<id>&range=<set>
//!                                                                   → event lines
//! POST {server}/{endpoint}/send    body: event lines, "\n"-terminated, streamed
//! ```
//!
//! # Streamed Uploads
//!
//! `/send` carries every event pushed in one cycle. The body is fed from a
//! bounded channel while the request is in flight, so memory stays bounded by
//! the channel capacity no matter how far behind the peer is.
//!
//! ```text
//! write_event ──► mpsc (bounded) ──► ReceiverStream ──► reqwest Body ──► peer
//!                                                       (spawned request task)
//! ```

use crate::config::LogSyncConfig;
use crate::descriptor::Descriptor;
use crate::discovery::Discovery;
use crate::error::{ReconcileError, Result};
use crate::event::Event;
use crate::http::{http_client, join_url, request_error, status_error};
use crate::metrics;
use crate::range::RangeSet;
use crate::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// The remote side of a log sync.
pub trait LogPeer: Send + Sync + 'static {
    /// Human-readable label for logs.
    fn describe(&self) -> String;

    /// The peer's descriptor for one log. Unknown logs come back empty.
    fn query(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor>;

    /// The peer's descriptors for every log it holds for `owner_id`.
    fn query_all(&self, owner_id: &str) -> BoxFuture<'_, Vec<Descriptor>>;

    /// Events the peer holds for the log, restricted to `ranges`.
    fn receive(&self, owner_id: &str, log_id: i64, ranges: &RangeSet)
        -> BoxFuture<'_, Vec<Event>>;

    /// Start one outbound transfer. All logs pushed in a cycle share it.
    fn open_upload(&self) -> BoxFuture<'_, Box<dyn EventUpload>>;
}

/// One outbound event transfer.
///
/// Events are delivered at least once: a transfer that fails part way may
/// already have handed some events to the peer.
pub trait EventUpload: Send {
    fn write_event<'a>(&'a mut self, event: &'a Event) -> BoxFuture<'a, ()>;

    /// Flush and close the transfer, returning how many events were written.
    fn finish(self: Box<Self>) -> BoxFuture<'static, usize>;
}

fn epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn body_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines().filter(|line| !line.is_empty())
}

/// [`LogPeer`] speaking the wire protocol over HTTP.
pub struct HttpLogPeer {
    client: reqwest::Client,
    discovery: Arc<dyn Discovery>,
    endpoint: String,
    owner_id_param: String,
    request_timeout: Duration,
    upload_buffer: usize,
    /// Consecutive failed requests
    failure_count: AtomicU64,
    /// Last successful request (epoch millis, 0 = never)
    last_success: AtomicU64,
}

impl HttpLogPeer {
    pub fn new(client: reqwest::Client, discovery: Arc<dyn Discovery>, config: &LogSyncConfig) -> Self {
        Self {
            client,
            discovery,
            endpoint: config.endpoint.clone(),
            owner_id_param: config.owner_id_param.clone(),
            request_timeout: config.request_timeout_duration(),
            upload_buffer: config.upload_buffer.max(1),
            failure_count: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
        }
    }

    /// Build on the shared client from [`crate::http::init_http_client`].
    pub fn from_config(discovery: Arc<dyn Discovery>, config: &LogSyncConfig) -> Result<Self> {
        Ok(Self::new(http_client()?, discovery, config))
    }

    /// Get consecutive failure count.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Get milliseconds since last success (`u64::MAX` if never).
    pub fn millis_since_success(&self) -> u64 {
        let last = self.last_success.load(Ordering::Acquire);
        if last == 0 {
            return u64::MAX;
        }
        epoch_millis().saturating_sub(last)
    }

    fn base_url(&self) -> Result<String> {
        self.discovery
            .server_url()
            .ok_or_else(|| ReconcileError::PeerConnection {
                peer: "<unresolved>".to_string(),
                message: "no server address known".to_string(),
            })
    }

    fn url(&self, base: &str, operation: &str) -> String {
        join_url(base, &format!("{}/{}", self.endpoint, operation))
    }

    fn record_outcome(&self, operation: &str, success: bool, elapsed: Duration) {
        metrics::record_peer_request(operation, success, elapsed);
        if success {
            self.failure_count.store(0, Ordering::Release);
            self.last_success.store(epoch_millis(), Ordering::Release);
        } else {
            self.failure_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    async fn get_lines(&self, operation: &str, query: &[(&str, String)]) -> Result<Vec<String>> {
        let base = self.base_url()?;
        let url = self.url(&base, operation);
        let start = Instant::now();

        let result: Result<Vec<String>> = async {
            let response = self
                .client
                .get(&url)
                .query(query)
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(|e| request_error(&base, operation, e))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| request_error(&base, operation, e))?;

            if !status.is_success() {
                return Err(status_error(operation, status, &body));
            }
            Ok(body_lines(&body).map(str::to_string).collect())
        }
        .await;

        self.record_outcome(operation, result.is_ok(), start.elapsed());
        if let Err(e) = &result {
            debug!(
                url = %url,
                failures = self.failure_count(),
                error = %e,
                "Peer request failed"
            );
        }
        result
    }
}

impl LogPeer for HttpLogPeer {
    fn describe(&self) -> String {
        match self.discovery.server_url() {
            Some(url) => join_url(&url, &self.endpoint),
            None => format!("<unresolved>/{}", self.endpoint),
        }
    }

    fn query(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let query = [
                (self.owner_id_param.as_str(), owner_id),
                ("logid", log_id.to_string()),
            ];
            let lines = self
                .get_lines("query", &query)
                .await
                .map_err(|e| e.into_protocol(Some(log_id)))?;

            let line = lines
                .first()
                .ok_or_else(|| ReconcileError::protocol(log_id, "empty descriptor response"))?;
            line.parse::<Descriptor>()
                .map_err(|e| e.into_protocol(Some(log_id)))
        })
    }

    fn query_all(&self, owner_id: &str) -> BoxFuture<'_, Vec<Descriptor>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let query = [(self.owner_id_param.as_str(), owner_id)];
            let lines = self.get_lines("query", &query).await?;
            lines
                .iter()
                .map(|line| line.parse::<Descriptor>().map_err(|e| e.into_protocol(None)))
                .collect()
        })
    }

    fn receive(
        &self,
        owner_id: &str,
        log_id: i64,
        ranges: &RangeSet,
    ) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        let range = ranges.to_representation();
        Box::pin(async move {
            let query = [
                (self.owner_id_param.as_str(), owner_id),
                ("logid", log_id.to_string()),
                ("range", range),
            ];
            let lines = self
                .get_lines("receive", &query)
                .await
                .map_err(|e| e.into_protocol(Some(log_id)))?;
            lines
                .iter()
                .map(|line| line.parse::<Event>().map_err(|e| e.into_protocol(Some(log_id))))
                .collect()
        })
    }

    fn open_upload(&self) -> BoxFuture<'_, Box<dyn EventUpload>> {
        Box::pin(async move {
            let base = self.base_url()?;
            let url = self.url(&base, "send");

            let (tx, rx) = mpsc::channel::<std::result::Result<String, std::io::Error>>(self.upload_buffer);
            let request = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)));

            let peer = base.clone();
            let handle = tokio::spawn(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| request_error(&peer, "send", e))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error("send", status, &body));
                }
                Ok(())
            });

            debug!(url = %url, "Opened event upload");
            let upload: Box<dyn EventUpload> = Box::new(HttpUpload {
                tx: Some(tx),
                handle: Some(handle),
                peer: base,
                written: 0,
                started: Instant::now(),
            });
            Ok(upload)
        })
    }
}

/// Streamed `/send` request in progress.
struct HttpUpload {
    tx: Option<mpsc::Sender<std::result::Result<String, std::io::Error>>>,
    handle: Option<JoinHandle<Result<()>>>,
    peer: String,
    written: usize,
    started: Instant,
}

impl HttpUpload {
    fn closed_early(&self) -> ReconcileError {
        ReconcileError::PeerConnection {
            peer: self.peer.clone(),
            message: format!("upload closed after {} events", self.written),
        }
    }

    /// The request task ended before we finished writing; surface its error.
    async fn request_failure(&mut self) -> ReconcileError {
        let Some(handle) = self.handle.take() else {
            return self.closed_early();
        };
        match handle.await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => self.closed_early(),
            Err(join) => ReconcileError::Internal(format!("upload task failed: {}", join)),
        }
    }
}

impl EventUpload for HttpUpload {
    fn write_event<'a>(&'a mut self, event: &'a Event) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(tx) = &self.tx else {
                return Err(self.closed_early());
            };
            let line = format!("{}\n", event);
            if tx.send(Ok(line)).await.is_err() {
                self.tx = None;
                return Err(self.request_failure().await);
            }
            self.written += 1;
            Ok(())
        })
    }

    fn finish(mut self: Box<Self>) -> BoxFuture<'static, usize> {
        Box::pin(async move {
            // Dropping the sender ends the body stream
            self.tx = None;

            let Some(handle) = self.handle.take() else {
                return Err(self.closed_early());
            };
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(ReconcileError::Internal(format!("upload task failed: {}", join))),
            };
            metrics::record_peer_request("send", result.is_ok(), self.started.elapsed());

            match result {
                Ok(()) => {
                    debug!(peer = %self.peer, events = self.written, "Event upload complete");
                    Ok(self.written)
                }
                Err(e) => {
                    warn!(peer = %self.peer, events = self.written, error = %e, "Event upload failed");
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;

    fn peer(discovery: Arc<dyn Discovery>) -> HttpLogPeer {
        HttpLogPeer::new(reqwest::Client::new(), discovery, &LogSyncConfig::for_testing())
    }

    #[test]
    fn test_body_lines_skips_blank_lines() {
        let body = "a,1,1-3\r\n\nb,2,\n";
        let lines: Vec<&str> = body_lines(body).collect();
        assert_eq!(lines, vec!["a,1,1-3", "b,2,"]);
    }

    #[test]
    fn test_urls_follow_endpoint() {
        let p = peer(Arc::new(StaticDiscovery::new("http://server:8080/")));
        assert_eq!(p.url("http://server:8080/", "query"), "http://server:8080/auditlog/query");
        assert_eq!(p.describe(), "http://server:8080/auditlog");
    }

    #[test]
    fn test_new_peer_has_no_history() {
        let p = peer(Arc::new(StaticDiscovery::new("http://server:8080")));
        assert_eq!(p.failure_count(), 0);
        assert_eq!(p.millis_since_success(), u64::MAX);
    }

    #[tokio::test]
    async fn test_unresolved_server_is_a_connection_error() {
        let p = peer(Arc::new(StaticDiscovery::default()));
        let err = p.query("gw-1", 1).await.unwrap_err();
        assert!(matches!(err, ReconcileError::PeerConnection { .. }));
        assert!(err.is_retryable());

        assert!(p.open_upload().await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        // Port 9 (discard) on localhost is closed on any sane test machine
        let p = peer(Arc::new(StaticDiscovery::new("http://127.0.0.1:9")));
        let err = p.query_all("gw-1").await.unwrap_err();
        assert!(err.is_retryable(), "expected transient error, got {err:?}");
        assert_eq!(p.failure_count(), 1);
    }
}
