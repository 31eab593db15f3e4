//! In-process HTTP server for transport tests.
//!
//! Serves a [`LogEndpoint`] under `/auditlog/*` and a [`RepositoryEndpoint`]
//! under `/repository/*` on an ephemeral port, so the real HTTP clients can
//! be driven end to end.

use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use reconciliation_engine::endpoint::render_lines;
use reconciliation_engine::{
    LogEndpoint, MemoryLogStore, RangeSet, ReconcileError, Repository, RepositoryEndpoint,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type Params = Query<HashMap<String, String>>;

#[derive(Clone)]
struct AppState {
    logs: Arc<LogEndpoint<MemoryLogStore>>,
    repository: Arc<RepositoryEndpoint>,
    reject_queries: Arc<AtomicBool>,
    uploads: Arc<AtomicUsize>,
}

/// Running server; stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryLogStore>,
    reject_queries: Arc<AtomicBool>,
    uploads: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(store: Arc<MemoryLogStore>, repository: Arc<dyn Repository>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = AppState {
            logs: Arc::new(LogEndpoint::new(Arc::clone(&store))),
            repository: Arc::new(RepositoryEndpoint::new(repository)),
            reject_queries: Arc::new(AtomicBool::new(false)),
            uploads: Arc::new(AtomicUsize::new(0)),
        };
        let reject_queries = Arc::clone(&state.reject_queries);
        let uploads = Arc::clone(&state.uploads);

        let app = Router::new()
            .route("/auditlog/query", get(query))
            .route("/auditlog/receive", get(receive))
            .route("/auditlog/send", post(send))
            .route("/repository/:operation", get(repository_op).post(repository_op))
            .with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            store,
            reject_queries,
            uploads,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer every `/query` with 400.
    pub fn reject_queries(&self, reject: bool) {
        self.reject_queries.store(reject, Ordering::SeqCst);
    }

    /// `/send` requests received so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

fn failure(error: ReconcileError) -> Response {
    match error {
        ReconcileError::Protocol { .. } | ReconcileError::InvalidInput(_) => bad_request(error.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

async fn query(State(state): State<AppState>, Query(params): Params) -> Response {
    if state.reject_queries.load(Ordering::SeqCst) {
        return bad_request("queries disabled");
    }
    let Some(owner) = params.get("tid") else {
        return bad_request("missing tid");
    };

    let result = match params.get("logid").map(|raw| raw.parse::<i64>()) {
        None => state.logs.query_all(owner).await,
        Some(Ok(log_id)) => state.logs.query(owner, log_id).await.map(|d| vec![d]),
        Some(Err(_)) => return bad_request("logid is not a number"),
    };
    match result {
        Ok(descriptors) => render_lines(&descriptors).into_response(),
        Err(e) => failure(e),
    }
}

async fn receive(State(state): State<AppState>, Query(params): Params) -> Response {
    let (Some(owner), Some(log_id), Some(range)) =
        (params.get("tid"), params.get("logid"), params.get("range"))
    else {
        return bad_request("missing parameter");
    };
    let Ok(log_id) = log_id.parse::<i64>() else {
        return bad_request("logid is not a number");
    };
    let ranges = match range.parse::<RangeSet>() {
        Ok(ranges) => ranges,
        Err(e) => return failure(e),
    };

    match state.logs.receive(owner, log_id, &ranges).await {
        Ok(events) => render_lines(&events).into_response(),
        Err(e) => failure(e),
    }
}

async fn send(State(state): State<AppState>, body: Bytes) -> Response {
    state.uploads.fetch_add(1, Ordering::SeqCst);
    match state.logs.send(&body[..]).await {
        Ok(stored) => stored.to_string().into_response(),
        Err(e) => failure(e),
    }
}

async fn repository_op(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let response = state
        .repository
        .handle_raw(&operation, query.as_deref().unwrap_or(""), body.to_vec())
        .await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, response.body).into_response()
}
