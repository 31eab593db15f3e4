// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The answering side of the log protocol.
//!
//! [`LogEndpoint`] implements the four log operations on top of a
//! [`LogStore`] without tying them to an HTTP framework: the embedding
//! server maps `/query`, `/receive` and `/send` onto these methods and writes
//! the results with [`render_lines`].
//!
//! [`LoopbackPeer`] wraps an endpoint as a [`LogPeer`], so a sync task can
//! reconcile against another store in the same process. Its uploads still
//! go through a byte stream and the line parser, exactly as they would over
//! the wire.

use crate::descriptor::Descriptor;
use crate::error::{ReconcileError, Result};
use crate::event::Event;
use crate::log_store::LogStore;
use crate::metrics;
use crate::peer::{EventUpload, LogPeer};
use crate::range::RangeSet;
use crate::BoxFuture;
use std::fmt::Display;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events appended per store call while ingesting an upload.
const DEFAULT_INGEST_BATCH: usize = 500;

/// Longest upload line accepted, terminator excluded.
const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Byte capacity of the in-process pipe behind a loopback upload.
const LOOPBACK_PIPE_BYTES: usize = 64 * 1024;

/// One item per line, each `\n`-terminated.
pub fn render_lines<T: Display>(items: &[T]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item.to_string());
        out.push('\n');
    }
    out
}

/// Server half of the log protocol.
pub struct LogEndpoint<S: LogStore> {
    store: Arc<S>,
    ingest_batch: usize,
    max_line_bytes: usize,
}

impl<S: LogStore> LogEndpoint<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ingest_batch: DEFAULT_INGEST_BATCH,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Override the longest upload line accepted.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Override how many uploaded events are appended per store call.
    pub fn with_ingest_batch(mut self, ingest_batch: usize) -> Self {
        self.ingest_batch = ingest_batch.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// `GET query?owner&logid`: what this side holds for one log.
    pub async fn query(&self, owner_id: &str, log_id: i64) -> Result<Descriptor> {
        self.store.descriptor(owner_id, log_id).await
    }

    /// `GET query?owner`: one descriptor per log held for the owner.
    pub async fn query_all(&self, owner_id: &str) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        for log_id in self.store.list_log_ids(owner_id).await? {
            descriptors.push(self.store.descriptor(owner_id, log_id).await?);
        }
        Ok(descriptors)
    }

    /// `GET receive?owner&logid&range`: the held events within `ranges`.
    pub async fn receive(&self, owner_id: &str, log_id: i64, ranges: &RangeSet) -> Result<Vec<Event>> {
        self.store.get_ranges(owner_id, log_id, ranges).await
    }

    /// `POST send`: ingest newline-delimited events.
    ///
    /// Blank lines are ignored. A malformed or over-long line stops ingestion
    /// with a protocol error; everything before it has already been stored.
    pub async fn send<R>(&self, mut reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut buf: Vec<u8> = Vec::new();
        let mut batch: Vec<Event> = Vec::with_capacity(self.ingest_batch);
        let mut stored = 0usize;
        let mut line_no = 0usize;

        let outcome: Result<()> = loop {
            let line = match self.next_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => {
                    break Err(match e {
                        LineError::Io(e) => e.into(),
                        LineError::TooLong => ReconcileError::Protocol {
                            log_id: None,
                            message: format!(
                                "line {}: longer than {} bytes",
                                line_no + 1,
                                self.max_line_bytes
                            ),
                        },
                        LineError::NotUtf8 => ReconcileError::Protocol {
                            log_id: None,
                            message: format!("line {}: not valid UTF-8", line_no + 1),
                        },
                    })
                }
            };
            line_no += 1;
            if line.is_empty() {
                continue;
            }

            match line.parse::<Event>() {
                Ok(event) => {
                    batch.push(event);
                    if batch.len() >= self.ingest_batch {
                        stored += self.store.append(std::mem::take(&mut batch)).await?;
                    }
                }
                Err(e) => {
                    break Err(ReconcileError::Protocol {
                        log_id: None,
                        message: format!("line {}: {}", line_no, e),
                    })
                }
            }
        };

        if !batch.is_empty() {
            stored += self.store.append(batch).await?;
        }
        metrics::record_events_accepted(stored);

        match outcome {
            Ok(()) => {
                debug!(events = stored, lines = line_no, "Ingested event upload");
                Ok(stored)
            }
            Err(e) => {
                warn!(events = stored, line = line_no, error = %e, "Event upload rejected");
                Err(e)
            }
        }
    }

    /// Read one line of at most `max_line_bytes`, without `\n` or `\r\n`.
    async fn next_line<R>(&self, reader: &mut R, buf: &mut Vec<u8>) -> std::result::Result<Option<String>, LineError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        buf.clear();
        // Headroom for a `\r\n` terminator
        let limit = u64::try_from(self.max_line_bytes).unwrap_or(u64::MAX).saturating_add(2);
        let read = reader
            .take(limit)
            .read_until(b'\n', buf)
            .await
            .map_err(LineError::Io)?;
        if read == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > self.max_line_bytes {
            return Err(LineError::TooLong);
        }

        String::from_utf8(std::mem::take(buf))
            .map(Some)
            .map_err(|_| LineError::NotUtf8)
    }
}

enum LineError {
    Io(std::io::Error),
    TooLong,
    NotUtf8,
}

/// [`LogPeer`] backed by an in-process [`LogEndpoint`].
pub struct LoopbackPeer<S: LogStore> {
    endpoint: Arc<LogEndpoint<S>>,
    name: String,
}

impl<S: LogStore> LoopbackPeer<S> {
    pub fn new(endpoint: Arc<LogEndpoint<S>>) -> Self {
        Self {
            endpoint,
            name: "loopback".to_string(),
        }
    }

    /// Loopback peer over a fresh endpoint for `store`.
    pub fn for_store(store: Arc<S>) -> Self {
        Self::new(Arc::new(LogEndpoint::new(store)))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn endpoint(&self) -> &Arc<LogEndpoint<S>> {
        &self.endpoint
    }
}

impl<S: LogStore> LogPeer for LoopbackPeer<S> {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn query(&self, owner_id: &str, log_id: i64) -> BoxFuture<'_, Descriptor> {
        let owner_id = owner_id.to_string();
        Box::pin(async move { self.endpoint.query(&owner_id, log_id).await })
    }

    fn query_all(&self, owner_id: &str) -> BoxFuture<'_, Vec<Descriptor>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move { self.endpoint.query_all(&owner_id).await })
    }

    fn receive(
        &self,
        owner_id: &str,
        log_id: i64,
        ranges: &RangeSet,
    ) -> BoxFuture<'_, Vec<Event>> {
        let owner_id = owner_id.to_string();
        let ranges = ranges.clone();
        Box::pin(async move { self.endpoint.receive(&owner_id, log_id, &ranges).await })
    }

    fn open_upload(&self) -> BoxFuture<'_, Box<dyn EventUpload>> {
        Box::pin(async move {
            let (writer, reader) = tokio::io::duplex(LOOPBACK_PIPE_BYTES);
            let endpoint = Arc::clone(&self.endpoint);
            let handle = tokio::spawn(async move { endpoint.send(BufReader::new(reader)).await });

            let upload: Box<dyn EventUpload> = Box::new(LoopbackUpload {
                writer: Some(writer),
                handle: Some(handle),
                peer: self.name.clone(),
                written: 0,
            });
            Ok(upload)
        })
    }
}

struct LoopbackUpload {
    writer: Option<DuplexStream>,
    handle: Option<JoinHandle<Result<usize>>>,
    peer: String,
    written: usize,
}

impl LoopbackUpload {
    fn closed_early(&self) -> ReconcileError {
        ReconcileError::PeerConnection {
            peer: self.peer.clone(),
            message: format!("upload closed after {} events", self.written),
        }
    }

    async fn join(&mut self) -> Result<usize> {
        let Some(handle) = self.handle.take() else {
            return Err(self.closed_early());
        };
        match handle.await {
            Ok(result) => result,
            Err(join) => Err(ReconcileError::Internal(format!("loopback ingest failed: {}", join))),
        }
    }
}

impl EventUpload for LoopbackUpload {
    fn write_event<'a>(&'a mut self, event: &'a Event) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(writer) = self.writer.as_mut() else {
                return Err(self.closed_early());
            };
            let line = format!("{}\n", event);
            if writer.write_all(line.as_bytes()).await.is_err() {
                // The ingest side hung up; report why
                self.writer = None;
                return Err(match self.join().await {
                    Err(e) => e,
                    Ok(_) => self.closed_early(),
                });
            }
            self.written += 1;
            Ok(())
        })
    }

    fn finish(mut self: Box<Self>) -> BoxFuture<'static, usize> {
        Box::pin(async move {
            if let Some(mut writer) = self.writer.take() {
                writer.shutdown().await?;
            }
            self.join().await?;
            Ok(self.written)
        })
    }
}
