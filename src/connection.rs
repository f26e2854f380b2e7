//! JSON-RPC connection — drives one duplex byte stream.
//!
//! A [`Connection`] owns a writer task (fed over a channel) and a reader
//! task that classifies every decoded frame: responses resolve pending
//! requests, server-initiated requests and notifications surface as
//! [`ConnectionEvent`]s for the owner to handle. Closing is idempotent
//! and fails every pending request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{FrameError, FrameReader, FrameWriter};
use crate::error::{HubError, RpcError};

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Inbound traffic surfaced to the connection owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Server-initiated request. The owner must write a response back via
    /// [`Connection::send_response`] or [`Connection::send_error_response`].
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Server notification (no id).
    Notification { method: String, params: Value },
    /// The connection closed (EOF, stream error, or disposal). Emitted once.
    Closed,
}

type PendingSender = oneshot::Sender<Result<Value, HubError>>;

struct ConnectionInner {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    pending: Mutex<HashMap<u64, PendingSender>>,
    closed: AtomicBool,
}

impl ConnectionInner {
    fn fail_pending(&self, make: &dyn Fn() -> HubError) {
        let entries: Vec<PendingSender> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in entries {
            let _ = tx.send(Err(make()));
        }
    }

    /// Idempotent close: fail all pending entries, emit `Closed` once,
    /// stop the writer.
    fn close(&self, make: &dyn Fn() -> HubError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fail_pending(make);
        let _ = self.events_tx.send(ConnectionEvent::Closed);
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
    }
}

/// One duplex JSON-RPC stream.
///
/// Outbound request ids are non-negative integers starting at 0,
/// strictly increasing per connection.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    next_id: AtomicU64,
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Wrap a readable/writable stream pair. Returns the connection and
    /// the inbound event stream.
    pub fn new<R, W>(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("connection write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let inner = Arc::new(ConnectionInner {
            writer_tx,
            events_tx,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let reader_inner = inner.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => Self::dispatch_frame(&reader_inner, &frame),
                    Ok(None) => {
                        tracing::debug!("connection reached EOF");
                        reader_inner.close(&HubError::connection_closed);
                        break;
                    }
                    Err(FrameError::Protocol(reason)) => {
                        // The stream is still frame-aligned; in-flight
                        // requests can no longer be trusted, but new
                        // traffic may proceed.
                        tracing::warn!(%reason, "protocol error on connection");
                        reader_inner.fail_pending(&|| HubError::Protocol {
                            reason: reason.clone(),
                        });
                    }
                    Err(FrameError::Io(e)) => {
                        tracing::warn!(error = %e, "connection stream error");
                        reader_inner.close(&HubError::connection_closed);
                        break;
                    }
                }
            }
        });

        (
            Self {
                inner,
                next_id: AtomicU64::new(0),
                reader_handle,
                writer_handle,
            },
            events_rx,
        )
    }

    /// Classify one decoded frame.
    ///
    /// `id` with `result`/`error` resolves a pending request; `id` with
    /// `method` is a server-initiated request; `method` alone is a
    /// notification; anything else is dropped.
    fn dispatch_frame(inner: &ConnectionInner, frame: &Value) {
        let id = frame.get("id");
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(String::from);
        let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method, has_result_or_error) {
            (Some(id_val), None, true) => {
                let Some(id) = id_val.as_u64() else { return };
                let sender = inner.pending.lock().unwrap().remove(&id);
                if let Some(tx) = sender {
                    let outcome = match frame.get("error") {
                        Some(error) => Err(HubError::Rpc(RpcError::from_wire(error))),
                        None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
                // Unknown or timed-out ids are silently discarded.
            }
            (Some(id_val), Some(method), _) => {
                let _ = inner.events_tx.send(ConnectionEvent::Request {
                    id: id_val.clone(),
                    method,
                    params: frame.get("params").cloned().unwrap_or(Value::Null),
                });
            }
            (None, Some(method), _) => {
                let _ = inner.events_tx.send(ConnectionEvent::Notification {
                    method,
                    params: frame.get("params").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {
                tracing::trace!("dropping unclassifiable JSON-RPC frame");
            }
        }
    }

    fn enqueue(&self, frame: Value) -> Result<(), HubError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(HubError::connection_closed());
        }
        self.inner
            .writer_tx
            .send(WriterCommand::Send(frame))
            .map_err(|_| HubError::connection_closed())
    }

    /// Send a request and await its response, bounded by `timeout`.
    ///
    /// On timeout the pending entry is removed and a late response is
    /// silently discarded.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, HubError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(HubError::connection_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        // A close racing the insert above must not strand the entry.
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(HubError::connection_closed());
        }

        let mut frame = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if !params.is_null() {
            frame["params"] = params;
        }
        if self
            .inner
            .writer_tx
            .send(WriterCommand::Send(frame))
            .is_err()
        {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(HubError::connection_closed());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HubError::connection_closed()),
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(HubError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Send a notification. Never blocks.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), HubError> {
        let mut frame = json!({"jsonrpc": "2.0", "method": method});
        if !params.is_null() {
            frame["params"] = params;
        }
        self.enqueue(frame)
    }

    /// Reply to a server-initiated request.
    pub fn send_response(&self, id: Value, result: Value) -> Result<(), HubError> {
        self.enqueue(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }

    /// Reply to a server-initiated request with an error.
    pub fn send_error_response(
        &self,
        id: Value,
        code: i64,
        message: &str,
    ) -> Result<(), HubError> {
        self.enqueue(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
    }

    /// Whether the connection has closed (EOF, error, or disposal).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dispose the connection: fail all pending requests with
    /// "connection disposed" and stop both tasks. Idempotent.
    pub fn dispose(&self) {
        self.inner.close(&HubError::connection_disposed);
        self.reader_handle.abort();
    }
}
