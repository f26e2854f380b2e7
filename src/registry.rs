//! Adapter registry — lifecycle state machine and deferred sync queue.
//!
//! Each registered language owns one [`AdapterRecord`]. Records move
//! through `Registering → {Ready | Initializing → {Ready | Failed}}`,
//! and any non-disposed state to `Disposed`. Document-sync operations
//! observed before `Ready` queue in FIFO order and flush exactly once,
//! with no await between the state change and the flush.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::adapter::{DisposeHandler, HandlerTable, SyncOp};
use crate::error::HubError;
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdapterState {
    Registering,
    Initializing,
    Ready,
    Failed,
    Disposed,
}

impl AdapterState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Registering => "registering",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        }
    }
}

/// Cleanup registered by an adapter via its context.
pub(crate) type Disposable = Box<dyn FnOnce() + Send>;

pub(crate) struct AdapterRecord {
    pub language_id: String,
    #[allow(dead_code)]
    pub display_name: String,
    #[allow(dead_code)]
    pub capabilities: serde_json::Map<String, Value>,
    pub state: AdapterState,
    pub handlers: Arc<HandlerTable>,
    pub queue: Vec<SyncOp>,
    pub sync_tx: mpsc::UnboundedSender<SyncOp>,
    pub disposables: Vec<Disposable>,
    pub dispose_handler: Option<DisposeHandler>,
    #[allow(dead_code)]
    pub registered_at: SystemTime,
    pub initialized_at: Option<SystemTime>,
}

impl AdapterRecord {
    /// Deliver a sync op: forward when ready, queue while the adapter is
    /// still coming up, drop otherwise.
    pub fn deliver(&mut self, op: SyncOp) {
        match self.state {
            AdapterState::Ready => {
                let _ = self.sync_tx.send(op);
            }
            AdapterState::Registering | AdapterState::Initializing => self.queue.push(op),
            AdapterState::Failed | AdapterState::Disposed => {}
        }
    }

    /// Transition to `Ready` and flush the queue in arrival order.
    pub fn flush_ready(&mut self) {
        for op in self.queue.drain(..) {
            let _ = self.sync_tx.send(op);
        }
        self.state = AdapterState::Ready;
        self.initialized_at = Some(SystemTime::now());
    }

    #[cfg(test)]
    pub(crate) fn for_tests(language_id: &str) -> Self {
        let (sync_tx, _sync_rx) = mpsc::unbounded_channel();
        Self {
            language_id: language_id.to_string(),
            display_name: language_id.to_string(),
            capabilities: serde_json::Map::new(),
            state: AdapterState::Ready,
            handlers: Arc::new(HandlerTable {
                requests: std::collections::HashMap::new(),
                sync: None,
            }),
            queue: Vec::new(),
            sync_tx,
            disposables: Vec::new(),
            dispose_handler: None,
            registered_at: SystemTime::now(),
            initialized_at: Some(SystemTime::now()),
        }
    }
}

/// Readiness gate for routed operations.
pub(crate) fn ensure_ready(record: &AdapterRecord) -> Result<(), HubError> {
    match record.state {
        AdapterState::Ready => Ok(()),
        AdapterState::Failed => Err(HubError::LanguageFailed {
            language: record.language_id.clone(),
        }),
        AdapterState::Disposed => Err(HubError::unknown_language(&record.language_id)),
        AdapterState::Registering | AdapterState::Initializing => {
            Err(HubError::LanguageNotReady {
                language: record.language_id.clone(),
                state: record.state.label(),
            })
        }
    }
}

/// Spawn the per-adapter dispatch task: sync ops are handled strictly in
/// order; handler failures go to the adapter-error channel.
pub(crate) fn spawn_sync_dispatch(
    language_id: String,
    handlers: Arc<HandlerTable>,
    bus: EventBus,
) -> mpsc::UnboundedSender<SyncOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncOp>();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let Some(handler) = handlers.sync.clone() else {
                continue;
            };
            let operation = op.name();
            if let Err(err) = handler(op).await {
                tracing::warn!(
                    language = %language_id,
                    operation,
                    "document sync handler failed: {err:#}"
                );
                bus.emit_adapter_error(&language_id, operation, &err.to_string());
            }
        }
    });
    tx
}

/// Outcome handle for `register_language`.
///
/// The registration work starts immediately; awaiting this future
/// observes the initialization result. Hosts may issue document
/// operations before awaiting — they queue until the adapter is ready.
#[derive(Debug)]
pub struct Registration {
    language_id: String,
    handle: Option<tokio::task::JoinHandle<Result<(), HubError>>>,
}

impl Registration {
    pub(crate) fn ready(language_id: String) -> Self {
        Self {
            language_id,
            handle: None,
        }
    }

    pub(crate) fn pending(
        language_id: String,
        handle: tokio::task::JoinHandle<Result<(), HubError>>,
    ) -> Self {
        Self {
            language_id,
            handle: Some(handle),
        }
    }

    /// The language this registration belongs to.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }
}

impl Future for Registration {
    type Output = Result<(), HubError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(handle) = this.handle.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_err)) => Poll::Ready(Err(HubError::adapter(
                this.language_id.clone(),
                "initialize",
                anyhow::anyhow!("initialization task failed: {join_err}"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
