//! PolyClient — the host-facing multiplexer facade.
//!
//! One client owns the document store, the adapter registry, and the
//! event bus. Host calls resolve to exactly one adapter; notification
//! shaped operations (document sync, `send_notification`) never block
//! the caller, while feature requests await the adapter handler.
//!
//! Internal state lives behind a mutex that is never held across an
//! await, so the observable behavior matches a single-threaded event
//! loop: state changes and queue flushes are atomic with respect to
//! host calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde_json::{Value, json};

use crate::adapter::{LanguageAdapter, RequestHandler, SyncOp};
use crate::context::{AdapterContext, RequestContext};
use crate::diagnostics::{DiagnosticsCache, DiagnosticsSnapshot};
use crate::documents::DocumentStore;
use crate::error::HubError;
use crate::events::{EventBus, Subscription, guarded};
use crate::registry::{self, AdapterRecord, AdapterState, Registration, ensure_ready};
use crate::router::{self, Operation};
use crate::types::{
    AdapterErrorEvent, ClientOptions, DiagnosticsEvent, DocumentChange, TextDocument,
    WorkspaceEvent,
};
use crate::uri;
use crate::workspace_edit::{self, ApplyEditResult};

pub(crate) struct ClientState {
    pub documents: DocumentStore,
    pub adapters: HashMap<String, AdapterRecord>,
    pub diagnostics: DiagnosticsCache,
    pub disposed: bool,
}

impl ClientState {
    pub(crate) fn new() -> Self {
        Self {
            documents: DocumentStore::new(),
            adapters: HashMap::new(),
            diagnostics: DiagnosticsCache::new(),
            disposed: false,
        }
    }
}

pub(crate) struct Shared {
    pub state: Mutex<ClientState>,
    pub bus: EventBus,
    pub options: ClientOptions,
}

/// Multiplexing LSP client hub.
///
/// Routes host calls to per-language adapters, keeps the authoritative
/// document store, applies workspace edits, and fans server-originated
/// messages out to subscribers.
pub struct PolyClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PolyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyClient").finish_non_exhaustive()
    }
}

impl PolyClient {
    /// Build a client from options.
    pub fn new(options: ClientOptions) -> Result<Self, HubError> {
        if options.transport != "stdio" {
            return Err(HubError::InvalidOptions {
                reason: format!("unsupported transport '{}'", options.transport),
            });
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ClientState::new()),
                bus: EventBus::new(),
                options,
            }),
        })
    }

    /// Build a client with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ClientOptions::default()).expect("default options are valid")
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, ClientState>, HubError> {
        let state = self.shared.state.lock().unwrap();
        if state.disposed {
            return Err(HubError::ClientDisposed);
        }
        Ok(state)
    }

    // ── adapter lifecycle ──────────────────────────────────────────────

    /// Register a per-language adapter.
    ///
    /// Returns a [`Registration`] future: the adapter's `initialize`
    /// starts immediately, and document operations issued before the
    /// future resolves are queued and flushed in order once the adapter
    /// is ready. Awaiting observes the initialization outcome.
    pub fn register_language(&self, adapter: LanguageAdapter) -> Result<Registration, HubError> {
        let parts = adapter.into_parts();
        if parts.language_id.trim().is_empty() {
            return Err(HubError::InvalidAdapter {
                reason: "languageId must be a non-empty string".to_string(),
            });
        }
        let language_id = parts.language_id.clone();

        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return Err(HubError::ClientDisposed);
        }
        if state.adapters.contains_key(&language_id) {
            return Err(HubError::LanguageExists {
                language: language_id,
            });
        }

        let sync_tx = registry::spawn_sync_dispatch(
            language_id.clone(),
            parts.table.clone(),
            self.shared.bus.clone(),
        );
        let has_initialize = parts.initialize.is_some();
        let record = AdapterRecord {
            language_id: language_id.clone(),
            display_name: parts.display_name,
            capabilities: parts.capabilities,
            state: if has_initialize {
                AdapterState::Initializing
            } else {
                AdapterState::Ready
            },
            handlers: parts.table,
            queue: Vec::new(),
            sync_tx,
            disposables: Vec::new(),
            dispose_handler: parts.dispose,
            registered_at: SystemTime::now(),
            initialized_at: if has_initialize {
                None
            } else {
                Some(SystemTime::now())
            },
        };
        state.adapters.insert(language_id.clone(), record);
        drop(state);

        let Some(initialize) = parts.initialize else {
            return Ok(Registration::ready(language_id));
        };

        let ctx = AdapterContext::new(Arc::downgrade(&self.shared), language_id.clone());
        let shared = self.shared.clone();
        let task_language = language_id.clone();
        let handle = tokio::spawn(async move {
            let result = initialize(ctx).await;
            finish_initialization(&shared, &task_language, result)
        });
        Ok(Registration::pending(language_id, handle))
    }

    /// Remove an adapter: drain its queue, run its disposables, and run
    /// its dispose hook. Disposal errors are reported on the error
    /// channel but do not prevent completion.
    pub async fn unregister_language(&self, language_id: &str) -> Result<(), HubError> {
        let mut record = {
            let mut state = self.lock_live()?;
            state
                .adapters
                .remove(language_id)
                .ok_or_else(|| HubError::unknown_language(language_id))?
        };
        record.state = AdapterState::Disposed;
        record.queue.clear();
        self.run_teardown(&mut record).await;
        Ok(())
    }

    async fn run_teardown(&self, record: &mut AdapterRecord) {
        let language_id = record.language_id.clone();
        for cleanup in record.disposables.drain(..) {
            if guarded("disposable", cleanup).is_none() {
                self.shared
                    .bus
                    .emit_adapter_error(&language_id, "dispose", "disposable panicked");
            }
        }
        if let Some(dispose) = record.dispose_handler.take() {
            if let Err(err) = dispose().await {
                tracing::warn!(language = %language_id, "adapter dispose failed: {err:#}");
                self.shared
                    .bus
                    .emit_adapter_error(&language_id, "dispose", &err.to_string());
            }
        }
    }

    // ── document lifecycle ─────────────────────────────────────────────

    /// Open (or replace) a document and notify its owning adapter.
    pub fn open_document(
        &self,
        uri: &str,
        language_id: &str,
        text: impl Into<String>,
        version: i64,
    ) -> Result<(), HubError> {
        let mut state = self.lock_live()?;
        if !state.adapters.contains_key(language_id) {
            return Err(HubError::unknown_language(language_id));
        }
        let document = state.documents.open(uri, language_id, text.into(), version)?;
        if let Some(record) = state.adapters.get_mut(language_id) {
            record.deliver(SyncOp::Open { document });
        }
        Ok(())
    }

    /// Apply an ordered change list at a strictly greater version and
    /// notify the owning adapter with the full resulting text.
    pub fn update_document(
        &self,
        uri: &str,
        version: i64,
        changes: Vec<DocumentChange>,
    ) -> Result<(), HubError> {
        let mut state = self.lock_live()?;
        let document = state.documents.update(uri, version, &changes)?;
        let delivered = if changes.is_empty() {
            vec![DocumentChange::full(document.text())]
        } else {
            changes
        };
        let language = document.language_id().to_string();
        if let Some(record) = state.adapters.get_mut(&language) {
            record.deliver(SyncOp::Update {
                document,
                changes: delivered,
            });
        }
        Ok(())
    }

    /// Close a document. No-op if it is not open.
    pub fn close_document(&self, uri: &str) -> Result<(), HubError> {
        let mut state = self.lock_live()?;
        if let Some(document) = state.documents.close(uri)? {
            let language = document.language_id().to_string();
            if let Some(record) = state.adapters.get_mut(&language) {
                record.deliver(SyncOp::Close {
                    uri: document.uri().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Clone of one open document.
    pub fn document(&self, uri: &str) -> Result<Option<TextDocument>, HubError> {
        let state = self.lock_live()?;
        let key = uri::normalize(uri)?;
        Ok(state.documents.get(&key).cloned())
    }

    // ── feature requests ───────────────────────────────────────────────

    fn resolve_handler(
        &self,
        operation: Operation,
        params: &Value,
    ) -> Result<(String, RequestHandler), HubError> {
        let state = self.lock_live()?;
        let language = router::resolve(&state.adapters, &state.documents, params)?;
        let record = state
            .adapters
            .get(&language)
            .expect("resolved language is registered");
        ensure_ready(record)?;
        let handler = record
            .handlers
            .requests
            .get(&operation)
            .cloned()
            .ok_or_else(|| HubError::FeatureUnsupported {
                language: language.clone(),
                operation: operation.name().to_string(),
            })?;
        Ok((language, handler))
    }

    async fn routed_request(&self, operation: Operation, params: Value) -> Result<Value, HubError> {
        let (language, handler) = self.resolve_handler(operation, &params)?;
        let ctx = RequestContext::new(Arc::downgrade(&self.shared), language.clone());
        match handler(params, ctx).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.shared
                    .bus
                    .emit_adapter_error(&language, operation.name(), &err.to_string());
                Err(HubError::adapter(language, operation.name(), err))
            }
        }
    }

    pub async fn get_completions(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::Completions, params).await
    }

    pub async fn get_hover(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::Hover, params).await
    }

    pub async fn get_definition(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::Definition, params).await
    }

    pub async fn get_references(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::References, params).await
    }

    pub async fn get_code_actions(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::CodeActions, params).await
    }

    pub async fn get_document_highlights(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::DocumentHighlights, params).await
    }

    pub async fn get_document_symbols(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::DocumentSymbols, params).await
    }

    pub async fn rename_symbol(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::Rename, params).await
    }

    pub async fn format_document(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::FormatDocument, params).await
    }

    pub async fn format_range(&self, params: Value) -> Result<Value, HubError> {
        self.routed_request(Operation::FormatRange, params).await
    }

    /// Raw request escape hatch. With two or more adapters registered the
    /// params must carry an explicit `languageId` or an open document URI.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, HubError> {
        let (language, handler) = self.resolve_handler(Operation::SendRequest, &params)?;
        let ctx = RequestContext::new(Arc::downgrade(&self.shared), language.clone());
        let wrapped = json!({ "method": method, "params": params });
        match handler(wrapped, ctx).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.shared
                    .bus
                    .emit_adapter_error(&language, "sendRequest", &err.to_string());
                Err(HubError::adapter(language, "sendRequest", err))
            }
        }
    }

    /// Raw notification escape hatch. Never blocks; handler failures are
    /// reported on the adapter-error channel only.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), HubError> {
        let (language, handler) = self.resolve_handler(Operation::SendNotification, &params)?;
        let ctx = RequestContext::new(Arc::downgrade(&self.shared), language.clone());
        let wrapped = json!({ "method": method, "params": params });
        let bus = self.shared.bus.clone();
        tokio::spawn(async move {
            if let Err(err) = handler(wrapped, ctx).await {
                tracing::warn!(language = %language, "notification handler failed: {err:#}");
                bus.emit_adapter_error(&language, "sendNotification", &err.to_string());
            }
        });
        Ok(())
    }

    // ── workspace edits ────────────────────────────────────────────────

    /// Apply a multi-file edit package to the store, mirroring resulting
    /// changes back to the owning adapters.
    pub fn apply_workspace_edit(&self, edit: &Value) -> Result<ApplyEditResult, HubError> {
        let mut state = self.lock_live()?;
        workspace_edit::apply(&mut state, edit)
    }

    // ── subscriptions ──────────────────────────────────────────────────

    /// Subscribe to diagnostics published for one document.
    pub fn on_diagnostics<F>(&self, uri: &str, listener: F) -> Result<Subscription, HubError>
    where
        F: Fn(&DiagnosticsEvent) + Send + Sync + 'static,
    {
        self.lock_live()?;
        let key = uri::normalize(uri)?;
        Ok(self.shared.bus.on_diagnostics(key, Arc::new(listener)))
    }

    /// Subscribe to workspace events of one kind.
    pub fn on_workspace_event<F>(&self, kind: &str, listener: F) -> Result<Subscription, HubError>
    where
        F: Fn(&WorkspaceEvent) + Send + Sync + 'static,
    {
        self.lock_live()?;
        Ok(self
            .shared
            .bus
            .on_workspace_event(kind.to_string(), Arc::new(listener)))
    }

    /// Subscribe to server notifications of one method. The listener may
    /// return a value to answer unknown server-initiated requests.
    pub fn on_notification<F>(&self, method: &str, listener: F) -> Result<Subscription, HubError>
    where
        F: Fn(&Value, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.lock_live()?;
        Ok(self
            .shared
            .bus
            .on_notification(method.to_string(), Arc::new(listener)))
    }

    /// Subscribe to adapter errors.
    pub fn on_error<F>(&self, listener: F) -> Result<Subscription, HubError>
    where
        F: Fn(&AdapterErrorEvent) + Send + Sync + 'static,
    {
        self.lock_live()?;
        Ok(self.shared.bus.on_error(Arc::new(listener)))
    }

    // ── diagnostics cache ──────────────────────────────────────────────

    /// Snapshot of the last published diagnostics per document.
    pub fn diagnostics_snapshot(&self) -> Result<DiagnosticsSnapshot, HubError> {
        let state = self.lock_live()?;
        Ok(state.diagnostics.snapshot())
    }

    // ── disposal ───────────────────────────────────────────────────────

    /// Tear down every adapter and subscription. Subsequent calls on the
    /// client fail with `ClientDisposed`.
    pub async fn dispose(&self) -> Result<(), HubError> {
        let adapters = {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return Err(HubError::ClientDisposed);
            }
            state.disposed = true;
            state.documents.drain();
            state.diagnostics.clear();
            std::mem::take(&mut state.adapters)
        };

        for (_, mut record) in adapters {
            record.state = AdapterState::Disposed;
            record.queue.clear();
            self.run_teardown(&mut record).await;
        }
        self.shared.bus.clear();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn adapter_context_for_tests(&self, language_id: &str) -> AdapterContext {
        AdapterContext::new(Arc::downgrade(&self.shared), language_id.to_string())
    }
}

/// Runs on the initialization task once the adapter's `initialize`
/// settles. The ready transition and queue flush happen under one lock
/// acquisition, so no document operation can interleave between them.
fn finish_initialization(
    shared: &Arc<Shared>,
    language_id: &str,
    result: anyhow::Result<()>,
) -> Result<(), HubError> {
    match result {
        Ok(()) => {
            let mut state = shared.state.lock().unwrap();
            match state.adapters.get_mut(language_id) {
                Some(record) => {
                    record.flush_ready();
                    Ok(())
                }
                // Unregistered or disposed while initializing.
                None => Err(HubError::ClientDisposed),
            }
        }
        Err(err) => {
            let removed = {
                let mut state = shared.state.lock().unwrap();
                state.adapters.remove(language_id)
            };
            let Some(mut record) = removed else {
                return Err(HubError::ClientDisposed);
            };
            record.state = AdapterState::Failed;
            let message = err.to_string();
            for op in record.queue.drain(..) {
                shared
                    .bus
                    .emit_adapter_error(language_id, op.name(), &message);
            }
            for cleanup in record.disposables.drain(..) {
                let _ = guarded("disposable", cleanup);
            }
            Err(HubError::adapter(language_id, "initialize", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn describe(op: &SyncOp) -> String {
        match op {
            SyncOp::Open { document } => format!("open:{}@{}", document.uri(), document.version()),
            SyncOp::Update { document, .. } => {
                format!("update:{}@{}", document.uri(), document.version())
            }
            SyncOp::Close { uri } => format!("close:{uri}"),
        }
    }

    fn recording_adapter(language: &str, log: CallLog) -> LanguageAdapter {
        LanguageAdapter::new(language).on_document_sync(move |op| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(describe(&op));
                Ok(())
            }
        })
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_rejects_unknown_transport() {
        let err = PolyClient::new(ClientOptions {
            transport: "tcp".to_string(),
            ..ClientOptions::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidOptions");
    }

    #[tokio::test]
    async fn test_register_validates_adapter() {
        let client = PolyClient::with_defaults();
        let err = client
            .register_language(LanguageAdapter::new("  "))
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidAdapter");

        client
            .register_language(LanguageAdapter::new("ts"))
            .unwrap()
            .await
            .unwrap();
        let err = client
            .register_language(LanguageAdapter::new("ts"))
            .unwrap_err();
        assert_eq!(err.kind(), "LanguageExists");
    }

    #[tokio::test]
    async fn test_open_requires_registered_language() {
        let client = PolyClient::with_defaults();
        let err = client
            .open_document("file:///a.ts", "ts", "text", 1)
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownLanguage");
    }

    #[tokio::test]
    async fn test_document_sync_reaches_adapter_in_order() {
        let client = PolyClient::with_defaults();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        client
            .register_language(recording_adapter("ts", log.clone()))
            .unwrap()
            .await
            .unwrap();

        client.open_document("file:///a.ts", "ts", "one", 1).unwrap();
        client
            .update_document("file:///a.ts", 2, vec![DocumentChange::full("two")])
            .unwrap();
        client.close_document("file:///a.ts").unwrap();

        wait_for(|| log.lock().unwrap().len() == 3).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "open:file:///a.ts@1",
                "update:file:///a.ts@2",
                "close:file:///a.ts"
            ]
        );
    }

    #[tokio::test]
    async fn test_queued_sync_flushes_after_initialize() {
        let client = PolyClient::with_defaults();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(tokio::sync::Notify::new());

        let release = gate.clone();
        let adapter = recording_adapter("ts", log.clone()).on_initialize(move |_ctx| async move {
            release.notified().await;
            Ok(())
        });
        let registration = client.register_language(adapter).unwrap();

        client
            .open_document("file:///a.ts", "ts", "const value = 1;", 1)
            .unwrap();
        client
            .update_document(
                "file:///a.ts",
                2,
                vec![DocumentChange::full("const value = 1;")],
            )
            .unwrap();
        assert!(log.lock().unwrap().is_empty(), "ops must wait for ready");

        gate.notify_one();
        registration.await.unwrap();

        wait_for(|| log.lock().unwrap().len() == 2).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["open:file:///a.ts@1", "update:file:///a.ts@2"]
        );
    }

    #[tokio::test]
    async fn test_initialize_failure_removes_record_and_reports_queue() {
        let client = PolyClient::with_defaults();
        let errors: CallLog = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _sub = client
            .on_error(move |event| {
                sink.lock()
                    .unwrap()
                    .push(format!("{}:{}", event.operation, event.error));
            })
            .unwrap();

        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();
        let adapter = LanguageAdapter::new("ts").on_initialize(move |_ctx| async move {
            release.notified().await;
            Err(anyhow::anyhow!("server refused to start"))
        });
        let registration = client.register_language(adapter).unwrap();
        client.open_document("file:///a.ts", "ts", "x", 1).unwrap();

        gate.notify_one();
        let err = registration.await.unwrap_err();
        assert_eq!(err.kind(), "AdapterError");

        // Queued op surfaced on the error channel with its operation name.
        wait_for(|| !errors.lock().unwrap().is_empty()).await;
        let reported = errors.lock().unwrap().join(";");
        assert!(reported.contains("openDocument"), "got: {reported}");
        assert!(reported.contains("server refused to start"));

        // The record is gone.
        let err = client
            .get_hover(json!({"languageId": "ts"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownLanguage");
    }

    #[tokio::test]
    async fn test_routed_request_dispatch() {
        let client = PolyClient::with_defaults();
        let adapter = LanguageAdapter::new("ts").with_handler(
            Operation::Hover,
            |params, ctx| async move {
                assert_eq!(ctx.language_id(), "ts");
                Ok(json!({ "contents": params["word"] }))
            },
        );
        client.register_language(adapter).unwrap().await.unwrap();

        let result = client
            .get_hover(json!({"languageId": "ts", "word": "value"}))
            .await
            .unwrap();
        assert_eq!(result["contents"], "value");
    }

    #[tokio::test]
    async fn test_missing_handler_is_feature_unsupported() {
        let client = PolyClient::with_defaults();
        client
            .register_language(LanguageAdapter::new("ts"))
            .unwrap()
            .await
            .unwrap();

        let err = client
            .get_completions(json!({"languageId": "ts"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FeatureUnsupported");
    }

    #[tokio::test]
    async fn test_not_ready_gate_for_routed_requests() {
        let client = PolyClient::with_defaults();
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();
        let adapter = LanguageAdapter::new("ts")
            .with_handler(Operation::Hover, |_p, _c| async { Ok(Value::Null) })
            .on_initialize(move |_ctx| async move {
                release.notified().await;
                Ok(())
            });
        let registration = client.register_language(adapter).unwrap();

        let err = client
            .get_hover(json!({"languageId": "ts"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LanguageNotReady");

        gate.notify_one();
        registration.await.unwrap();
        client.get_hover(json!({"languageId": "ts"})).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_reaches_error_channel_and_caller() {
        let client = PolyClient::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = client
            .on_error(move |event| {
                assert_eq!(event.language_id, "ts");
                assert_eq!(event.operation, "getHover");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let adapter = LanguageAdapter::new("ts").with_handler(
            Operation::Hover,
            |_p, _c| async { Err(anyhow::anyhow!("backend exploded")) },
        );
        client.register_language(adapter).unwrap().await.unwrap();

        let err = client
            .get_hover(json!({"languageId": "ts"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AdapterError");
        assert!(err.to_string().contains("backend exploded"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_request_requires_explicit_routing() {
        let client = PolyClient::with_defaults();
        for id in ["one", "two"] {
            client
                .register_language(LanguageAdapter::new(id))
                .unwrap()
                .await
                .unwrap();
        }
        let err = client.send_request("ping", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "LanguageNotResolved");
    }

    #[tokio::test]
    async fn test_send_request_wraps_method_and_params() {
        let client = PolyClient::with_defaults();
        let adapter = LanguageAdapter::new("ts").with_handler(
            Operation::SendRequest,
            |params, _ctx| async move {
                assert_eq!(params["method"], "custom/echo");
                Ok(params["params"].clone())
            },
        );
        client.register_language(adapter).unwrap().await.unwrap();

        let result = client
            .send_request("custom/echo", json!({"languageId": "ts", "x": 1}))
            .await
            .unwrap();
        assert_eq!(result["x"], 1);
    }

    #[tokio::test]
    async fn test_send_notification_never_blocks_and_reports_errors() {
        let client = PolyClient::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = client
            .on_error(move |event| {
                assert_eq!(event.operation, "sendNotification");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let adapter = LanguageAdapter::new("ts").with_handler(
            Operation::SendNotification,
            |_p, _c| async { Err(anyhow::anyhow!("notify failed")) },
        );
        client.register_language(adapter).unwrap().await.unwrap();

        client
            .send_notification("custom/notify", json!({"languageId": "ts"}))
            .unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_unregister_runs_disposables_and_dispose() {
        let client = PolyClient::with_defaults();
        let disposed = Arc::new(AtomicUsize::new(0));

        let from_hook = disposed.clone();
        let from_ctx = disposed.clone();
        let adapter = LanguageAdapter::new("ts")
            .on_initialize(move |ctx| async move {
                ctx.register_disposable(move || {
                    from_ctx.fetch_add(1, Ordering::SeqCst);
                })?;
                Ok(())
            })
            .on_dispose(move || async move {
                from_hook.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
        client.register_language(adapter).unwrap().await.unwrap();

        client.unregister_language("ts").await.unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 11);

        let err = client.unregister_language("ts").await.unwrap_err();
        assert_eq!(err.kind(), "UnknownLanguage");
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let client = PolyClient::with_defaults();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        client
            .register_language(recording_adapter("ts", log.clone()))
            .unwrap()
            .await
            .unwrap();
        client.open_document("file:///a.ts", "ts", "x", 1).unwrap();

        client.dispose().await.unwrap();

        assert_eq!(client.dispose().await.unwrap_err().kind(), "ClientDisposed");
        assert_eq!(
            client
                .open_document("file:///b.ts", "ts", "y", 1)
                .unwrap_err()
                .kind(),
            "ClientDisposed"
        );
        assert_eq!(
            client.get_hover(json!({})).await.unwrap_err().kind(),
            "ClientDisposed"
        );
        assert_eq!(
            client.on_error(|_| {}).unwrap_err().kind(),
            "ClientDisposed"
        );
        assert_eq!(
            client.diagnostics_snapshot().unwrap_err().kind(),
            "ClientDisposed"
        );
    }

    #[tokio::test]
    async fn test_no_listener_fires_after_dispose() {
        let client = PolyClient::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = client
            .on_diagnostics("file:///a.ts", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        client
            .register_language(LanguageAdapter::new("ts"))
            .unwrap()
            .await
            .unwrap();
        let ctx = client.adapter_context_for_tests("ts");
        ctx.publish_diagnostics("file:///a.ts", json!([{ "severity": 1, "message": "e" }]))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        client.dispose().await.unwrap();
        let err = ctx
            .publish_diagnostics("file:///a.ts", json!([{ "severity": 1, "message": "e" }]))
            .unwrap_err();
        assert_eq!(err.kind(), "ClientDisposed");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_diagnostics_snapshot_tracks_publications() {
        let client = PolyClient::with_defaults();
        client
            .register_language(LanguageAdapter::new("ts"))
            .unwrap()
            .await
            .unwrap();
        let ctx = client.adapter_context_for_tests("ts");

        ctx.publish_diagnostics(
            "file:///a.ts",
            json!([{ "severity": 1, "message": "expected `;`" }]),
        )
        .unwrap();
        let snap = client.diagnostics_snapshot().unwrap();
        assert_eq!(snap.error_count(), 1);

        ctx.publish_diagnostics("file:///a.ts", json!([])).unwrap();
        assert!(client.diagnostics_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_empty_changes_delivers_full_text() {
        let client = PolyClient::with_defaults();
        let changes_seen: CallLog = Arc::new(Mutex::new(Vec::new()));
        let sink = changes_seen.clone();
        let adapter = LanguageAdapter::new("ts").on_document_sync(move |op| {
            let sink = sink.clone();
            async move {
                if let SyncOp::Update { changes, .. } = &op {
                    for change in changes {
                        sink.lock().unwrap().push(format!(
                            "{}:{}",
                            change.range.is_some(),
                            change.text
                        ));
                    }
                }
                Ok(())
            }
        });
        client.register_language(adapter).unwrap().await.unwrap();

        client.open_document("file:///a.ts", "ts", "text", 1).unwrap();
        client.update_document("file:///a.ts", 2, vec![]).unwrap();

        wait_for(|| !changes_seen.lock().unwrap().is_empty()).await;
        assert_eq!(*changes_seen.lock().unwrap(), vec!["false:text"]);
    }
}
