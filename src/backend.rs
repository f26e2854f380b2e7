//! Stdio backend skeleton — adapters that drive a child-process server.
//!
//! [`StdioBackend`] owns one child process and one JSON-RPC connection.
//! The process spawns on the first outbound send; the initialize
//! handshake negotiates text-document-sync options and flushes any
//! notifications buffered beforehand. [`StdioBackend::into_adapter`]
//! wires the full adapter handler table on top.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use anyhow::Context;

use crate::adapter::{LanguageAdapter, SyncOp};
use crate::connection::{Connection, ConnectionEvent};
use crate::context::AdapterContext;
use crate::error::HubError;
use crate::router::Operation;
use crate::types::{DocumentChange, TextDocument};
use crate::uri;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Env var patterns stripped from the child's environment.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_SECRET*",
    "*_TOKEN*",
    "*_CREDENTIAL*",
    "*_PASSWORD*",
    "AWS_*",
];

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_env_denylist() -> Vec<String> {
    DEFAULT_ENV_DENYLIST.iter().map(|s| s.to_string()).collect()
}

/// Configuration for one child-process language server.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Executable command (e.g. "typescript-language-server").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// LSP language identifier (e.g. "typescript", "go").
    pub language_id: String,
    /// Human-readable adapter name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Environment variable that overrides the server binary location.
    #[serde(default)]
    pub binary_env_var: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Env var patterns (glob-ish) removed from the child's environment.
    #[serde(default = "default_env_denylist")]
    pub env_denylist: Vec<String>,
}

impl BackendConfig {
    /// Minimal config for a command and language id.
    #[must_use]
    pub fn new(command: impl Into<String>, language_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            language_id: language_id.into(),
            display_name: None,
            binary_env_var: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            env_denylist: default_env_denylist(),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Minimal glob matcher for env var denylist patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
/// Both pattern and key are compared in uppercase.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    match (pat.starts_with('*'), pat.ends_with('*')) {
        (true, true) => {
            let inner = &pat[1..pat.len() - 1];
            key_upper.contains(inner)
        }
        (true, false) => {
            let suffix = &pat[1..];
            key_upper.ends_with(suffix)
        }
        (false, true) => {
            let prefix = &pat[..pat.len() - 1];
            key_upper.starts_with(prefix)
        }
        (false, false) => key_upper == pat,
    }
}

/// Negotiated text-document-sync kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncKind {
    None,
    Full,
    Incremental,
}

impl SyncKind {
    fn from_lsp(value: i64) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Full,
            2 => Self::Incremental,
            // Unknown values degrade to full sync, which every server accepts.
            _ => Self::Full,
        }
    }
}

/// Negotiated sync options.
#[derive(Debug, Clone, Copy)]
struct SyncSettings {
    open_close: bool,
    change: SyncKind,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            open_close: true,
            change: SyncKind::Incremental,
        }
    }
}

/// Read the server's `textDocumentSync` capability: either a bare sync
/// kind or an options struct. Absent capability keeps the default.
fn negotiate_sync(capability: Option<&Value>) -> SyncSettings {
    match capability {
        None | Some(Value::Null) => SyncSettings::default(),
        Some(Value::Number(n)) => SyncSettings {
            open_close: true,
            change: SyncKind::from_lsp(n.as_i64().unwrap_or(1)),
        },
        Some(Value::Object(options)) => SyncSettings {
            open_close: options
                .get("openClose")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            change: options
                .get("change")
                .and_then(Value::as_i64)
                .map(SyncKind::from_lsp)
                .unwrap_or(SyncKind::None),
        },
        Some(_) => SyncSettings::default(),
    }
}

fn initialize_params(folders: &[PathBuf]) -> Result<Value, HubError> {
    let root_uri = match folders.first() {
        Some(path) => Value::String(uri::from_path(path)?.to_string()),
        None => Value::Null,
    };
    let workspace_folders: Vec<Value> = folders
        .iter()
        .filter_map(|path| {
            let folder_uri = uri::from_path(path).ok()?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workspace".to_string());
            Some(json!({ "uri": folder_uri.as_str(), "name": name }))
        })
        .collect();

    Ok(json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "workspace": {
                "applyEdit": true,
                "workspaceFolders": true,
                "configuration": true
            }
        },
        "workspaceFolders": workspace_folders
    }))
}

fn did_open_params(document: &TextDocument) -> Value {
    json!({
        "textDocument": {
            "uri": document.uri(),
            "languageId": document.language_id(),
            "version": document.version(),
            "text": document.text()
        }
    })
}

/// Shape `contentChanges` per the negotiated sync kind. `None` means the
/// notification is suppressed entirely.
fn shape_content_changes(
    kind: SyncKind,
    document: &TextDocument,
    changes: &[DocumentChange],
) -> Option<Value> {
    match kind {
        SyncKind::None => None,
        SyncKind::Full => Some(json!([{ "text": document.text() }])),
        SyncKind::Incremental => {
            if changes.is_empty() {
                return Some(json!([{ "text": document.text() }]));
            }
            let list: Vec<Value> = changes
                .iter()
                .map(|change| match change.range {
                    Some(range) => json!({ "range": range, "text": change.text }),
                    None => json!({ "text": change.text }),
                })
                .collect();
            Some(Value::Array(list))
        }
    }
}

#[derive(Default)]
struct BackendState {
    conn: Option<Arc<Connection>>,
    child: Option<Child>,
    initialized: bool,
    /// Notifications issued before `initialized`, flushed in order.
    buffered: Vec<(String, Value)>,
    sync: SyncSettings,
}

/// Reusable scaffold for adapters driving a child-process language
/// server over stdio.
pub struct StdioBackend {
    language_id: String,
    config: BackendConfig,
    ctx: Arc<OnceLock<AdapterContext>>,
    state: tokio::sync::Mutex<BackendState>,
}

impl StdioBackend {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            language_id: config.language_id.clone(),
            config,
            ctx: Arc::new(OnceLock::new()),
            state: tokio::sync::Mutex::new(BackendState::default()),
        }
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    fn resolve_binary(&self) -> anyhow::Result<PathBuf> {
        if let Some(var) = &self.config.binary_env_var
            && let Ok(value) = std::env::var(var)
        {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
        which::which(&self.config.command)
            .with_context(|| format!("{} not found in PATH", self.config.command))
    }

    /// Spawn the process and connection if not yet running.
    fn ensure_started(&self, state: &mut BackendState) -> anyhow::Result<Arc<Connection>> {
        if let Some(conn) = &state.conn {
            return Ok(conn.clone());
        }

        let program = self.resolve_binary()?;
        tracing::info!(language = %self.language_id, command = %program.display(), "starting language server");

        let mut cmd = Command::new(&program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Strip secret-bearing env vars before handing the environment
        // to the server process.
        for (key, _) in std::env::vars() {
            let upper = key.to_uppercase();
            if self
                .config
                .env_denylist
                .iter()
                .any(|pat| env_glob_matches(pat, &upper))
            {
                cmd.env_remove(&key);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.config.command))?;
        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let (conn, events) = Connection::new(stdout, stdin);
        let conn = Arc::new(conn);
        spawn_server_loop(
            conn.clone(),
            events,
            self.ctx.clone(),
            self.language_id.clone(),
        );

        state.child = Some(child);
        state.conn = Some(conn.clone());
        Ok(conn)
    }

    /// Run the LSP initialize/initialized handshake and flush buffered
    /// notifications. Failure tears the process down.
    pub async fn initialize(&self, ctx: AdapterContext) -> anyhow::Result<()> {
        let folders = ctx.workspace_folders()?;
        let _ = self.ctx.set(ctx);

        let mut state = self.state.lock().await;
        let conn = self.ensure_started(&mut state)?;
        let params = initialize_params(&folders)?;

        match conn
            .send_request("initialize", params, self.config.request_timeout())
            .await
        {
            Ok(response) => {
                state.sync = negotiate_sync(response.pointer("/capabilities/textDocumentSync"));
                conn.send_notification("initialized", json!({}))?;
                for (method, params) in std::mem::take(&mut state.buffered) {
                    conn.send_notification(&method, params)?;
                }
                state.initialized = true;
                tracing::info!(language = %self.language_id, "language server initialized");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(language = %self.language_id, "initialize handshake failed: {err}");
                self.teardown(&mut state).await;
                Err(anyhow::Error::from(err).context("initialize handshake failed"))
            }
        }
    }

    fn notify_locked(
        &self,
        state: &mut BackendState,
        method: &str,
        params: Value,
    ) -> anyhow::Result<()> {
        let conn = self.ensure_started(state)?;
        if state.initialized {
            conn.send_notification(method, params)?;
        } else {
            state.buffered.push((method.to_string(), params));
        }
        Ok(())
    }

    /// Emit `textDocument/didOpen` when the server accepts open/close.
    pub async fn open_document(&self, document: &TextDocument) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.sync.open_close {
            return Ok(());
        }
        self.notify_locked(&mut state, "textDocument/didOpen", did_open_params(document))
    }

    /// Emit `textDocument/didChange` shaped per the negotiated sync kind.
    pub async fn update_document(
        &self,
        document: &TextDocument,
        changes: &[DocumentChange],
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let Some(content_changes) = shape_content_changes(state.sync.change, document, changes)
        else {
            return Ok(());
        };
        let params = json!({
            "textDocument": { "uri": document.uri(), "version": document.version() },
            "contentChanges": content_changes
        });
        self.notify_locked(&mut state, "textDocument/didChange", params)
    }

    /// Emit `textDocument/didClose` when the server accepts open/close.
    pub async fn close_document(&self, uri: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.sync.open_close {
            return Ok(());
        }
        let params = json!({ "textDocument": { "uri": uri } });
        self.notify_locked(&mut state, "textDocument/didClose", params)
    }

    /// Send a raw request to the server.
    pub async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let conn = {
            let mut state = self.state.lock().await;
            self.ensure_started(&mut state)?
        };
        Ok(conn
            .send_request(method, params, self.config.request_timeout())
            .await?)
    }

    /// Send a raw notification (buffered until `initialized`).
    pub async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.notify_locked(&mut state, method, params)
    }

    /// Graceful shutdown: race LSP `shutdown` against a short timer, send
    /// `exit` best-effort, dispose the connection, terminate the child.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.teardown(&mut state).await;
    }

    async fn teardown(&self, state: &mut BackendState) {
        if let Some(conn) = state.conn.take() {
            if !conn.is_closed() {
                let _ = conn
                    .send_request(
                        "shutdown",
                        Value::Null,
                        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
                    )
                    .await;
                let _ = conn.send_notification("exit", Value::Null);
            }
            conn.dispose();
        }
        if let Some(mut child) = state.child.take() {
            match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), child.wait())
                .await
            {
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!(language = %self.language_id, "server did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
        state.initialized = false;
        state.buffered.clear();
        state.sync = SyncSettings::default();
    }

    /// Build a complete [`LanguageAdapter`] on top of this backend: the
    /// ten feature operations mapped to their `textDocument/*` methods,
    /// the raw escape hatches, document sync, initialize, and dispose.
    #[must_use]
    pub fn into_adapter(self) -> LanguageAdapter {
        let backend = Arc::new(self);
        let mut adapter = LanguageAdapter::new(backend.language_id.clone());
        if let Some(name) = backend.config.display_name.clone() {
            adapter = adapter.with_display_name(name);
        }

        for (operation, method) in Operation::FEATURES {
            let b = backend.clone();
            adapter = adapter.with_handler(operation, move |params, _ctx| {
                let b = b.clone();
                async move { b.request(method, params).await }
            });
        }

        let b = backend.clone();
        adapter = adapter.with_handler(Operation::SendRequest, move |params, _ctx| {
            let b = b.clone();
            async move {
                let method = params
                    .get("method")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("sendRequest requires a method"))?
                    .to_string();
                let inner = params.get("params").cloned().unwrap_or(Value::Null);
                b.request(&method, inner).await
            }
        });

        let b = backend.clone();
        adapter = adapter.with_handler(Operation::SendNotification, move |params, _ctx| {
            let b = b.clone();
            async move {
                let method = params
                    .get("method")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("sendNotification requires a method"))?
                    .to_string();
                let inner = params.get("params").cloned().unwrap_or(Value::Null);
                b.notify(&method, inner).await?;
                Ok(Value::Null)
            }
        });

        let b = backend.clone();
        adapter = adapter.on_document_sync(move |op| {
            let b = b.clone();
            async move {
                match op {
                    SyncOp::Open { document } => b.open_document(&document).await,
                    SyncOp::Update { document, changes } => {
                        b.update_document(&document, &changes).await
                    }
                    SyncOp::Close { uri } => b.close_document(&uri).await,
                }
            }
        });

        let b = backend.clone();
        adapter = adapter.on_initialize(move |ctx| async move { b.initialize(ctx).await });

        let b = backend;
        adapter.on_dispose(move || async move {
            b.shutdown().await;
            Ok(())
        })
    }
}

/// Service server-originated traffic: requests are answered through the
/// adapter context (or `-32601` before it exists), diagnostics route to
/// the bus, other notifications fan out to method subscribers.
fn spawn_server_loop(
    conn: Arc<Connection>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ctx: Arc<OnceLock<AdapterContext>>,
    language_id: String,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Request { id, method, params } => {
                    let Some(ctx) = ctx.get() else {
                        tracing::debug!(language = %language_id, %method, "server request before initialization");
                        let _ = conn.send_error_response(
                            id,
                            -32601,
                            &format!("Method not found: {method}"),
                        );
                        continue;
                    };
                    let result = answer_server_request(ctx, &method, &params);
                    let written = match result {
                        Ok(value) => conn.send_response(id, value),
                        Err(err) => conn.send_error_response(id, -32603, &err.to_string()),
                    };
                    if written.is_err() {
                        break;
                    }
                }
                ConnectionEvent::Notification { method, params } => {
                    let Some(ctx) = ctx.get() else {
                        tracing::trace!(language = %language_id, %method, "dropping notification before initialization");
                        continue;
                    };
                    handle_server_notification(ctx, &method, params);
                }
                ConnectionEvent::Closed => break,
            }
        }
    });
}

fn answer_server_request(
    ctx: &AdapterContext,
    method: &str,
    params: &Value,
) -> Result<Value, HubError> {
    if method == "workspace/applyEdit" {
        let edit = params.get("edit").unwrap_or(params);
        return Ok(ctx.apply_workspace_edit(edit)?.wire_response());
    }
    ctx.handle_server_request(method, params)
}

fn handle_server_notification(ctx: &AdapterContext, method: &str, params: Value) {
    if method == "textDocument/publishDiagnostics" {
        let Some(raw_uri) = params.get("uri").and_then(Value::as_str) else {
            return;
        };
        let diagnostics = params.get("diagnostics").cloned().unwrap_or(json!([]));
        if let Err(err) = ctx.publish_diagnostics(raw_uri, diagnostics) {
            tracing::debug!("failed to publish diagnostics: {err}");
        }
    } else if let Err(err) = ctx.notify_client(method, params) {
        tracing::debug!(%method, "failed to fan out notification: {err}");
    }
}
