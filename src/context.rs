//! Capability handles handed to adapters.
//!
//! [`AdapterContext`] is given once at initialization and carries the
//! full capability surface: diagnostics publication, workspace events,
//! document access, server-request handling, workspace edits, and
//! disposable registration. [`RequestContext`] is the narrower handle
//! passed to every routed operation. Both hold weak references to the
//! client and degrade to `ClientDisposed` after disposal.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use serde_json::{Value, json};

use crate::client::Shared;
use crate::error::HubError;
use crate::types::{ClientOptions, DiagnosticsEvent, TextDocument, WorkspaceEvent};
use crate::uri;
use crate::workspace_edit::{self, ApplyEditResult};

/// Capability handle given to an adapter at initialization.
#[derive(Clone)]
pub struct AdapterContext {
    shared: Weak<Shared>,
    language_id: String,
}

impl AdapterContext {
    pub(crate) fn new(shared: Weak<Shared>, language_id: String) -> Self {
        Self { shared, language_id }
    }

    fn shared(&self) -> Result<Arc<Shared>, HubError> {
        self.shared.upgrade().ok_or(HubError::ClientDisposed)
    }

    /// Language this context belongs to.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Workspace folders configured at client construction.
    pub fn workspace_folders(&self) -> Result<Vec<PathBuf>, HubError> {
        Ok(self.shared()?.options.workspace_folders.clone())
    }

    /// Publish a full diagnostics set for a document and fan it out to
    /// subscribers. An empty list clears the cached entry.
    pub fn publish_diagnostics(&self, uri: &str, diagnostics: Value) -> Result<(), HubError> {
        let shared = self.shared()?;
        let key = uri::normalize(uri)?;
        {
            let mut state = shared.state.lock().unwrap();
            if state.disposed {
                return Err(HubError::ClientDisposed);
            }
            state.diagnostics.update(&key, &self.language_id, &diagnostics);
        }
        shared.bus.emit_diagnostics(&DiagnosticsEvent {
            uri: key,
            language_id: self.language_id.clone(),
            diagnostics,
        });
        Ok(())
    }

    /// Emit a workspace event to subscribers of `kind`.
    pub fn emit_workspace_event(&self, kind: &str, payload: Value) -> Result<(), HubError> {
        let shared = self.shared()?;
        shared.bus.emit_workspace_event(&WorkspaceEvent {
            kind: kind.to_string(),
            language_id: self.language_id.clone(),
            payload,
        });
        Ok(())
    }

    /// Clone of one document owned by this adapter's language.
    pub fn get_document(&self, uri: &str) -> Result<Option<TextDocument>, HubError> {
        let shared = self.shared()?;
        let key = uri::normalize(uri)?;
        let state = shared.state.lock().unwrap();
        Ok(state
            .documents
            .get(&key)
            .filter(|doc| doc.language_id() == self.language_id)
            .cloned())
    }

    /// Clones of all documents owned by this adapter's language.
    pub fn list_documents(&self) -> Result<Vec<TextDocument>, HubError> {
        let shared = self.shared()?;
        let state = shared.state.lock().unwrap();
        Ok(state.documents.list_for_language(&self.language_id))
    }

    /// Fan a server-originated notification out to host subscribers.
    pub fn notify_client(&self, method: &str, payload: Value) -> Result<(), HubError> {
        let shared = self.shared()?;
        shared.bus.emit_notification(method, &payload, &self.language_id);
        Ok(())
    }

    /// Answer a server-initiated request.
    ///
    /// Built-in handlers cover the workspace/window methods every LSP
    /// server expects a client to answer; unknown methods are offered to
    /// notification listeners and the first non-`None` return is used.
    pub fn handle_server_request(&self, method: &str, params: &Value) -> Result<Value, HubError> {
        match method {
            "workspace/applyEdit" => {
                let edit = params.get("edit").unwrap_or(params);
                Ok(self.apply_workspace_edit(edit)?.wire_response())
            }
            "workspace/configuration" => {
                let count = params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                Ok(Value::Array(vec![json!({}); count]))
            }
            "workspace/workspaceFolders" => {
                let folders = self.workspace_folders()?;
                let list: Vec<Value> = folders
                    .iter()
                    .filter_map(|path| {
                        let folder_uri = uri::from_path(path).ok()?;
                        let name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| folder_uri.to_string());
                        Some(json!({ "uri": folder_uri.as_str(), "name": name }))
                    })
                    .collect();
                Ok(Value::Array(list))
            }
            "window/showMessageRequest" => Ok(params
                .pointer("/actions/0")
                .cloned()
                .unwrap_or(Value::Null)),
            "client/registerCapability"
            | "client/unregisterCapability"
            | "workspace/didChangeWorkspaceFolders" => Ok(Value::Null),
            _ => {
                let shared = self.shared()?;
                Ok(shared
                    .bus
                    .emit_notification(method, params, &self.language_id)
                    .unwrap_or(Value::Null))
            }
        }
    }

    /// Apply a workspace edit package directly.
    pub fn apply_workspace_edit(&self, edit: &Value) -> Result<ApplyEditResult, HubError> {
        let shared = self.shared()?;
        let mut state = shared.state.lock().unwrap();
        if state.disposed {
            return Err(HubError::ClientDisposed);
        }
        workspace_edit::apply(&mut state, edit)
    }

    /// Attach a cleanup to this adapter's record, run at unregistration
    /// or client disposal.
    pub fn register_disposable(
        &self,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Result<(), HubError> {
        let shared = self.shared()?;
        let mut state = shared.state.lock().unwrap();
        let Some(record) = state.adapters.get_mut(&self.language_id) else {
            return Err(HubError::unknown_language(&self.language_id));
        };
        record.disposables.push(Box::new(cleanup));
        Ok(())
    }
}

/// Per-operation handle passed to routed request handlers.
#[derive(Clone)]
pub struct RequestContext {
    shared: Weak<Shared>,
    language_id: String,
}

impl RequestContext {
    pub(crate) fn new(shared: Weak<Shared>, language_id: String) -> Self {
        Self { shared, language_id }
    }

    fn shared(&self) -> Result<Arc<Shared>, HubError> {
        self.shared.upgrade().ok_or(HubError::ClientDisposed)
    }

    /// Language resolved for this operation.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Snapshot of the client options.
    pub fn options(&self) -> Result<ClientOptions, HubError> {
        Ok(self.shared()?.options.clone())
    }

    /// Workspace folders configured at client construction.
    pub fn workspace_folders(&self) -> Result<Vec<PathBuf>, HubError> {
        Ok(self.shared()?.options.workspace_folders.clone())
    }

    /// Defensive copy of an open document, any language.
    pub fn get_document(&self, uri: &str) -> Result<Option<TextDocument>, HubError> {
        let shared = self.shared()?;
        let key = uri::normalize(uri)?;
        let state = shared.state.lock().unwrap();
        Ok(state.documents.get(&key).cloned())
    }
}
