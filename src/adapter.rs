//! Adapter contract — per-language plugins.
//!
//! A [`LanguageAdapter`] bundles a language id, optional metadata, and a
//! handler table keyed by [`Operation`]. Handlers are async and return
//! `anyhow::Result` so plugin authors keep ergonomic error erasure; the
//! hub normalizes failures into the adapter-error channel.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::{AdapterContext, RequestContext};
use crate::router::Operation;
use crate::types::{DocumentChange, TextDocument};

/// Async handler for a routed operation.
pub type RequestHandler =
    Arc<dyn Fn(Value, RequestContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Async handler for document-sync deliveries.
pub type SyncHandler = Arc<dyn Fn(SyncOp) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// One-shot initialization hook.
pub type InitHandler = Box<dyn FnOnce(AdapterContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// One-shot disposal hook.
pub type DisposeHandler = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A document-sync delivery.
///
/// Deliveries for a given URI arrive in the order the host issued them;
/// during adapter initialization they are buffered and flushed once.
#[derive(Debug, Clone)]
pub enum SyncOp {
    Open {
        document: TextDocument,
    },
    Update {
        document: TextDocument,
        changes: Vec<DocumentChange>,
    },
    Close {
        uri: String,
    },
}

impl SyncOp {
    /// Operation name used on the adapter-error channel.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "openDocument",
            Self::Update { .. } => "updateDocument",
            Self::Close { .. } => "closeDocument",
        }
    }
}

/// Handler table shared between the registry and the per-adapter
/// dispatch task.
pub(crate) struct HandlerTable {
    pub requests: HashMap<Operation, RequestHandler>,
    pub sync: Option<SyncHandler>,
}

/// A per-language plugin.
pub struct LanguageAdapter {
    language_id: String,
    display_name: Option<String>,
    capabilities: serde_json::Map<String, Value>,
    requests: HashMap<Operation, RequestHandler>,
    sync: Option<SyncHandler>,
    initialize: Option<InitHandler>,
    dispose: Option<DisposeHandler>,
}

pub(crate) struct AdapterParts {
    pub language_id: String,
    pub display_name: String,
    pub capabilities: serde_json::Map<String, Value>,
    pub table: Arc<HandlerTable>,
    pub initialize: Option<InitHandler>,
    pub dispose: Option<DisposeHandler>,
}

impl LanguageAdapter {
    #[must_use]
    pub fn new(language_id: impl Into<String>) -> Self {
        Self {
            language_id: language_id.into(),
            display_name: None,
            capabilities: serde_json::Map::new(),
            requests: HashMap::new(),
            sync: None,
            initialize: None,
            dispose: None,
        }
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: serde_json::Map<String, Value>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Register a handler for one operation.
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, operation: Operation, handler: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.requests
            .insert(operation, Arc::new(move |params, ctx| Box::pin(handler(params, ctx))));
        self
    }

    /// Register the document-sync handler.
    #[must_use]
    pub fn on_document_sync<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(SyncOp) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.sync = Some(Arc::new(move |op| Box::pin(handler(op))));
        self
    }

    /// Register the initialization hook. While it runs the adapter is
    /// `initializing` and document-sync deliveries are queued.
    #[must_use]
    pub fn on_initialize<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce(AdapterContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.initialize = Some(Box::new(move |ctx| Box::pin(handler(ctx))));
        self
    }

    /// Register the disposal hook, run at unregistration or client
    /// disposal.
    #[must_use]
    pub fn on_dispose<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispose = Some(Box::new(move || Box::pin(handler())));
        self
    }

    pub(crate) fn into_parts(self) -> AdapterParts {
        let display_name = self
            .display_name
            .unwrap_or_else(|| self.language_id.clone());
        AdapterParts {
            language_id: self.language_id,
            display_name,
            capabilities: self.capabilities,
            table: Arc::new(HandlerTable {
                requests: self.requests,
                sync: self.sync,
            }),
            initialize: self.initialize,
            dispose: self.dispose,
        }
    }
}
