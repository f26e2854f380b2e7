//! Multiplexing LSP client hub.
//!
//! One [`PolyClient`] owns a set of per-language adapters, routes host
//! calls to them by language id or document URI, keeps the authoritative
//! document store, applies workspace edits, and fans server-originated
//! messages back out to host subscribers. [`StdioBackend`] is the
//! reusable scaffold for adapters that drive an external language server
//! over `Content-Length`-framed JSON-RPC on stdio.

pub mod codec;
pub mod connection;

mod adapter;
mod backend;
mod client;
mod context;
mod diagnostics;
mod documents;
mod error;
mod events;
mod registry;
mod router;
mod types;
mod uri;
mod workspace_edit;

pub use adapter::{LanguageAdapter, SyncOp};
pub use backend::{BackendConfig, DEFAULT_ENV_DENYLIST, StdioBackend};
pub use client::PolyClient;
pub use context::{AdapterContext, RequestContext};
pub use diagnostics::{DiagnosticsEntry, DiagnosticsSnapshot};
pub use error::{HubError, RpcError};
pub use events::Subscription;
pub use registry::Registration;
pub use router::Operation;
pub use types::{
    AdapterErrorEvent, ClientOptions, DiagnosticsEvent, DocumentChange, Position, Range,
    TextDocument, WorkspaceEvent,
};
pub use workspace_edit::{ApplyEditResult, EditFailure};
