//! Public types shared across the hub.
//!
//! The host constructs [`ClientOptions`], reads [`TextDocument`] clones,
//! and receives the event payload types through subscriptions. Documents
//! themselves are exclusively owned by the store; everything handed out
//! is a deep copy.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_transport() -> String {
    "stdio".to_string()
}

/// Options accepted at client construction.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientOptions {
    /// Backend transport. Only "stdio" is supported.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Filesystem paths of the workspace folders handed to backends.
    #[serde(default)]
    pub workspace_folders: Vec<PathBuf>,
    /// Opaque host metadata, passed through to adapters untouched.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            workspace_folders: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// A zero-indexed position inside a document.
///
/// Coordinates are signed so that negative wire values can be rejected
/// with `InvalidPosition` instead of failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: i64,
    pub character: i64,
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// One content change in an `update` call.
///
/// A change with a `range` replaces that range; a change without one
/// replaces the full document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    pub text: String,
}

impl DocumentChange {
    /// A change replacing the whole document with `text`.
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    /// A change replacing `range` with `text`.
    #[must_use]
    pub fn ranged(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

/// An open text document.
///
/// Fields are private; construction and mutation are restricted to the
/// store. Clones handed to callers never alias the stored document.
#[derive(Debug, Clone)]
pub struct TextDocument {
    uri: String,
    language_id: String,
    text: String,
    version: i64,
    opened_at: SystemTime,
}

impl TextDocument {
    pub(crate) fn new(uri: String, language_id: String, text: String, version: i64) -> Self {
        Self {
            uri,
            language_id,
            text,
            version,
            opened_at: SystemTime::now(),
        }
    }

    /// Normalized document URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Language identifier of the owning adapter.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Full current text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Monotonically increasing version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// When this document was opened.
    #[must_use]
    pub fn opened_at(&self) -> SystemTime {
        self.opened_at
    }

    pub(crate) fn set_text(&mut self, text: String) {
        self.text = text;
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub(crate) fn set_uri(&mut self, uri: String) {
        self.uri = uri;
    }
}

/// Payload delivered to diagnostics subscribers.
#[derive(Debug, Clone)]
pub struct DiagnosticsEvent {
    pub uri: String,
    pub language_id: String,
    /// The published diagnostics array, deep-copied per listener set.
    pub diagnostics: Value,
}

/// Payload delivered to workspace-event subscribers.
#[derive(Debug, Clone)]
pub struct WorkspaceEvent {
    pub kind: String,
    pub language_id: String,
    pub payload: Value,
}

/// Payload delivered to adapter-error subscribers.
#[derive(Debug, Clone)]
pub struct AdapterErrorEvent {
    pub language_id: String,
    pub operation: String,
    pub error: String,
}
