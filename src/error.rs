//! Error taxonomy for the hub.
//!
//! Every failure surfaced to the host carries a stable kind (see
//! [`HubError::kind`]) plus a human-readable message. Adapter-supplied
//! handlers use `anyhow` internally; the hub wraps their failures in
//! [`HubError::Adapter`] at the boundary.

use serde_json::Value;

/// A JSON-RPC error object, normalized from the wire.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// Normalize a JSON-RPC `error` member into [`RpcError`].
    ///
    /// Object errors keep their `code`/`message`/`data`; anything else
    /// becomes a generic "request failed" with the raw value in `data`.
    pub(crate) fn from_wire(raw: &Value) -> Self {
        match raw.as_object() {
            Some(obj) => Self {
                code: obj.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string(),
                data: obj.get("data").cloned(),
            },
            None => Self {
                code: 0,
                message: "request failed".to_string(),
                data: Some(raw.clone()),
            },
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Errors raised by the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid client options: {reason}")]
    InvalidOptions { reason: String },

    #[error("invalid adapter: {reason}")]
    InvalidAdapter { reason: String },

    #[error("language '{language}' is already registered")]
    LanguageExists { language: String },

    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid position: line {line}, character {character}")]
    InvalidPosition { line: i64, character: i64 },

    #[error("invalid change: {reason}")]
    InvalidChange { reason: String },

    #[error("invalid edit: {reason}")]
    InvalidEdit { reason: String },

    #[error("invalid changes payload: {reason}")]
    InvalidChanges { reason: String },

    #[error("invalid version for '{uri}': {reason}")]
    InvalidVersion { uri: String, reason: String },

    #[error("no adapter registered for language '{language}'")]
    UnknownLanguage { language: String },

    #[error("document '{uri}' is not open")]
    DocumentNotOpen { uri: String },

    #[error("cannot resolve a target language; pass a languageId or an open document URI")]
    LanguageNotResolved,

    #[error("language '{language}' is not ready (state: {state})")]
    LanguageNotReady {
        language: String,
        state: &'static str,
    },

    #[error("language '{language}' failed to initialize")]
    LanguageFailed { language: String },

    #[error("language '{language}' does not support '{operation}'")]
    FeatureUnsupported {
        language: String,
        operation: String,
    },

    #[error("client is disposed")]
    ClientDisposed,

    #[error("request '{method}' timed out")]
    Timeout { method: String },

    #[error("{detail}")]
    ConnectionClosed { detail: &'static str },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("{0}")]
    Rpc(RpcError),

    #[error("adapter '{language}' failed during '{operation}': {source}")]
    Adapter {
        language: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },
}

impl HubError {
    /// Error for operations on a connection that reached EOF or errored.
    pub(crate) fn connection_closed() -> Self {
        Self::ConnectionClosed {
            detail: "connection closed",
        }
    }

    /// Error for operations on an explicitly disposed connection.
    pub(crate) fn connection_disposed() -> Self {
        Self::ConnectionClosed {
            detail: "connection disposed",
        }
    }

    pub(crate) fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_language(language: impl Into<String>) -> Self {
        Self::UnknownLanguage {
            language: language.into(),
        }
    }

    pub(crate) fn adapter(
        language: impl Into<String>,
        operation: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Adapter {
            language: language.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Stable machine-readable kind for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidOptions { .. } => "InvalidOptions",
            Self::InvalidAdapter { .. } => "InvalidAdapter",
            Self::LanguageExists { .. } => "LanguageExists",
            Self::InvalidUri { .. } => "InvalidUri",
            Self::InvalidPosition { .. } => "InvalidPosition",
            Self::InvalidChange { .. } => "InvalidChange",
            Self::InvalidEdit { .. } => "InvalidEdit",
            Self::InvalidChanges { .. } => "InvalidChanges",
            Self::InvalidVersion { .. } => "InvalidVersion",
            Self::UnknownLanguage { .. } => "UnknownLanguage",
            Self::DocumentNotOpen { .. } => "DocumentNotOpen",
            Self::LanguageNotResolved => "LanguageNotResolved",
            Self::LanguageNotReady { .. } => "LanguageNotReady",
            Self::LanguageFailed { .. } => "LanguageFailed",
            Self::FeatureUnsupported { .. } => "FeatureUnsupported",
            Self::ClientDisposed => "ClientDisposed",
            Self::Timeout { .. } => "Timeout",
            Self::ConnectionClosed { .. } => "ConnectionClosed",
            Self::Protocol { .. } => "ProtocolError",
            Self::Rpc(_) => "RpcError",
            Self::Adapter { .. } => "AdapterError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_from_object() {
        let raw = serde_json::json!({
            "code": -32601,
            "message": "method not found",
            "data": { "method": "textDocument/hover" }
        });
        let err = RpcError::from_wire(&raw);
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found");
        assert!(err.data.is_some());
    }

    #[test]
    fn test_rpc_error_from_non_object() {
        let raw = serde_json::json!("boom");
        let err = RpcError::from_wire(&raw);
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "request failed");
        assert_eq!(err.data, Some(serde_json::json!("boom")));
    }

    #[test]
    fn test_rpc_error_missing_fields() {
        let raw = serde_json::json!({});
        let err = RpcError::from_wire(&raw);
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "request failed");
        assert!(err.data.is_none());
    }

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(HubError::ClientDisposed.kind(), "ClientDisposed");
        assert_eq!(HubError::LanguageNotResolved.kind(), "LanguageNotResolved");
        assert_eq!(HubError::connection_closed().kind(), "ConnectionClosed");
        assert_eq!(HubError::connection_disposed().kind(), "ConnectionClosed");
    }

    #[test]
    fn test_closed_and_disposed_messages_differ() {
        assert_eq!(HubError::connection_closed().to_string(), "connection closed");
        assert_eq!(
            HubError::connection_disposed().to_string(),
            "connection disposed"
        );
    }
}
