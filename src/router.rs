//! Request routing — resolve a host call to exactly one adapter.
//!
//! Operations form a closed enumeration; an adapter registers the subset
//! it implements and routing reports `FeatureUnsupported` for omissions.

use std::collections::HashMap;

use serde_json::Value;

use crate::documents::DocumentStore;
use crate::error::HubError;
use crate::registry::AdapterRecord;
use crate::uri;

/// The operations an adapter can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Completions,
    Hover,
    Definition,
    References,
    CodeActions,
    DocumentHighlights,
    DocumentSymbols,
    Rename,
    FormatDocument,
    FormatRange,
    /// Raw request escape hatch.
    SendRequest,
    /// Raw notification escape hatch.
    SendNotification,
}

impl Operation {
    /// The ten feature operations with their LSP methods.
    pub(crate) const FEATURES: [(Operation, &'static str); 10] = [
        (Operation::Completions, "textDocument/completion"),
        (Operation::Hover, "textDocument/hover"),
        (Operation::Definition, "textDocument/definition"),
        (Operation::References, "textDocument/references"),
        (Operation::CodeActions, "textDocument/codeAction"),
        (Operation::DocumentHighlights, "textDocument/documentHighlight"),
        (Operation::DocumentSymbols, "textDocument/documentSymbol"),
        (Operation::Rename, "textDocument/rename"),
        (Operation::FormatDocument, "textDocument/formatting"),
        (Operation::FormatRange, "textDocument/rangeFormatting"),
    ];

    /// Host-facing operation name, used in errors and the error channel.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Completions => "getCompletions",
            Self::Hover => "getHover",
            Self::Definition => "getDefinition",
            Self::References => "getReferences",
            Self::CodeActions => "getCodeActions",
            Self::DocumentHighlights => "getDocumentHighlights",
            Self::DocumentSymbols => "getDocumentSymbols",
            Self::Rename => "renameSymbol",
            Self::FormatDocument => "formatDocument",
            Self::FormatRange => "formatRange",
            Self::SendRequest => "sendRequest",
            Self::SendNotification => "sendNotification",
        }
    }
}

/// Candidate language id keys, probed in order.
fn candidate_language(params: &Value) -> Option<&str> {
    params
        .get("languageId")
        .and_then(Value::as_str)
        .or_else(|| params.get("language").and_then(Value::as_str))
        .or_else(|| params.pointer("/textDocument/languageId").and_then(Value::as_str))
        .or_else(|| params.pointer("/document/languageId").and_then(Value::as_str))
}

/// Candidate URI keys, probed in order.
fn candidate_uri(params: &Value) -> Option<&str> {
    params
        .get("uri")
        .and_then(Value::as_str)
        .or_else(|| params.pointer("/textDocument/uri").and_then(Value::as_str))
        .or_else(|| params.pointer("/document/uri").and_then(Value::as_str))
        .or_else(|| params.pointer("/left/textDocument/uri").and_then(Value::as_str))
}

/// Resolve the target language for a host call.
///
/// Order: sole adapter for non-object params, explicit language id,
/// owning adapter of a referenced open document, sole-adapter fallback.
pub(crate) fn resolve(
    adapters: &HashMap<String, AdapterRecord>,
    documents: &DocumentStore,
    params: &Value,
) -> Result<String, HubError> {
    let sole = || {
        if adapters.len() == 1 {
            adapters.keys().next().cloned()
        } else {
            None
        }
    };

    if !params.is_object() {
        if let Some(language) = sole() {
            return Ok(language);
        }
    }

    if let Some(language) = candidate_language(params) {
        return if adapters.contains_key(language) {
            Ok(language.to_string())
        } else {
            Err(HubError::unknown_language(language))
        };
    }

    if let Some(raw) = candidate_uri(params) {
        let key = uri::normalize(raw)?;
        let Some(doc) = documents.get(&key) else {
            return Err(HubError::DocumentNotOpen { uri: key });
        };
        let language = doc.language_id().to_string();
        return if adapters.contains_key(&language) {
            Ok(language)
        } else {
            Err(HubError::unknown_language(language))
        };
    }

    sole().ok_or(HubError::LanguageNotResolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapters(ids: &[&str]) -> HashMap<String, AdapterRecord> {
        ids.iter()
            .map(|id| ((*id).to_string(), AdapterRecord::for_tests(id)))
            .collect()
    }

    fn store_with(uri: &str, language: &str) -> DocumentStore {
        let mut store = DocumentStore::new();
        store.open(uri, language, "text".into(), 1).unwrap();
        store
    }

    #[test]
    fn test_explicit_language_id() {
        let adapters = adapters(&["ts", "go"]);
        let store = DocumentStore::new();
        let language = resolve(&adapters, &store, &json!({"languageId": "go"})).unwrap();
        assert_eq!(language, "go");
    }

    #[test]
    fn test_language_key_order() {
        let adapters = adapters(&["ts", "go"]);
        let store = DocumentStore::new();
        // `languageId` wins over nested keys.
        let params = json!({
            "languageId": "ts",
            "textDocument": { "languageId": "go" }
        });
        assert_eq!(resolve(&adapters, &store, &params).unwrap(), "ts");
        // Nested textDocument key is probed when top-level keys are absent.
        let params = json!({"textDocument": { "languageId": "go" }});
        assert_eq!(resolve(&adapters, &store, &params).unwrap(), "go");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let adapters = adapters(&["ts"]);
        let store = DocumentStore::new();
        let err = resolve(&adapters, &store, &json!({"languageId": "rust"})).unwrap_err();
        assert_eq!(err.kind(), "UnknownLanguage");
    }

    #[test]
    fn test_uri_resolves_owning_adapter() {
        let adapters = adapters(&["ts", "go"]);
        let store = store_with("file:///a.go", "go");
        let params = json!({"textDocument": { "uri": "file:///a.go" }});
        assert_eq!(resolve(&adapters, &store, &params).unwrap(), "go");
    }

    #[test]
    fn test_uri_is_normalized_before_lookup() {
        let adapters = adapters(&["ts", "go"]);
        let store = store_with("/work/a.go", "go");
        let params = json!({"uri": "/work/a.go"});
        assert_eq!(resolve(&adapters, &store, &params).unwrap(), "go");
    }

    #[test]
    fn test_unopened_uri_rejected() {
        let adapters = adapters(&["ts", "go"]);
        let store = DocumentStore::new();
        let params = json!({"uri": "file:///missing.ts"});
        let err = resolve(&adapters, &store, &params).unwrap_err();
        assert_eq!(err.kind(), "DocumentNotOpen");
    }

    #[test]
    fn test_sole_adapter_fallback() {
        let adapters = adapters(&["ts"]);
        let store = DocumentStore::new();
        assert_eq!(resolve(&adapters, &store, &json!({})).unwrap(), "ts");
        // Non-object params also fall through to the sole adapter.
        assert_eq!(resolve(&adapters, &store, &json!("raw")).unwrap(), "ts");
        assert_eq!(resolve(&adapters, &store, &Value::Null).unwrap(), "ts");
    }

    #[test]
    fn test_ambiguous_call_rejected() {
        let adapters = adapters(&["ts", "go"]);
        let store = DocumentStore::new();
        let err = resolve(&adapters, &store, &json!({})).unwrap_err();
        assert_eq!(err.kind(), "LanguageNotResolved");
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Rename.name(), "renameSymbol");
        assert_eq!(Operation::SendRequest.name(), "sendRequest");
        assert_eq!(Operation::FEATURES.len(), 10);
    }
}
