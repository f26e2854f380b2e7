//! Workspace-edit engine — apply a multi-file edit package.
//!
//! Processes `documentChanges` first (in order), then `changes` map
//! entries. Every change gets a monotonically increasing index; the
//! first failure populates `failureReason`/`failedChange`. Failures
//! never abort the remaining changes.

use serde::Serialize;
use serde_json::{Value, json};

use crate::adapter::SyncOp;
use crate::client::ClientState;
use crate::documents::{self, EditOp};
use crate::error::HubError;
use crate::types::{DocumentChange, Range};
use crate::uri;

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct EditFailure {
    pub uri: String,
    pub reason: String,
}

/// Result of applying a workspace edit package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEditResult {
    pub applied: bool,
    pub failures: Vec<EditFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_change: Option<usize>,
}

impl ApplyEditResult {
    /// The LSP `workspace/applyEdit` response shape (failures omitted).
    #[must_use]
    pub fn wire_response(&self) -> Value {
        let mut response = json!({ "applied": self.applied });
        if let Some(reason) = &self.failure_reason {
            response["failureReason"] = json!(reason);
        }
        if let Some(index) = self.failed_change {
            response["failedChange"] = json!(index);
        }
        response
    }
}

#[derive(Default)]
struct FailureTracker {
    failures: Vec<EditFailure>,
    first: Option<(usize, String)>,
}

impl FailureTracker {
    fn record(&mut self, index: usize, uri: &str, reason: impl Into<String>) {
        let reason = reason.into();
        if self.first.is_none() {
            self.first = Some((index, reason.clone()));
        }
        self.failures.push(EditFailure {
            uri: uri.to_string(),
            reason,
        });
    }

    fn into_result(self) -> ApplyEditResult {
        let (failed_change, failure_reason) = match self.first {
            Some((index, reason)) => (Some(index), Some(reason)),
            None => (None, None),
        };
        ApplyEditResult {
            applied: self.failures.is_empty(),
            failures: self.failures,
            failure_reason,
            failed_change,
        }
    }
}

/// Apply a workspace edit package against the store, mirroring resulting
/// changes back to the owning adapters.
pub(crate) fn apply(state: &mut ClientState, edit: &Value) -> Result<ApplyEditResult, HubError> {
    if !edit.is_object() {
        return Err(HubError::InvalidEdit {
            reason: "workspace edit must be an object".to_string(),
        });
    }

    let mut tracker = FailureTracker::default();
    let mut index = 0usize;

    if let Some(document_changes) = edit.get("documentChanges") {
        let Some(list) = document_changes.as_array() else {
            return Err(HubError::InvalidChanges {
                reason: "documentChanges must be an array".to_string(),
            });
        };
        for change in list {
            apply_document_change(state, change, index, &mut tracker);
            index += 1;
        }
    }

    if let Some(changes) = edit.get("changes") {
        let Some(map) = changes.as_object() else {
            return Err(HubError::InvalidChanges {
                reason: "changes must be a map of URI to edit lists".to_string(),
            });
        };
        for (raw_uri, edits) in map {
            apply_changes_entry(state, raw_uri, edits, index, &mut tracker);
            index += 1;
        }
    }

    Ok(tracker.into_result())
}

fn apply_document_change(
    state: &mut ClientState,
    change: &Value,
    index: usize,
    tracker: &mut FailureTracker,
) {
    if let Some(kind) = change.get("kind").and_then(Value::as_str) {
        if kind == "rename" {
            apply_rename(state, change, index, tracker);
        } else {
            let uri = change.get("uri").and_then(Value::as_str).unwrap_or_default();
            tracker.record(index, uri, format!("Unsupported file operation: {kind}"));
        }
        return;
    }

    let Some(raw_uri) = change.pointer("/textDocument/uri").and_then(Value::as_str) else {
        tracker.record(index, "", "Invalid URI");
        return;
    };
    let Ok(key) = uri::normalize(raw_uri) else {
        tracker.record(index, raw_uri, "Invalid URI");
        return;
    };
    if state.documents.get(&key).is_none() {
        tracker.record(index, &key, "Document not open");
        return;
    }

    let edits = change
        .get("edits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    apply_edits_to_document(state, &key, &edits, index, tracker);
}

fn apply_changes_entry(
    state: &mut ClientState,
    raw_uri: &str,
    edits: &Value,
    index: usize,
    tracker: &mut FailureTracker,
) {
    let Ok(key) = uri::normalize(raw_uri) else {
        tracker.record(index, raw_uri, "Invalid URI");
        return;
    };
    if state.documents.get(&key).is_none() {
        tracker.record(index, &key, "Document not open");
        return;
    }
    let Some(list) = edits.as_array() else {
        tracker.record(index, &key, "Invalid edits");
        return;
    };
    apply_edits_to_document(state, &key, list, index, tracker);
}

/// Validate and apply one edit list, bump the version by one, and
/// synthesize an `updateDocument` delivery for the owning adapter.
fn apply_edits_to_document(
    state: &mut ClientState,
    key: &str,
    edits: &[Value],
    index: usize,
    tracker: &mut FailureTracker,
) {
    let mut ops = Vec::with_capacity(edits.len());
    for edit in edits {
        let Some(range_value) = edit.get("range") else {
            tracker.record(index, key, "Edit missing range");
            return;
        };
        let Ok(range) = serde_json::from_value::<Range>(range_value.clone()) else {
            tracker.record(index, key, "Invalid range");
            return;
        };
        let new_text = edit
            .get("newText")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ops.push(EditOp { range, new_text });
    }

    let current = state
        .documents
        .get(key)
        .expect("document presence checked by caller");
    let language_id = current.language_id().to_string();

    match documents::apply_edit_list(current.text(), &ops) {
        Ok(new_text) => {
            let doc = state.documents.get_mut(key).expect("document still open");
            doc.set_text(new_text);
            doc.set_version(doc.version() + 1);
            let updated = doc.clone();
            let changes: Vec<DocumentChange> = if ops.is_empty() {
                vec![DocumentChange::full(updated.text())]
            } else {
                ops.into_iter()
                    .map(|op| DocumentChange::ranged(op.range, op.new_text))
                    .collect()
            };
            deliver(state, &language_id, SyncOp::Update {
                document: updated,
                changes,
            });
        }
        Err(err) => tracker.record(index, key, err.to_string()),
    }
}

fn apply_rename(
    state: &mut ClientState,
    change: &Value,
    index: usize,
    tracker: &mut FailureTracker,
) {
    let old_raw = change.get("oldUri").and_then(Value::as_str);
    let new_raw = change.get("newUri").and_then(Value::as_str);
    let (Some(old_raw), Some(new_raw)) = (old_raw, new_raw) else {
        tracker.record(index, old_raw.unwrap_or_default(), "Invalid URI");
        return;
    };
    let Ok(old_key) = uri::normalize(old_raw) else {
        tracker.record(index, old_raw, "Invalid URI");
        return;
    };
    let Ok(new_key) = uri::normalize(new_raw) else {
        tracker.record(index, new_raw, "Invalid URI");
        return;
    };
    if state.documents.get(&old_key).is_none() {
        tracker.record(index, &old_key, "Document not open");
        return;
    }

    let doc = state
        .documents
        .rename(&old_key, &new_key)
        .expect("document presence checked above");
    let language_id = doc.language_id().to_string();
    deliver(state, &language_id, SyncOp::Close {
        uri: old_key.clone(),
    });
    deliver(state, &language_id, SyncOp::Open { document: doc });
}

fn deliver(state: &mut ClientState, language_id: &str, op: SyncOp) {
    if let Some(record) = state.adapters.get_mut(language_id) {
        record.deliver(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdapterRecord;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn state_with_doc(uri: &str, text: &str) -> (ClientState, mpsc::UnboundedReceiver<SyncOp>) {
        let mut state = ClientState::new();
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let mut record = AdapterRecord::for_tests("ts");
        record.sync_tx = sync_tx;
        state.adapters.insert("ts".to_string(), record);
        state
            .documents
            .open(uri, "ts", text.to_string(), 1)
            .unwrap();
        (state, sync_rx)
    }

    #[test]
    fn test_document_changes_pathway() {
        let (mut state, mut rx) = state_with_doc("file:///a.ts", "line0\nline1\nline2\nabc def xyz\n");
        let edit = json!({
            "documentChanges": [{
                "textDocument": { "uri": "file:///a.ts", "version": 1 },
                "edits": [{
                    "range": {
                        "start": { "line": 3, "character": 10 },
                        "end": { "line": 3, "character": 11 }
                    },
                    "newText": "b"
                }]
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(result.applied);
        assert!(result.failures.is_empty());

        let doc = state.documents.get("file:///a.ts").unwrap();
        assert_eq!(doc.text(), "line0\nline1\nline2\nabc def xyb\n");
        assert_eq!(doc.version(), 2);

        match rx.try_recv().unwrap() {
            SyncOp::Update { document, changes } => {
                assert_eq!(document.text(), "line0\nline1\nline2\nabc def xyb\n");
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].text, "b");
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_target_document() {
        let mut state = ClientState::new();
        let edit = json!({
            "documentChanges": [{
                "textDocument": { "uri": "file:///missing.ts", "version": 1 },
                "edits": [{
                    "range": {
                        "start": { "line": 0, "character": 0 },
                        "end": { "line": 0, "character": 0 }
                    },
                    "newText": "x"
                }]
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(!result.applied);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].uri, "file:///missing.ts");
        assert_eq!(result.failures[0].reason, "Document not open");
        assert_eq!(result.failure_reason.as_deref(), Some("Document not open"));
        assert_eq!(result.failed_change, Some(0));
    }

    #[test]
    fn test_changes_map_pathway() {
        let (mut state, mut rx) = state_with_doc("file:///a.ts", "let value = 1;");
        let edit = json!({
            "changes": {
                "file:///a.ts": [{
                    "range": {
                        "start": { "line": 0, "character": 4 },
                        "end": { "line": 0, "character": 9 }
                    },
                    "newText": "count"
                }]
            }
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(result.applied);
        assert_eq!(
            state.documents.get("file:///a.ts").unwrap().text(),
            "let count = 1;"
        );
        assert!(matches!(rx.try_recv().unwrap(), SyncOp::Update { .. }));
    }

    #[test]
    fn test_edit_missing_range_is_recorded() {
        let (mut state, _rx) = state_with_doc("file:///a.ts", "abc");
        let edit = json!({
            "documentChanges": [{
                "textDocument": { "uri": "file:///a.ts", "version": 1 },
                "edits": [{ "newText": "x" }]
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(!result.applied);
        assert_eq!(result.failures[0].reason, "Edit missing range");
        // Document untouched.
        assert_eq!(state.documents.get("file:///a.ts").unwrap().version(), 1);
    }

    #[test]
    fn test_missing_new_text_means_deletion() {
        let (mut state, _rx) = state_with_doc("file:///a.ts", "abc");
        let edit = json!({
            "documentChanges": [{
                "textDocument": { "uri": "file:///a.ts", "version": 1 },
                "edits": [{
                    "range": {
                        "start": { "line": 0, "character": 1 },
                        "end": { "line": 0, "character": 2 }
                    }
                }]
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(result.applied);
        assert_eq!(state.documents.get("file:///a.ts").unwrap().text(), "ac");
    }

    #[test]
    fn test_rename_moves_document_and_notifies() {
        let (mut state, mut rx) = state_with_doc("file:///old.ts", "text");
        let edit = json!({
            "documentChanges": [{
                "kind": "rename",
                "oldUri": "file:///old.ts",
                "newUri": "file:///new.ts"
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(result.applied);
        assert!(state.documents.get("file:///old.ts").is_none());
        let doc = state.documents.get("file:///new.ts").unwrap();
        assert_eq!(doc.text(), "text");
        assert_eq!(doc.version(), 1, "rename preserves the version");

        match rx.try_recv().unwrap() {
            SyncOp::Close { uri } => assert_eq!(uri, "file:///old.ts"),
            other => panic!("expected Close, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SyncOp::Open { document } => assert_eq!(document.uri(), "file:///new.ts"),
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn test_create_and_delete_are_unsupported() {
        let (mut state, _rx) = state_with_doc("file:///a.ts", "x");
        let edit = json!({
            "documentChanges": [
                { "kind": "create", "uri": "file:///new.ts" },
                { "kind": "delete", "uri": "file:///a.ts" },
                {
                    "textDocument": { "uri": "file:///a.ts", "version": 1 },
                    "edits": [{
                        "range": {
                            "start": { "line": 0, "character": 0 },
                            "end": { "line": 0, "character": 1 }
                        },
                        "newText": "y"
                    }]
                }
            ]
        });

        let result = apply(&mut state, &edit).unwrap();
        assert!(!result.applied);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].reason, "Unsupported file operation: create");
        assert_eq!(result.failures[1].reason, "Unsupported file operation: delete");
        assert_eq!(result.failed_change, Some(0));
        // The text edit after the failures still applied.
        assert_eq!(state.documents.get("file:///a.ts").unwrap().text(), "y");
    }

    #[test]
    fn test_document_changes_processed_before_changes_map() {
        let (mut state, _rx) = state_with_doc("file:///a.ts", "ab");
        let edit = json!({
            "changes": {
                "file:///missing.ts": [{
                    "range": {
                        "start": { "line": 0, "character": 0 },
                        "end": { "line": 0, "character": 0 }
                    },
                    "newText": "x"
                }]
            },
            "documentChanges": [{
                "kind": "create", "uri": "file:///other.ts"
            }]
        });

        let result = apply(&mut state, &edit).unwrap();
        // documentChanges entries take index 0; the changes map entry is 1.
        assert_eq!(result.failed_change, Some(0));
        assert_eq!(result.failures.len(), 2);
    }

    #[test]
    fn test_non_object_edit_rejected() {
        let mut state = ClientState::new();
        let err = apply(&mut state, &json!("nope")).unwrap_err();
        assert_eq!(err.kind(), "InvalidEdit");
    }

    #[test]
    fn test_malformed_document_changes_rejected() {
        let mut state = ClientState::new();
        let err = apply(&mut state, &json!({"documentChanges": {}})).unwrap_err();
        assert_eq!(err.kind(), "InvalidChanges");
    }

    #[test]
    fn test_wire_response_shape() {
        let ok = ApplyEditResult {
            applied: true,
            failures: vec![],
            failure_reason: None,
            failed_change: None,
        };
        assert_eq!(ok.wire_response(), json!({"applied": true}));

        let failed = ApplyEditResult {
            applied: false,
            failures: vec![EditFailure {
                uri: "file:///a.ts".into(),
                reason: "Document not open".into(),
            }],
            failure_reason: Some("Document not open".into()),
            failed_change: Some(0),
        };
        let wire = failed.wire_response();
        assert_eq!(wire["applied"], false);
        assert_eq!(wire["failureReason"], "Document not open");
        assert_eq!(wire["failedChange"], 0);
        assert!(wire.get("failures").is_none());
    }
}
