//! Diagnostics cache — last published diagnostics per document.
//!
//! Adapters publish full replacement sets per URI; publishing an empty
//! list clears the entry. The snapshot is read-side only and does not
//! alter event fan-out.

use std::collections::HashMap;

use serde_json::Value;

struct CacheEntry {
    language_id: String,
    items: Vec<Value>,
}

pub(crate) struct DiagnosticsCache {
    data: HashMap<String, CacheEntry>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Replace the diagnostics for a normalized URI. An empty (or
    /// non-array) publication clears the entry.
    pub fn update(&mut self, uri: &str, language_id: &str, diagnostics: &Value) {
        let items: Vec<Value> = diagnostics.as_array().cloned().unwrap_or_default();
        if items.is_empty() {
            self.data.remove(uri);
        } else {
            self.data.insert(
                uri.to_string(),
                CacheEntry {
                    language_id: language_id.to_string(),
                    items,
                },
            );
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut entries: Vec<DiagnosticsEntry> = self
            .data
            .iter()
            .map(|(uri, entry)| DiagnosticsEntry {
                uri: uri.clone(),
                language_id: entry.language_id.clone(),
                diagnostics: entry.items.clone(),
            })
            .collect();

        // Sort: documents with errors first, then by URI
        entries.sort_by(|a, b| {
            let a_has_errors = a.diagnostics.iter().any(is_error);
            let b_has_errors = b.diagnostics.iter().any(is_error);
            b_has_errors
                .cmp(&a_has_errors)
                .then_with(|| a.uri.cmp(&b.uri))
        });

        DiagnosticsSnapshot { entries }
    }
}

/// LSP severity 1 is Error.
fn is_error(diagnostic: &Value) -> bool {
    diagnostic.get("severity").and_then(Value::as_i64) == Some(1)
}

/// Per-document diagnostics as last published.
#[derive(Debug, Clone)]
pub struct DiagnosticsEntry {
    pub uri: String,
    pub language_id: String,
    pub diagnostics: Vec<Value>,
}

/// Immutable snapshot of all cached diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    entries: Vec<DiagnosticsEntry>,
}

impl DiagnosticsSnapshot {
    /// Per-document entries, error-bearing documents first.
    #[must_use]
    pub fn entries(&self) -> &[DiagnosticsEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of error-level diagnostics across all documents.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| &e.diagnostics)
            .filter(|d| is_error(d))
            .count()
    }

    /// Total diagnostic count across all documents.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entries.iter().map(|e| e.diagnostics.len()).sum()
    }
}
