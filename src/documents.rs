//! Document store — authoritative map of open text documents.
//!
//! Documents are keyed by normalized URI and carry a monotonically
//! increasing version. All position math lives here: ranges are resolved
//! against LF-split lines with out-of-range coordinates clamped, and
//! edit lists are applied in reverse document order.

use std::collections::HashMap;

use crate::error::HubError;
use crate::types::{DocumentChange, Position, Range, TextDocument};
use crate::uri;

/// A validated text edit: a range plus its replacement.
#[derive(Debug, Clone)]
pub(crate) struct EditOp {
    pub range: Range,
    pub new_text: String,
}

pub(crate) struct DocumentStore {
    docs: HashMap<String, TextDocument>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            docs: HashMap::new(),
        }
    }

    /// Open (or replace) a document. Returns a clone of the stored record.
    pub fn open(
        &mut self,
        uri: &str,
        language_id: &str,
        text: String,
        version: i64,
    ) -> Result<TextDocument, HubError> {
        let key = uri::normalize(uri)?;
        if version < 0 {
            return Err(HubError::InvalidVersion {
                uri: key,
                reason: format!("version {version} must be non-negative"),
            });
        }
        let doc = TextDocument::new(key.clone(), language_id.to_string(), text, version);
        self.docs.insert(key, doc.clone());
        Ok(doc)
    }

    /// Apply an ordered change list at a strictly greater version.
    ///
    /// An empty change list is allowed and only bumps the version.
    pub fn update(
        &mut self,
        uri: &str,
        version: i64,
        changes: &[DocumentChange],
    ) -> Result<TextDocument, HubError> {
        let key = uri::normalize(uri)?;
        let doc = self
            .docs
            .get_mut(&key)
            .ok_or(HubError::DocumentNotOpen { uri: key.clone() })?;
        if version <= doc.version() {
            return Err(HubError::InvalidVersion {
                uri: key,
                reason: format!(
                    "version {version} must be greater than current {}",
                    doc.version()
                ),
            });
        }

        let mut text = doc.text().to_string();
        for change in changes {
            text = apply_change(&text, change)?;
        }
        doc.set_text(text);
        doc.set_version(version);
        Ok(doc.clone())
    }

    /// Remove a document. Returns the removed record, `None` if not open.
    pub fn close(&mut self, uri: &str) -> Result<Option<TextDocument>, HubError> {
        let key = uri::normalize(uri)?;
        Ok(self.docs.remove(&key))
    }

    /// Look up by normalized key.
    pub fn get(&self, key: &str) -> Option<&TextDocument> {
        self.docs.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut TextDocument> {
        self.docs.get_mut(key)
    }

    /// Move a document to a new normalized key, preserving text,
    /// language, and version.
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> Option<TextDocument> {
        let mut doc = self.docs.remove(old_key)?;
        doc.set_uri(new_key.to_string());
        self.docs.insert(new_key.to_string(), doc.clone());
        Some(doc)
    }

    /// Clones of all documents owned by `language_id`.
    pub fn list_for_language(&self, language_id: &str) -> Vec<TextDocument> {
        let mut docs: Vec<TextDocument> = self
            .docs
            .values()
            .filter(|d| d.language_id() == language_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.uri().cmp(b.uri()));
        docs
    }

    /// Clones of every open document, drained. Used during disposal.
    pub fn drain(&mut self) -> Vec<TextDocument> {
        self.docs.drain().map(|(_, doc)| doc).collect()
    }
}

/// Apply one content change: ranged changes splice, rangeless changes
/// replace the whole text.
fn apply_change(text: &str, change: &DocumentChange) -> Result<String, HubError> {
    let Some(range) = change.range else {
        return Ok(change.text.clone());
    };
    let start = position_to_offset(text, range.start)?;
    let end = position_to_offset(text, range.end)?.max(start);
    let mut out = String::with_capacity(text.len() - (end - start) + change.text.len());
    out.push_str(&text[..start]);
    out.push_str(&change.text);
    out.push_str(&text[end..]);
    Ok(out)
}

/// Resolve a position to a byte offset.
///
/// Lines are split by LF, each with an implicit trailing LF for offset
/// accounting. An out-of-range character clamps to the line's length; an
/// out-of-range line clamps to end-of-text. Negative coordinates fail.
pub(crate) fn position_to_offset(text: &str, pos: Position) -> Result<usize, HubError> {
    if pos.line < 0 || pos.character < 0 {
        return Err(HubError::InvalidPosition {
            line: pos.line,
            character: pos.character,
        });
    }

    let mut offset = 0usize;
    for (index, line) in text.split('\n').enumerate() {
        if index as i64 == pos.line {
            return Ok(offset + char_offset(line, pos.character as usize));
        }
        offset += line.len() + 1;
    }
    Ok(text.len())
}

/// Byte offset of the `character`-th Unicode scalar in `line`, clamped.
fn char_offset(line: &str, character: usize) -> usize {
    line.char_indices()
        .nth(character)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

/// Apply an edit list to a full text.
///
/// Edits are sorted in reverse document order by start position and
/// applied greedily. Callers are expected to supply non-overlapping
/// edits (the LSP contract); no overlap detection is performed.
pub(crate) fn apply_edit_list(text: &str, edits: &[EditOp]) -> Result<String, HubError> {
    let mut ordered: Vec<&EditOp> = edits.iter().collect();
    ordered.sort_by(|a, b| {
        (b.range.start.line, b.range.start.character)
            .cmp(&(a.range.start.line, a.range.start.character))
    });

    let mut out = text.to_string();
    for edit in ordered {
        let start = position_to_offset(&out, edit.range.start)?;
        let end = position_to_offset(&out, edit.range.end)?.max(start);
        out.replace_range(start..end, &edit.new_text);
    }
    Ok(out)
}
