//! Documents known to the client, keyed by URI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tether_types::ChangeEvent;

use crate::sync::{self, SyncKind};

/// The client's view of one document as last sent to its server.
#[derive(Debug, Clone)]
pub struct Document {
    uri: String,
    path: Option<PathBuf>,
    language_id: String,
    version: i32,
    text: String,
    server: Option<String>,
}

/// Change events plus the version they bring the document to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub version: i32,
    pub events: Vec<ChangeEvent>,
}

impl Document {
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        path: Option<PathBuf>,
        language_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            path,
            language_id: language_id.into(),
            version: 1,
            text: text.into(),
            server: None,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Text as the server last saw it.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Name of the server this document was opened with, if any.
    #[must_use]
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.server.is_some()
    }

    pub(crate) fn set_server(&mut self, server: Option<String>) {
        self.server = server;
    }

    pub fn set_language_id(&mut self, language_id: impl Into<String>) {
        self.language_id = language_id.into();
    }

    /// Replace the snapshot without producing events, e.g. before `didOpen`.
    pub fn reset_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Bring the snapshot up to `new_text` and return what the server must be
    /// told under `kind`.
    ///
    /// Returns `None` when there is nothing to send; the version only moves
    /// when a batch is returned.
    pub fn sync_to(&mut self, kind: SyncKind, new_text: &str) -> Option<ChangeBatch> {
        if kind == SyncKind::None {
            return None;
        }
        let events = sync::compute_changes(kind, &self.text, new_text);
        if events.is_empty() {
            return None;
        }
        self.text.clear();
        self.text.push_str(new_text);
        self.version += 1;
        Some(ChangeBatch {
            version: self.version,
            events,
        })
    }
}

/// The uri → document mapping. At most one document exists per uri.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<String, Document>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `doc`, or return the existing document for its uri.
    pub fn insert(&mut self, doc: Document) -> &mut Document {
        self.docs.entry(doc.uri.clone()).or_insert(doc)
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&Document> {
        self.docs.get(uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut Document> {
        self.docs.get_mut(uri)
    }

    pub fn remove(&mut self, uri: &str) -> Option<Document> {
        self.docs.remove(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Uris of documents opened with `server`.
    #[must_use]
    pub fn opened_with(&self, server: &str) -> Vec<String> {
        self.docs
            .values()
            .filter(|d| d.server() == Some(server))
            .map(|d| d.uri.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_keeps_version() {
        let mut doc = Document::new("file:///a.py", None, "python", "x = 1\n");
        for kind in [SyncKind::Full, SyncKind::Incremental] {
            assert!(doc.sync_to(kind, "x = 1\n").is_none());
            assert_eq!(doc.version(), 1);
        }
    }

    #[test]
    fn test_version_bumps_once_per_batch() {
        let mut doc = Document::new("file:///a.py", None, "python", "a\nb\nc\n");
        let batch = doc.sync_to(SyncKind::Incremental, "A\nb\nC\n").unwrap();
        assert_eq!(batch.version, 2);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.text(), "A\nb\nC\n");
    }

    #[test]
    fn test_none_sync_leaves_snapshot() {
        let mut doc = Document::new("file:///a.py", None, "python", "old");
        assert!(doc.sync_to(SyncKind::None, "new").is_none());
        assert_eq!(doc.text(), "old");
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn test_full_sync_sends_whole_text() {
        let mut doc = Document::new("file:///a.py", None, "python", "a\nb\n");
        let batch = doc.sync_to(SyncKind::Full, "a\nbb\n").unwrap();
        assert_eq!(batch.events, vec![ChangeEvent::full("a\nbb\n")]);
    }

    #[test]
    fn test_store_keeps_one_document_per_uri() {
        let mut store = DocumentStore::new();
        store.insert(Document::new("file:///a", None, "rust", "first"));
        let doc = store.insert(Document::new("file:///a", None, "rust", "second"));
        assert_eq!(doc.text(), "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_opened_with_filters_by_server() {
        let mut store = DocumentStore::new();
        store
            .insert(Document::new("file:///a", None, "rust", ""))
            .set_server(Some("ra".into()));
        store.insert(Document::new("file:///b", None, "rust", ""));
        assert_eq!(store.opened_with("ra"), vec!["file:///a".to_string()]);
        assert!(store.remove("file:///a").is_some());
        assert!(store.opened_with("ra").is_empty());
    }
}
