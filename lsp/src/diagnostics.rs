//! Latest published diagnostics per document.
//!
//! Publishes for documents the host is not showing are kept and marked dirty;
//! they are handed out again when the document becomes visible.

use std::collections::{BTreeMap, HashMap, HashSet};

use tether_types::{Diagnostic, DiagnosticSeverity};

/// Diagnostics anchored on one line, ready for a gutter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiagnostics {
    pub line: u32,
    /// Most severe level on the line, if any diagnostic has one.
    pub severity: Option<DiagnosticSeverity>,
    /// One `[severity:code]: message` entry per diagnostic, most severe first.
    pub text: String,
}

/// Group diagnostics per line, ordered by line and, within a line, by
/// severity with unset severity last.
#[must_use]
pub fn group_by_line(diagnostics: &[Diagnostic]) -> Vec<LineDiagnostics> {
    let mut lines: BTreeMap<u32, Vec<&Diagnostic>> = BTreeMap::new();
    for d in diagnostics {
        lines.entry(d.line()).or_default().push(d);
    }
    lines
        .into_iter()
        .map(|(line, mut diags)| {
            diags.sort_by_key(|d| d.severity.map_or(u8::MAX, |s| s as u8));
            LineDiagnostics {
                line,
                severity: diags.first().and_then(|d| d.severity),
                text: diags
                    .iter()
                    .map(|d| d.gutter_text())
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
    dirty: HashSet<String>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a publish. Returns `true` when the host should apply it now.
    ///
    /// An empty publish clears the document's diagnostics.
    pub fn publish(&mut self, uri: &str, items: Vec<Diagnostic>, visible: bool) -> bool {
        if items.is_empty() {
            self.data.remove(uri);
        } else {
            self.data.insert(uri.to_string(), items);
        }
        if visible {
            self.dirty.remove(uri);
        } else {
            self.dirty.insert(uri.to_string());
        }
        visible
    }

    /// The document became visible. Returns its diagnostics if a publish
    /// arrived while it was hidden.
    pub fn on_document_shown(&mut self, uri: &str) -> Option<&[Diagnostic]> {
        if self.dirty.remove(uri) {
            Some(self.get(uri))
        } else {
            None
        }
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> &[Diagnostic] {
        self.data.get(uri).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_dirty(&self, uri: &str) -> bool {
        self.dirty.contains(uri)
    }

    #[must_use]
    pub fn by_line(&self, uri: &str) -> Vec<LineDiagnostics> {
        group_by_line(self.get(uri))
    }

    pub fn clear(&mut self, uri: &str) {
        self.data.remove(uri);
        self.dirty.remove(uri);
    }

    /// Uris with diagnostics, sorted with error-containing documents first.
    #[must_use]
    pub fn uris(&self) -> Vec<&str> {
        let mut uris: Vec<&str> = self.data.keys().map(String::as_str).collect();
        uris.sort_by(|a, b| {
            let a_err = self.has_errors(a);
            let b_err = self.has_errors(b);
            b_err.cmp(&a_err).then_with(|| a.cmp(b))
        });
        uris
    }

    fn has_errors(&self, uri: &str) -> bool {
        self.get(uri)
            .iter()
            .any(|d| d.severity.is_some_and(DiagnosticSeverity::is_error))
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.data
            .values()
            .flatten()
            .filter(|d| d.severity == Some(severity))
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    /// Compact status like "E:3 W:5", empty when there is nothing to show.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.data.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
