//! Callbacks from the client core into the host editor.
//!
//! Every method has a no-op default so a host implements only what it shows.

use serde_json::Value;
use tether_types::{CompletionItem, Location, MessageType, Position, TextEdit};

use crate::diagnostics::LineDiagnostics;
use crate::protocol::ResponseError;

/// Caller state captured when a document request is sent and handed back
/// with its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub uri: String,
    pub position: Position,
    /// Text of the caret line before the caret.
    pub line_prefix: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(uri: impl Into<String>, position: Position, line_prefix: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            position,
            line_prefix: line_prefix.into(),
        }
    }
}

#[allow(unused_variables)]
pub trait Host {
    /// Whether the document is currently shown. Diagnostics for hidden
    /// documents are held back until [`crate::LspManager::on_document_shown`].
    fn is_document_visible(&self, uri: &str) -> bool {
        true
    }

    fn status(&mut self, message: &str) {}

    fn log_message(&mut self, server: &str, kind: MessageType, message: &str) {}

    fn show_message(&mut self, server: &str, kind: MessageType, message: &str) {}

    /// One line of the server's stderr.
    fn server_stderr(&mut self, server: &str, line: &str) {}

    fn server_initialized(&mut self, server: &str) {}

    fn server_exited(&mut self, server: &str) {}

    fn progress(&mut self, server: &str, token: &Value, value: &Value) {}

    /// Diagnostics for `uri` grouped per line. An empty slice clears.
    fn diagnostics_changed(&mut self, uri: &str, lines: &[LineDiagnostics]) {}

    /// Ranked completion candidates, from a response or from the cache.
    fn completion(&mut self, context: &RequestContext, items: &[CompletionItem]) {}

    fn hover(&mut self, context: &RequestContext, text: &str) {}

    fn signature_help(&mut self, context: &RequestContext, label: &str) {}

    /// Result of a definition, references, implementation, declaration or
    /// type definition request.
    fn locations(&mut self, method: &str, context: &RequestContext, locations: &[Location]) {}

    /// Edits from a formatting request.
    fn text_edits(&mut self, context: &RequestContext, edits: &[TextEdit]) {}

    /// Any other response, undecoded.
    fn response(&mut self, method: &str, context: Option<&RequestContext>, result: &Value) {}

    fn request_failed(&mut self, server: &str, method: &str, error: &ResponseError) {}
}
