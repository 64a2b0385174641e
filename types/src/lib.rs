//! Protocol value types for Tether.
//!
//! This crate contains the plain data that flows between a language server and
//! the client core: positions, ranges, edits, diagnostics and completion items.
//! No IO, no async. Everything here serializes to the wire shape used by the
//! Language Server Protocol.

#![allow(clippy::missing_errors_doc)]

mod completion;
mod diagnostic;
mod edit;
mod ids;
mod message;
mod position;

pub use completion::{
    CompletionItem, CompletionItemKind, CompletionList, CompletionTextEdit, InsertReplaceEdit,
    InsertTextFormat,
};
pub use diagnostic::{Diagnostic, DiagnosticCode, DiagnosticSeverity};
pub use edit::{ChangeEvent, Location, TextEdit, apply_change_events};
pub use ids::RequestId;
pub use message::{FormattingOptions, MessageType};
pub use position::{
    Position, Range, find_line_break, line_content, offset_at, split_lines_inclusive, utf16_len,
    utf16_to_byte,
};
