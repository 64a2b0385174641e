//! Completion items as returned by `textDocument/completion`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::edit::TextEdit;
use crate::position::Range;

/// Kind of a completion entry.
///
/// Codes the client does not know are kept as [`CompletionItemKind::Other`]
/// instead of failing the whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionItemKind {
    Text,
    Method,
    Function,
    Constructor,
    Field,
    Variable,
    Class,
    Interface,
    Module,
    Property,
    Unit,
    Value,
    Enum,
    Keyword,
    Snippet,
    Color,
    File,
    Reference,
    Folder,
    EnumMember,
    Constant,
    Struct,
    Event,
    Operator,
    TypeParameter,
    Other(u64),
}

const KINDS: [CompletionItemKind; 25] = [
    CompletionItemKind::Text,
    CompletionItemKind::Method,
    CompletionItemKind::Function,
    CompletionItemKind::Constructor,
    CompletionItemKind::Field,
    CompletionItemKind::Variable,
    CompletionItemKind::Class,
    CompletionItemKind::Interface,
    CompletionItemKind::Module,
    CompletionItemKind::Property,
    CompletionItemKind::Unit,
    CompletionItemKind::Value,
    CompletionItemKind::Enum,
    CompletionItemKind::Keyword,
    CompletionItemKind::Snippet,
    CompletionItemKind::Color,
    CompletionItemKind::File,
    CompletionItemKind::Reference,
    CompletionItemKind::Folder,
    CompletionItemKind::EnumMember,
    CompletionItemKind::Constant,
    CompletionItemKind::Struct,
    CompletionItemKind::Event,
    CompletionItemKind::Operator,
    CompletionItemKind::TypeParameter,
];

impl CompletionItemKind {
    #[must_use]
    pub fn from_lsp(code: u64) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|c| c.checked_sub(1))
            .and_then(|idx| KINDS.get(idx).copied())
            .unwrap_or(Self::Other(code))
    }

    #[must_use]
    pub fn to_lsp(self) -> u64 {
        match self {
            Self::Other(code) => code,
            known => KINDS
                .iter()
                .position(|k| *k == known)
                .map_or(0, |idx| idx as u64 + 1),
        }
    }

    /// Whether inserting this item produces a call site.
    #[must_use]
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Method | Self::Function | Self::Constructor)
    }
}

impl Serialize for CompletionItemKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_lsp())
    }
}

impl<'de> Deserialize<'de> for CompletionItemKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_lsp)
    }
}

/// How `insertText` / `textEdit.newText` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InsertTextFormat {
    #[default]
    PlainText,
    Snippet,
}

impl Serialize for InsertTextFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(match self {
            Self::PlainText => 1,
            Self::Snippet => 2,
        })
    }
}

impl<'de> Deserialize<'de> for InsertTextFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match u64::deserialize(deserializer)? {
            2 => Self::Snippet,
            _ => Self::PlainText,
        })
    }
}

/// The insert/replace flavour of a completion edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertReplaceEdit {
    pub new_text: String,
    pub insert: Range,
    pub replace: Range,
}

/// A completion item's own edit: a plain `TextEdit` or an `InsertReplaceEdit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionTextEdit {
    Edit(TextEdit),
    InsertReplace(InsertReplaceEdit),
}

impl CompletionTextEdit {
    /// Range to replace. Insert/replace edits use their insert range.
    #[must_use]
    pub fn range(&self) -> Range {
        match self {
            Self::Edit(edit) => edit.range,
            Self::InsertReplace(edit) => edit.insert,
        }
    }

    #[must_use]
    pub fn new_text(&self) -> &str {
        match self {
            Self::Edit(edit) => &edit.new_text,
            Self::InsertReplace(edit) => &edit.new_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CompletionItemKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_text_format: Option<InsertTextFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_edit: Option<CompletionTextEdit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_text_edits: Vec<TextEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preselect: Option<bool>,
}

impl CompletionItem {
    /// A bare item with only a label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: None,
            detail: None,
            sort_text: None,
            filter_text: None,
            insert_text: None,
            insert_text_format: None,
            text_edit: None,
            additional_text_edits: Vec::new(),
            preselect: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: CompletionItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn is_snippet(&self) -> bool {
        self.insert_text_format == Some(InsertTextFormat::Snippet)
    }
}

/// A completion response in list form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionList {
    #[serde(default)]
    pub is_incomplete: bool,
    #[serde(default)]
    pub items: Vec<CompletionItem>,
}
