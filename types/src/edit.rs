use serde::{Deserialize, Serialize};

use crate::position::{Position, Range, offset_at};

/// One entry of `didChange.contentChanges`.
///
/// With a range, `text` replaces that span; without one, `text` is the new
/// content of the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    pub text: String,
}

impl ChangeEvent {
    /// A whole-document replacement.
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    /// A range-scoped replacement.
    #[must_use]
    pub fn ranged(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.range.is_none()
    }
}

/// Apply `events` to `text` in order, the way a server would.
///
/// Returns `None` if any range does not resolve against the text it is
/// applied to.
#[must_use]
pub fn apply_change_events(text: &str, events: &[ChangeEvent]) -> Option<String> {
    let mut out = text.to_string();
    for event in events {
        match event.range {
            None => out.clone_from(&event.text),
            Some(range) => {
                let start = offset_at(&out, range.start)?;
                let end = offset_at(&out, range.end)?;
                if start > end {
                    return None;
                }
                out.replace_range(start..end, &event.text);
            }
        }
    }
    Some(out)
}

/// A textual edit applicable to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

/// A location inside a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    #[must_use]
    pub fn start(&self) -> Position {
        self.range.start
    }
}
