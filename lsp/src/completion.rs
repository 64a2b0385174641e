//! Completion cache, filtering, and item application.
//!
//! The most recent completion response is kept together with the caret
//! context it was computed for. While the user keeps typing inside the same
//! identifier the cached items are re-filtered locally instead of asking the
//! server again.

use tether_types::{
    CompletionItem, CompletionList, Position, Range, RequestId, TextEdit, find_line_break,
    utf16_len, utf16_to_byte,
};

/// Characters that end a word, besides space and tab.
pub const DEFAULT_NONWORD_CHARS: &str = "-+*=/\\()[]{}<>\"'.,:;~?!@#$%^&|`\u{2026}";

/// Classifies word characters for caret-word extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordChars {
    nonword: String,
}

impl Default for WordChars {
    fn default() -> Self {
        Self::new(DEFAULT_NONWORD_CHARS)
    }
}

impl WordChars {
    #[must_use]
    pub fn new(nonword: impl Into<String>) -> Self {
        Self {
            nonword: nonword.into(),
        }
    }

    #[must_use]
    pub fn is_word(&self, c: char) -> bool {
        c != ' ' && c != '\t' && !self.nonword.contains(c)
    }

    #[must_use]
    pub fn all_word(&self, s: &str) -> bool {
        s.chars().all(|c| self.is_word(c))
    }

    /// Trailing run of word characters in `line_prefix`.
    #[must_use]
    pub fn word_before<'a>(&self, line_prefix: &'a str) -> &'a str {
        let start = line_prefix
            .char_indices()
            .rev()
            .take_while(|&(_, c)| self.is_word(c))
            .last()
            .map_or(line_prefix.len(), |(i, _)| i);
        &line_prefix[start..]
    }

    /// Leading run of word characters in `line_suffix`.
    #[must_use]
    pub fn word_after<'a>(&self, line_suffix: &'a str) -> &'a str {
        let end = line_suffix
            .char_indices()
            .find(|&(_, c)| !self.is_word(c))
            .map_or(line_suffix.len(), |(i, _)| i);
        &line_suffix[..end]
    }
}

/// The last completion response and the context it answers.
#[derive(Debug, Clone)]
pub struct CompletionCache {
    request_id: RequestId,
    uri: String,
    origin: Position,
    origin_line_prefix: String,
    is_incomplete: bool,
    original_items: Vec<CompletionItem>,
    filtered_items: Vec<CompletionItem>,
}

impl CompletionCache {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        uri: impl Into<String>,
        origin: Position,
        origin_line_prefix: impl Into<String>,
        list: CompletionList,
        word_chars: &WordChars,
    ) -> Self {
        let origin_line_prefix = origin_line_prefix.into();
        let filtered_items = filter_items(&list.items, word_chars.word_before(&origin_line_prefix));
        Self {
            request_id,
            uri: uri.into(),
            origin,
            origin_line_prefix,
            is_incomplete: list.is_incomplete,
            original_items: list.items,
            filtered_items,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn origin(&self) -> Position {
        self.origin
    }

    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.is_incomplete
    }

    #[must_use]
    pub fn original_items(&self) -> &[CompletionItem] {
        &self.original_items
    }

    /// Items ranked for the word at the origin caret.
    #[must_use]
    pub fn filtered_items(&self) -> &[CompletionItem] {
        &self.filtered_items
    }

    /// Whether this response can answer a query at `caret` with
    /// `line_prefix` (the line's text before the caret).
    ///
    /// Only typing or erasing word characters on the origin line keeps the
    /// cache usable. An incomplete response is never reused.
    #[must_use]
    pub fn can_reuse(
        &self,
        uri: &str,
        caret: Position,
        line_prefix: &str,
        word_chars: &WordChars,
    ) -> bool {
        if self.is_incomplete || uri != self.uri || caret.line != self.origin.line {
            return false;
        }
        let origin = self.origin_line_prefix.as_str();
        if caret.character >= self.origin.character {
            line_prefix
                .strip_prefix(origin)
                .is_some_and(|typed| word_chars.all_word(typed))
        } else {
            origin
                .strip_prefix(line_prefix)
                .is_some_and(|erased| word_chars.all_word(erased))
        }
    }

    /// Re-rank the original items for the word before the caret.
    #[must_use]
    pub fn refilter(&self, line_prefix: &str, word_chars: &WordChars) -> Vec<CompletionItem> {
        filter_items(&self.original_items, word_chars.word_before(line_prefix))
    }
}

/// Keep items whose label contains `prefix` (case-insensitive) and rank them.
///
/// Ranking, most significant first: exact label, label contains prefix,
/// case-insensitive exact, label starts with prefix, case-insensitive prefix.
/// Ties keep server order.
#[must_use]
pub fn filter_items(items: &[CompletionItem], prefix: &str) -> Vec<CompletionItem> {
    let lower_prefix = prefix.to_lowercase();
    let mut kept: Vec<(Rank, &CompletionItem)> = items
        .iter()
        .filter_map(|item| {
            let lower = item.label.to_lowercase();
            lower.contains(&lower_prefix).then(|| {
                let rank = (
                    item.label == prefix,
                    item.label.contains(prefix),
                    lower == lower_prefix,
                    item.label.starts_with(prefix),
                    lower.starts_with(&lower_prefix),
                );
                (rank, item)
            })
        })
        .collect();
    kept.sort_by(|a, b| b.0.cmp(&a.0));
    kept.into_iter().map(|(_, item)| item.clone()).collect()
}

type Rank = (bool, bool, bool, bool, bool);

/// What inserting a completion item does to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEdit {
    pub range: Range,
    pub text: String,
    /// `text` is a snippet template still to be expanded by the host.
    pub is_snippet: bool,
    /// Caret after insertion.
    pub caret: Position,
    pub additional_edits: Vec<TextEdit>,
}

/// Resolve the edit for `item` chosen at `caret` on `line`.
///
/// `line` is the caret line's full text without terminator. Returns `None`
/// if the caret is not on `line`.
#[must_use]
pub fn apply_item(
    item: &CompletionItem,
    line: &str,
    caret: Position,
    word_chars: &WordChars,
    add_call_parens: bool,
) -> Option<CompletionEdit> {
    let (range, mut text, is_snippet) = if let Some(edit) = &item.text_edit {
        (edit.range(), edit.new_text().to_string(), item.is_snippet())
    } else {
        let split = utf16_to_byte(line, caret.character)?;
        let before = word_chars.word_before(&line[..split]);
        let after = word_chars.word_after(&line[split..]);
        let range = Range::new(
            Position::new(caret.line, caret.character - utf16_len(before)),
            Position::new(caret.line, caret.character + utf16_len(after)),
        );
        match &item.insert_text {
            Some(insert) if !item.is_snippet() => (range, insert.clone(), false),
            _ => (range, item.label.clone(), false),
        }
    };

    let mut parens_added = false;
    if add_call_parens
        && !is_snippet
        && item.kind.is_some_and(|k| k.is_callable())
        && !text.contains('(')
        && !paren_follows(line, caret.line, range.end)
    {
        text.push_str("()");
        parens_added = true;
    }

    let mut end = position_after(range.start, &text);
    if parens_added {
        end.character -= 1;
    }

    Some(CompletionEdit {
        range,
        text,
        is_snippet,
        caret: end,
        additional_edits: item.additional_text_edits.clone(),
    })
}

fn paren_follows(line: &str, line_no: u32, at: Position) -> bool {
    if at.line != line_no {
        return false;
    }
    utf16_to_byte(line, at.character)
        .and_then(|off| line[off..].chars().next())
        .is_some_and(|c| c == '(')
}

/// Position reached by inserting `text` at `start`.
fn position_after(start: Position, text: &str) -> Position {
    let mut pos = start;
    let mut rest = text;
    while let Some((_, next)) = find_line_break(rest) {
        pos = Position::new(pos.line + 1, 0);
        rest = &rest[next..];
    }
    Position::new(pos.line, pos.character + utf16_len(rest))
}
