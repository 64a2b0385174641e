//! Zero-based document positions.
//!
//! `character` offsets count UTF-16 code units, which is the protocol default
//! encoding. Helpers here convert between those offsets and byte offsets in a
//! Rust `&str`.

use serde::{Deserialize, Serialize};

/// A zero-based line/character position in a document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `pos`.
    #[must_use]
    pub const fn point(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Length of `s` in UTF-16 code units.
#[must_use]
pub fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Byte offset of the `units`-th UTF-16 code unit in `s`.
///
/// Returns `None` when `units` points past the end of `s` or into the middle
/// of a surrogate pair.
#[must_use]
pub fn utf16_to_byte(s: &str, units: u32) -> Option<usize> {
    let mut acc = 0u32;
    for (idx, ch) in s.char_indices() {
        if acc == units {
            return Some(idx);
        }
        if acc > units {
            return None;
        }
        acc += ch.len_utf16() as u32;
    }
    (acc == units).then_some(s.len())
}

/// Byte span of the first line terminator in `s`.
///
/// `\r\n`, `\n` and a lone `\r` each end a line.
#[must_use]
pub fn find_line_break(s: &str) -> Option<(usize, usize)> {
    let at = s.find(['\n', '\r'])?;
    let len = if s[at..].starts_with("\r\n") { 2 } else { 1 };
    Some((at, at + len))
}

/// Lines of `s`, each keeping its terminator.
pub fn split_lines_inclusive(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = find_line_break(rest).map_or(rest.len(), |(_, next)| next);
        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

/// `line` without its terminator.
#[must_use]
pub fn line_content(line: &str) -> &str {
    find_line_break(line).map_or(line, |(at, _)| &line[..at])
}

/// Byte offset in `text` addressed by `pos`.
///
/// The character component may address any point of the line's content,
/// excluding its terminator. A position on the line just past a final
/// terminator (character 0) addresses the end of the text.
#[must_use]
pub fn offset_at(text: &str, pos: Position) -> Option<usize> {
    let mut line_start = 0usize;
    for _ in 0..pos.line {
        let (_, next) = find_line_break(&text[line_start..])?;
        line_start += next;
    }

    let content = line_content(&text[line_start..]);
    utf16_to_byte(content, pos.character).map(|off| line_start + off)
}
