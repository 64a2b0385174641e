//! Document synchronization: snapshot pairs to `didChange` content changes.
//!
//! Incremental changes come from a line diff ([`similar`]); each non-equal
//! block becomes one ranged event. Ranges are expressed against the document
//! as it stands after the previous events of the same batch, so a server that
//! applies them in order reproduces the new text exactly.

use std::time::{Duration, Instant};

use serde_json::Value;
use similar::{DiffOp, TextDiff};
use tether_types::{ChangeEvent, Position, Range, apply_change_events, line_content, utf16_len};

/// Budget for computing an incremental diff before falling back to a full
/// replacement.
pub const DIFF_DEADLINE: Duration = Duration::from_millis(100);

/// The server's declared `TextDocumentSyncKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncKind {
    #[default]
    None,
    Full,
    Incremental,
}

impl SyncKind {
    #[must_use]
    pub fn from_lsp(value: u64) -> Self {
        match value {
            1 => Self::Full,
            2 => Self::Incremental,
            _ => Self::None,
        }
    }

    /// Read `syncKind` from `didChange` registration options.
    #[must_use]
    pub fn from_options(options: &Value) -> Self {
        options
            .get("syncKind")
            .and_then(Value::as_u64)
            .map_or(Self::None, Self::from_lsp)
    }
}

/// Change events turning `old` into `new` under `kind`.
///
/// Identical texts produce no events for every kind.
#[must_use]
pub fn compute_changes(kind: SyncKind, old: &str, new: &str) -> Vec<ChangeEvent> {
    if old == new {
        return Vec::new();
    }
    match kind {
        SyncKind::None => Vec::new(),
        SyncKind::Full => vec![ChangeEvent::full(new)],
        SyncKind::Incremental => incremental_changes(old, new, Instant::now() + DIFF_DEADLINE),
    }
}

/// Line-diff `old` against `new`, falling back to one full replacement when
/// `deadline` passes before the diff is done.
#[must_use]
pub fn incremental_changes(old: &str, new: &str, deadline: Instant) -> Vec<ChangeEvent> {
    let diff = TextDiff::configure()
        .deadline(deadline)
        .diff_lines(old, new);
    if Instant::now() >= deadline {
        tracing::debug!("Line diff exceeded its budget, sending full text");
        return vec![ChangeEvent::full(new)];
    }

    let old_lines = diff.old_slices();
    let new_lines = diff.new_slices();
    let mut events: Vec<ChangeEvent> = Vec::new();

    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => {
                let range = removed_range(old_lines, old_index, old_len, new_index);
                events.push(ChangeEvent::ranged(range, ""));
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                let text = new_lines[new_index..new_index + new_len].concat();
                let at = Position::new(line_no(new_index), 0);
                // A deletion at the same spot followed by this insert is a replace.
                if let Some(prev) = events.last_mut()
                    && prev.text.is_empty()
                    && prev.range.is_some_and(|r| r.start == at)
                {
                    prev.text = text;
                } else {
                    events.push(ChangeEvent::ranged(Range::point(at), text));
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let range = removed_range(old_lines, old_index, old_len, new_index);
                let text = new_lines[new_index..new_index + new_len].concat();
                events.push(ChangeEvent::ranged(range, text));
            }
        }
    }

    // A lone `\r` from one side can fuse with a `\n` from the other while the
    // batch is applied, shifting every later line number.
    if apply_change_events(old, &events).as_deref() != Some(new) {
        tracing::debug!("Line diff does not replay cleanly, sending full text");
        return vec![ChangeEvent::full(new)];
    }
    events
}

/// Range covering `old_len` old lines now starting at line `at`.
///
/// The range ends at the start of the following line, absorbing the last
/// terminator (`\n`, `\r\n` or `\r`), unless the block ends in an
/// unterminated final line.
fn removed_range(old_lines: &[&str], old_index: usize, old_len: usize, at: usize) -> Range {
    let start = Position::new(line_no(at), 0);
    let last = old_lines[old_index + old_len - 1];
    let end = if line_content(last).len() < last.len() {
        Position::new(line_no(at + old_len), 0)
    } else {
        Position::new(line_no(at + old_len - 1), utf16_len(last))
    };
    Range::new(start, end)
}

fn line_no(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn assert_reproduces(old: &str, new: &str) -> Vec<ChangeEvent> {
        let events = compute_changes(SyncKind::Incremental, old, new);
        let applied = apply_change_events(old, &events)
            .unwrap_or_else(|| panic!("events did not resolve: {events:?}"));
        assert_eq!(applied, new, "old={old:?} events={events:?}");
        events
    }

    #[test]
    fn test_single_line_replace() {
        let events = assert_reproduces("a\nb\nc\n", "a\nX\nc\n");
        assert_eq!(
            events,
            vec![ChangeEvent::ranged(
                Range::new(Position::new(1, 0), Position::new(2, 0)),
                "X\n"
            )]
        );
    }

    #[test]
    fn test_pure_insertion_is_zero_width() {
        let events = assert_reproduces("a\nc\n", "a\nb\nc\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].range.unwrap().is_empty());
        assert_eq!(events[0].range.unwrap().start, Position::new(1, 0));
        assert_eq!(events[0].text, "b\n");
    }

    #[test]
    fn test_deletion_absorbs_terminator() {
        let events = assert_reproduces("a\nb\nc\n", "a\nc\n");
        assert_eq!(
            events,
            vec![ChangeEvent::ranged(
                Range::new(Position::new(1, 0), Position::new(2, 0)),
                ""
            )]
        );
    }

    #[test]
    fn test_unterminated_last_line_ends_at_character() {
        let events = assert_reproduces("a\nbé😀", "a\n");
        assert_eq!(
            events,
            vec![ChangeEvent::ranged(
                Range::new(Position::new(1, 0), Position::new(1, 4)),
                ""
            )]
        );
    }

    #[test]
    fn test_multiple_blocks_apply_sequentially() {
        assert_reproduces("1\n2\n3\n4\n5\n6\n", "1\nx\n3\n4\n6\ny\nz\n");
        assert_reproduces("head\nmid\ntail", "head\ntail\nmore");
        assert_reproduces("", "fresh\ntext");
        assert_reproduces("gone\nentirely", "");
        assert_reproduces("crlf\r\nlines\r\n", "crlf\r\nchanged\r\nlines\r\n");
    }

    #[test]
    fn test_lone_carriage_return_lines() {
        let events = assert_reproduces("a\rb\nc\n", "a\rb\nX\n");
        assert_eq!(
            events,
            vec![ChangeEvent::ranged(
                Range::new(Position::new(2, 0), Position::new(3, 0)),
                "X\n"
            )]
        );
        let events = assert_reproduces("keep\rdrop\rtail", "keep\rtail");
        assert_eq!(
            events,
            vec![ChangeEvent::ranged(
                Range::new(Position::new(1, 0), Position::new(2, 0)),
                ""
            )]
        );
        assert_reproduces("x\r\ny\rz", "x\ry\r\nz\r");
    }

    #[test]
    fn test_identical_text_produces_no_events() {
        for kind in [SyncKind::None, SyncKind::Full, SyncKind::Incremental] {
            assert!(compute_changes(kind, "same\n", "same\n").is_empty());
        }
    }

    #[test]
    fn test_full_is_single_whole_document_event() {
        let events = compute_changes(SyncKind::Full, "a\nb\n", "a\nb\nc\n");
        assert_eq!(events, vec![ChangeEvent::full("a\nb\nc\n")]);
    }

    #[test]
    fn test_none_produces_nothing() {
        assert!(compute_changes(SyncKind::None, "a", "b").is_empty());
    }

    #[test]
    fn test_expired_deadline_falls_back_to_full() {
        let past = Instant::now();
        let events = incremental_changes("a\nb\n", "a\nc\n", past);
        assert_eq!(events, vec![ChangeEvent::full("a\nc\n")]);
    }

    #[test]
    fn test_sync_kind_from_options() {
        assert_eq!(
            SyncKind::from_options(&serde_json::json!({ "syncKind": 2 })),
            SyncKind::Incremental
        );
        assert_eq!(
            SyncKind::from_options(&serde_json::json!({ "syncKind": 1 })),
            SyncKind::Full
        );
        assert_eq!(SyncKind::from_options(&serde_json::json!({})), SyncKind::None);
    }

    fn document() -> impl Strategy<Value = String> {
        let piece = prop_oneof![
            Just("\n".to_string()),
            Just("\r\n".to_string()),
            Just("\r".to_string()),
            Just("😀".to_string()),
            Just("é".to_string()),
            "[a-c ]{0,3}",
        ];
        prop::collection::vec(piece, 0..24).prop_map(|pieces| pieces.concat())
    }

    proptest! {
        #[test]
        fn test_incremental_events_replay_to_new_text(old in document(), new in document()) {
            let events = compute_changes(SyncKind::Incremental, &old, &new);
            prop_assert_eq!(apply_change_events(&old, &events), Some(new.clone()));
            if old == new {
                prop_assert!(events.is_empty());
            }
        }

        #[test]
        fn test_full_sync_sends_one_whole_document(old in document(), new in document()) {
            let events = compute_changes(SyncKind::Full, &old, &new);
            if old == new {
                prop_assert!(events.is_empty());
            } else {
                prop_assert_eq!(events, vec![ChangeEvent::full(new.clone())]);
            }
        }
    }
}
