//! Positional edit operations exchanged between peers.
//!
//! An [`EditDelta`] describes one text mutation the way an editor widget
//! reports it: a line/column anchor, the text that was removed and the text
//! that was inserted, each split into line fragments.
//!
//! ```text
//! "one\ntwo"  ──►  ["one", "two"]      (two fragments, one line break)
//! ""          ──►  [""]                (pure insertion: nothing removed)
//! ```

use serde::{Deserialize, Serialize};

/// Line/column position inside a document. Both fields are zero-based and
/// counted in chars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub ch: usize,
}

impl Position {
    pub const ZERO: Position = Position { line: 0, ch: 0 };

    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }
}

/// A single text mutation anchored at `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDelta {
    /// Anchor of the change, valid against the sender's text before the edit.
    pub from: Position,
    /// Removed text split on line breaks.
    pub removed: Vec<String>,
    /// Inserted text split on line breaks.
    pub text: Vec<String>,
}

impl EditDelta {
    pub fn new(from: Position, removed: Vec<String>, text: Vec<String>) -> Self {
        Self { from, removed, text }
    }

    /// Build a delta from the removed and inserted strings of a change.
    pub fn from_change(from: Position, removed: &str, inserted: &str) -> Self {
        Self {
            from,
            removed: split_lines(removed),
            text: split_lines(inserted),
        }
    }

    /// Linear length of the removed span: every fragment plus the line
    /// breaks between them.
    pub fn removed_len(&self) -> usize {
        if self.removed.is_empty() {
            return 0;
        }
        let chars: usize = self.removed.iter().map(|f| f.chars().count()).sum();
        chars + self.removed.len() - 1
    }

    /// The inserted fragments joined back into a single string.
    pub fn inserted_text(&self) -> String {
        self.text.join("\n")
    }

    /// True when applying the delta would not change any text.
    pub fn is_noop(&self) -> bool {
        self.removed_len() == 0 && self.text.iter().all(String::is_empty)
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_len_counts_line_breaks() {
        let delta = EditDelta::new(
            Position::new(0, 10),
            vec!["ab".into(), "cd".into()],
            vec!["X".into(), "Y".into()],
        );
        assert_eq!(delta.removed_len(), 5);
        assert_eq!(delta.inserted_text(), "X\nY");
    }

    #[test]
    fn test_removed_len_empty_fragments() {
        let none = EditDelta::new(Position::ZERO, Vec::new(), vec!["a".into()]);
        assert_eq!(none.removed_len(), 0);

        let single_empty = EditDelta::from_change(Position::ZERO, "", "a");
        assert_eq!(single_empty.removed, vec![String::new()]);
        assert_eq!(single_empty.removed_len(), 0);

        // A lone line break is two empty fragments.
        let newline = EditDelta::from_change(Position::ZERO, "\n", "");
        assert_eq!(newline.removed_len(), 1);
    }

    #[test]
    fn test_removed_len_counts_chars_not_bytes() {
        let delta = EditDelta::from_change(Position::ZERO, "héllo", "");
        assert_eq!(delta.removed_len(), 5);
    }

    #[test]
    fn test_from_change_splits_lines() {
        let delta = EditDelta::from_change(Position::new(2, 1), "x", "first\nsecond\n");
        assert_eq!(delta.text, vec!["first", "second", ""]);
        assert_eq!(delta.inserted_text(), "first\nsecond\n");
    }

    #[test]
    fn test_noop_detection() {
        assert!(EditDelta::from_change(Position::ZERO, "", "").is_noop());
        assert!(!EditDelta::from_change(Position::ZERO, "a", "").is_noop());
        assert!(!EditDelta::from_change(Position::ZERO, "", "a").is_noop());
    }

    #[test]
    fn test_position_ordering() {
        assert!(Position::new(0, 9) < Position::new(1, 0));
        assert!(Position::new(3, 2) < Position::new(3, 4));
        assert_eq!(Position::default(), Position::ZERO);
    }
}
