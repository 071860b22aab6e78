//! Access to the text buffer owned by the editing surface.
//!
//! The engine never touches editor internals. Everything it needs is behind
//! [`TextDocument`]: whole-text reads and writes, translation between linear
//! offsets and line/column positions, and range replacement.
//!
//! Offsets and columns are counted in chars. Out-of-range positions and
//! offsets are clamped to the document the same way common editor widgets do,
//! so callers that care about stale anchors must compare the clamped result
//! with what they asked for.

use crate::delta::{EditDelta, Position};

/// The minimal editor interface required by the synchronization engine.
pub trait TextDocument {
    /// Logical path of the document, used to route edit messages.
    fn path(&self) -> &str;

    /// Entire current text.
    fn text(&self) -> String;

    /// Replace the entire text.
    fn set_text(&mut self, text: &str);

    /// Linear char offset of `pos`, clamped to the document.
    fn offset_from_position(&self, pos: Position) -> usize;

    /// Line/column position of `offset`, clamped to the document.
    fn position_from_offset(&self, offset: usize) -> Position;

    /// Replace the text between `from` and `to` with `text`, returning the
    /// change in the form an editor would report it.
    fn replace_range(&mut self, text: &str, from: Position, to: Position) -> EditDelta;

    /// Length of the document in chars.
    fn len_chars(&self) -> usize {
        self.text().chars().count()
    }
}

/// A plain in-memory document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDocument {
    path: String,
    text: String,
}

impl MemoryDocument {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn empty(path: impl Into<String>) -> Self {
        Self::new(path, String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    fn byte_index(&self, offset: usize) -> usize {
        self.text
            .char_indices()
            .nth(offset)
            .map_or(self.text.len(), |(index, _)| index)
    }
}

impl TextDocument for MemoryDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn text(&self) -> String {
        self.text.clone()
    }

    fn set_text(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
    }

    fn offset_from_position(&self, pos: Position) -> usize {
        let mut offset = 0;
        for (line, content) in self.text.split('\n').enumerate() {
            let len = content.chars().count();
            if line == pos.line {
                return offset + pos.ch.min(len);
            }
            offset += len + 1;
        }
        // Past the last line.
        offset - 1
    }

    fn position_from_offset(&self, offset: usize) -> Position {
        let mut remaining = offset.min(self.len_chars());
        for (line, content) in self.text.split('\n').enumerate() {
            let len = content.chars().count();
            if remaining <= len {
                return Position::new(line, remaining);
            }
            remaining -= len + 1;
        }
        Position::ZERO
    }

    fn replace_range(&mut self, text: &str, from: Position, to: Position) -> EditDelta {
        let (a, b) = (self.offset_from_position(from), self.offset_from_position(to));
        let (start, end) = if a <= b { (a, b) } else { (b, a) };

        let anchor = self.position_from_offset(start);
        let (start_byte, end_byte) = (self.byte_index(start), self.byte_index(end));
        let removed: String = self.text[start_byte..end_byte].to_string();
        self.text.replace_range(start_byte..end_byte, text);

        EditDelta::from_change(anchor, &removed, text)
    }

    fn len_chars(&self) -> usize {
        self.text.chars().count()
    }
}
