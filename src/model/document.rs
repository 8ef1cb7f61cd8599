//! Text buffer view consumed by the markup model.
//!
//! The markup model never owns text storage itself. It only needs line/offset
//! conversions to validate line highlighters and to round query windows to
//! line boundaries. [`TextDocument`] is a small owned implementation used by
//! the replay tool and by tests.

use crate::error::{MarkupError, Result};
use std::ops::Range;

/// Line/offset conversions over a linear text buffer
pub trait DocumentView {
    /// Total length of the text in bytes
    fn text_length(&self) -> usize;

    /// Number of lines (an empty text has one line)
    fn line_count(&self) -> usize;

    /// Line containing `offset`. Offsets past the end map to the last line.
    fn line_number(&self, offset: usize) -> usize;

    /// Offset of the first byte of `line`
    fn line_start_offset(&self, line: usize) -> usize;

    /// Offset just past the last byte of `line`, excluding the terminator
    fn line_end_offset(&self, line: usize) -> usize;

    /// Offset of the first byte on `line` that is neither a space nor a tab,
    /// or the line end for blank lines
    fn first_non_space_offset(&self, line: usize) -> usize;
}

/// Describes one replacement in the buffer: `old_len` bytes at `offset`
/// were replaced by `new_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChange {
    pub offset: usize,
    pub old_len: usize,
    pub new_len: usize,
}

impl TextChange {
    pub fn insertion(offset: usize, len: usize) -> Self {
        Self {
            offset,
            old_len: 0,
            new_len: len,
        }
    }

    pub fn deletion(offset: usize, len: usize) -> Self {
        Self {
            offset,
            old_len: len,
            new_len: 0,
        }
    }

    /// End of the replaced region in pre-edit coordinates
    pub fn old_end(&self) -> usize {
        self.offset + self.old_len
    }

    /// Signed length delta applied to everything after the edit
    pub fn delta(&self) -> isize {
        self.new_len as isize - self.old_len as isize
    }
}

/// Owned text with a line-start index
#[derive(Debug, Clone, Default)]
pub struct TextDocument {
    text: String,
    /// Byte offset of the start of each line; always begins with 0
    line_starts: Vec<usize>,
}

impl TextDocument {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = compute_line_starts(&text);
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace `range` with `replacement` and report the change for retargeting
    pub fn replace(&mut self, range: Range<usize>, replacement: &str) -> Result<TextChange> {
        if range.start > range.end
            || range.end > self.text.len()
            || !self.text.is_char_boundary(range.start)
            || !self.text.is_char_boundary(range.end)
        {
            return Err(MarkupError::InvalidRange {
                start: range.start,
                end: range.end,
                text_length: self.text.len(),
            });
        }

        let change = TextChange {
            offset: range.start,
            old_len: range.end - range.start,
            new_len: replacement.len(),
        };
        self.text.replace_range(range, replacement);
        self.line_starts = compute_line_starts(&self.text);
        Ok(change)
    }

    pub fn insert(&mut self, offset: usize, text: &str) -> Result<TextChange> {
        self.replace(offset..offset, text)
    }

    pub fn delete(&mut self, range: Range<usize>) -> Result<TextChange> {
        self.replace(range, "")
    }
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        )
        .collect()
}

impl DocumentView for TextDocument {
    fn text_length(&self) -> usize {
        self.text.len()
    }

    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_number(&self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        }
    }

    fn line_start_offset(&self, line: usize) -> usize {
        self.line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len())
    }

    fn line_end_offset(&self, line: usize) -> usize {
        match self.line_starts.get(line + 1) {
            // Exclude the '\n'
            Some(next_start) => next_start - 1,
            None => self.text.len(),
        }
    }

    fn first_non_space_offset(&self, line: usize) -> usize {
        let start = self.line_start_offset(line);
        let end = self.line_end_offset(line);
        self.text.as_bytes()[start..end]
            .iter()
            .position(|b| *b != b' ' && *b != b'\t')
            .map_or(end, |pos| start + pos)
    }
}
