//! Preimage/postimage representation: a byte buffer plus the line table
//! indexing it.

use crate::line::{split_lines, Line};

#[derive(Debug, Clone, Default)]
pub struct Image {
    pub buf: Vec<u8>,
    pub lines: Vec<Line>,
}

impl Image {
    pub fn new(buf: Vec<u8>) -> Self {
        let lines = split_lines(&buf);
        Self { buf, lines }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line_bytes(&self, i: usize) -> &[u8] {
        let l = &self.lines[i];
        &self.buf[l.offset..l.offset + l.len]
    }

    /// Byte offset at which line `i` begins, or `buf.len()` at the end.
    pub fn byte_offset(&self, i: usize) -> usize {
        self.lines.get(i).map(|l| l.offset).unwrap_or(self.buf.len())
    }

    pub fn remove_first_line(&mut self) {
        if self.lines.is_empty() {
            return;
        }
        let first_len = self.lines[0].len;
        self.buf.drain(0..first_len);
        self.lines.remove(0);
        for l in &mut self.lines {
            l.offset -= first_len;
        }
    }

    pub fn remove_last_line(&mut self) {
        if let Some(l) = self.lines.pop() {
            self.buf.truncate(l.offset);
        }
    }

    /// Replace the `old_count` lines starting at logical line `pos` with
    /// `new_bytes`, re-deriving the line table from scratch. Preserves the
    /// invariant that line lengths sum to `buf.len()`.
    pub fn splice(&mut self, pos: usize, old_count: usize, new_bytes: &[u8]) {
        let start = self.byte_offset(pos);
        let end = self.byte_offset(pos + old_count);
        let mut new_buf = Vec::with_capacity(self.buf.len() - (end - start) + new_bytes.len());
        new_buf.extend_from_slice(&self.buf[..start]);
        new_buf.extend_from_slice(new_bytes);
        new_buf.extend_from_slice(&self.buf[end..]);
        self.buf = new_buf;
        self.lines = split_lines(&self.buf);
    }

    /// Strip trailing blank (empty-content) lines from the end of the
    /// image, used after whitespace normalization collapses a trailing
    /// whitespace-only line to nothing.
    pub fn strip_trailing_blank_lines(&mut self) {
        while let Some(l) = self.lines.last() {
            if l.len <= 1 {
                // a lone "\n" (or nothing, at true EOF)
                self.remove_last_line();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_sum_matches_buf_len() {
        let img = Image::new(b"a\nbb\nccc\n".to_vec());
        let sum: usize = img.lines.iter().map(|l| l.len).sum();
        assert_eq!(sum, img.buf.len());
    }

    #[test]
    fn splice_replaces_middle_lines() {
        let mut img = Image::new(b"a\nb\nc\n".to_vec());
        img.splice(1, 1, b"B\n");
        assert_eq!(img.buf, b"a\nB\nc\n");
        assert_eq!(img.line_count(), 3);
    }

    #[test]
    fn remove_first_and_last_line() {
        let mut img = Image::new(b"a\nb\nc\n".to_vec());
        img.remove_first_line();
        assert_eq!(img.buf, b"b\nc\n");
        img.remove_last_line();
        assert_eq!(img.buf, b"b\n");
    }

    #[test]
    fn strip_trailing_blank_lines_removes_empties() {
        let mut img = Image::new(b"a\n\n\n".to_vec());
        img.strip_trailing_blank_lines();
        assert_eq!(img.buf, b"a\n");
    }
}
