/// Byte cursor over one `.sif` file, used for the duration of a single decode.
///
/// The header mixes newline-terminated text with fixed-size binary gaps, so the
/// cursor offers both line and raw byte access.
#[derive(Debug, Clone)]
pub struct RawDocument<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RawDocument<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        RawDocument { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute offset (clamped to the end).
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.bytes.len());
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Bytes from the cursor to the end of the document.
    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    /// Consume exactly `n` bytes, or nothing if fewer remain.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Consume up to and including the next `\n` and return the line without it.
    /// A final unterminated line is returned as is; `None` only at end of input.
    pub fn read_line(&mut self) -> Option<&'a [u8]> {
        if self.is_at_end() {
            return None;
        }
        let rest = self.remaining();
        match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => {
                self.pos += nl + 1;
                Some(&rest[..nl])
            }
            None => {
                self.pos = self.bytes.len();
                Some(rest)
            }
        }
    }

    /// Skip spaces and line breaks.
    pub fn skip_blank(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b != b' ' && b != b'\n' {
                break;
            }
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_and_raw_bytes_interleave() {
        let mut doc = RawDocument::new(b"12\nhello world\x00\x01tail");
        assert_eq!(doc.read_line(), Some(&b"12"[..]));
        assert_eq!(doc.take(5), Some(&b"hello"[..]));
        assert_eq!(doc.read_line(), Some(&b" world\x00\x01tail"[..]));
        assert!(doc.is_at_end());
        assert_eq!(doc.read_line(), None);
    }

    #[test]
    fn take_past_end_leaves_cursor() {
        let mut doc = RawDocument::new(b"abc");
        assert_eq!(doc.take(4), None);
        assert_eq!(doc.position(), 0);
        assert_eq!(doc.take(3), Some(&b"abc"[..]));
    }

    #[test]
    fn skip_blank_stops_at_content() {
        let mut doc = RawDocument::new(b" \n \n42\n");
        doc.skip_blank();
        assert_eq!(doc.read_line(), Some(&b"42"[..]));
    }
}
