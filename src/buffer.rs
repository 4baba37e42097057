use bytes::{Buf, Bytes, BytesMut};

use crate::constants;

/// Accumulates raw bytes fed to the tokenizer and hands them back in
/// delimiter-aligned pieces, holding back any tail that could still turn
/// out to be a delimiter prefix once more data arrives.
pub(crate) struct TokenBuffer {
    buf: BytesMut,
}

impl TokenBuffer {
    pub fn new() -> Self {
        TokenBuffer { buf: BytesMut::new() }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        memchr::memmem::find(&self.buf, pattern)
    }

    pub fn advance(&mut self, size: usize) {
        self.buf.advance(size);
    }

    pub fn read_exact(&mut self, size: usize) -> Option<Bytes> {
        if size <= self.buf.len() {
            Some(self.buf.split_to(size).freeze())
        } else {
            None
        }
    }

    /// Reads body bytes up to the next occurrence of `delimiter`.
    ///
    /// Returns `(true, bytes)` with the delimiter consumed when it was
    /// found, and `(false, bytes)` with everything that cannot be part of a
    /// split delimiter otherwise.
    pub fn read_body_data(&mut self, delimiter: &[u8]) -> (bool, Bytes) {
        match memchr::memmem::find(&self.buf, delimiter) {
            Some(idx) => {
                let bytes = self.buf.split_to(idx).freeze();
                self.buf.advance(delimiter.len());
                (true, bytes)
            }
            None => {
                let keep = self.delimiter_prefix_len(delimiter);
                let bytes = self.buf.split_to(self.buf.len() - keep).freeze();
                (false, bytes)
            }
        }
    }

    /// Length of the longest buffer suffix that is a proper prefix of
    /// `delimiter`. The delimiter starts with CR, so only CR positions in
    /// the tail window are candidates.
    fn delimiter_prefix_len(&self, delimiter: &[u8]) -> usize {
        let window = delimiter.len().saturating_sub(1).min(self.buf.len());
        let mut pos = self.buf.len() - window;

        while let Some(rel_idx) = memchr::memchr(constants::CR, &self.buf[pos..]) {
            let idx = pos + rel_idx;
            if delimiter.starts_with(&self.buf[idx..]) {
                return self.buf.len() - idx;
            }
            pos = idx + 1;
        }

        0
    }
}
