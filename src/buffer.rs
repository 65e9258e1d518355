//! The byte buffer backing every duplex stream.
//!
//! One `Buffer` is owned by exactly one stream for that stream's entire
//! lifetime. It is a thin, allocation-aware wrapper around
//! `bytes::BytesMut`, preferring split-and-reuse over hand-rolled
//! `Vec<u8>` slicing for the append/drain/remove operations a stream's
//! read framing needs.

use bytes::{Buf, BufMut, BytesMut};

/// Index of a byte within a `Buffer`, or "not found".
pub type SearchResult = Option<usize>;

/// An ordered, growable sequence of bytes with the handful of operations
/// the stream read/write contract needs: append, drain-all, remove a
/// prefix, and search for a delimiter.
#[derive(Debug, Default)]
pub struct Buffer {
    inner: BytesMut,
}

impl Buffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// Creates an empty buffer with room for at least `capacity` bytes
    /// before it needs to reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends `bytes` to the end of the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.inner.put_slice(bytes);
    }

    /// Removes and returns every byte currently buffered.
    pub fn drain(&mut self) -> BytesMut {
        self.inner.split_to(self.inner.len())
    }

    /// Removes and returns the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds `self.length()`; callers must check
    /// `length()` first, exactly as the framing code in `read` does.
    pub fn remove(&mut self, n: usize) -> BytesMut {
        assert!(n <= self.inner.len(), "remove({n}) exceeds buffer length {}", self.inner.len());
        self.inner.split_to(n)
    }

    /// Returns the index of the first occurrence of `b`, or `None`.
    pub fn search(&self, b: u8) -> SearchResult {
        self.inner.iter().position(|&x| x == b)
    }

    /// Number of bytes currently buffered.
    pub fn length(&self) -> usize {
        self.inner.len()
    }

    /// True if no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Borrows the buffered bytes without consuming them.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner[..]
    }

    /// Discards `n` bytes from the front without returning them.
    pub fn advance(&mut self, n: usize) {
        self.inner.advance(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_round_trips() {
        let mut buf = Buffer::new();
        buf.push(b"hello");
        buf.push(b" world");
        assert_eq!(buf.length(), 11);
        let drained = buf.drain();
        assert_eq!(&drained[..], b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn remove_takes_a_prefix() {
        let mut buf = Buffer::new();
        buf.push(b"abcdef");
        let first = buf.remove(3);
        assert_eq!(&first[..], b"abc");
        assert_eq!(buf.as_slice(), b"def");
    }

    #[test]
    fn search_finds_delimiter() {
        let mut buf = Buffer::new();
        buf.push(b"abc\ndef");
        assert_eq!(buf.search(b'\n'), Some(3));
        assert_eq!(buf.search(b'z'), None);
    }

    #[test]
    fn search_on_empty_buffer() {
        let buf = Buffer::new();
        assert_eq!(buf.search(b'a'), None);
        assert!(buf.is_empty());
    }
}
