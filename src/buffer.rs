//! Fixed-capacity byte window used by the parser, the formatter and socket I/O.
//!
//! # Responsibilities
//! - Track a read cursor and a write cursor over one allocation
//! - Remember a read mark and a write mark so a partially parsed or
//!   formatted production can be rolled back
//! - Compact unread bytes to the front so a jammed buffer can take more input
//!
//! # Design Decisions
//! - Capacity never grows. A production that cannot fit after compaction is
//!   reported as `Overflow` by the caller ("parser jammed").
//! - Compaction keeps everything from the read mark onward, so a resumable
//!   parser can reset to its mark after more bytes arrive.

use std::fmt;

/// Byte window with read/write cursors, marks and compaction.
#[derive(Clone)]
pub struct ByteBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
    read_mark: usize,
    write_mark: usize,
}

impl ByteBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            read_mark: 0,
            write_mark: 0,
        }
    }

    /// Buffer holding a copy of `bytes`, ready to be read.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new(bytes.len());
        buffer.put_slice(bytes);
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written but not yet read.
    pub fn readable(&self) -> usize {
        self.write - self.read
    }

    /// Free bytes after the write cursor.
    pub fn writable(&self) -> usize {
        self.data.len() - self.write
    }

    pub fn is_readable(&self) -> bool {
        self.read < self.write
    }

    pub fn is_writable(&self) -> bool {
        self.write < self.data.len()
    }

    pub fn read_position(&self) -> usize {
        self.read
    }

    pub fn write_position(&self) -> usize {
        self.write
    }

    /// Move the read cursor. Clamped to the write cursor.
    pub fn set_read_position(&mut self, position: usize) {
        self.read = position.min(self.write);
    }

    /// Move the write cursor. Clamped to capacity and never behind the read cursor.
    pub fn set_write_position(&mut self, position: usize) {
        self.write = position.clamp(self.read, self.data.len());
    }

    pub fn read_mark(&mut self) {
        self.read_mark = self.read;
    }

    pub fn read_reset(&mut self) {
        self.read = self.read_mark;
    }

    pub fn write_mark(&mut self) {
        self.write_mark = self.write;
    }

    pub fn write_reset(&mut self) {
        self.write = self.write_mark.max(self.read);
    }

    /// Forget all content.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.read_mark = 0;
        self.write_mark = 0;
    }

    /// Shift unread bytes (from the read mark) to the front.
    ///
    /// Returns false when nothing could be reclaimed.
    pub fn compact(&mut self) -> bool {
        let start = self.read_mark.min(self.read);
        if start == 0 {
            return false;
        }
        self.data.copy_within(start..self.write, 0);
        self.read -= start;
        self.write -= start;
        self.read_mark -= start;
        self.write_mark = self.write_mark.saturating_sub(start);
        true
    }

    /// Next readable byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.is_readable() {
            Some(self.data[self.read])
        } else {
            None
        }
    }

    /// Consume and return the next readable byte.
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.read += 1;
        Some(byte)
    }

    /// Advance the read cursor by up to `n` bytes; returns the count skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.readable());
        self.read += n;
        n
    }

    /// Append one byte. Returns false when full.
    pub fn put(&mut self, byte: u8) -> bool {
        if !self.is_writable() {
            return false;
        }
        self.data[self.write] = byte;
        self.write += 1;
        true
    }

    /// Append as much of `bytes` as fits; returns the count written.
    pub fn put_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.writable());
        self.data[self.write..self.write + n].copy_from_slice(&bytes[..n]);
        self.write += n;
        n
    }

    /// Append `bytes` only if all of them fit.
    pub fn put_all(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.writable() {
            return false;
        }
        self.put_slice(bytes);
        true
    }

    /// Unread bytes.
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Free space after the write cursor.
    pub fn writable_slice(&mut self) -> &mut [u8] {
        let end = self.data.len();
        &mut self.data[self.write..end]
    }

    /// Bytes in `[offset, offset + len)` of the underlying storage.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Record `n` bytes written directly into `writable_slice`.
    pub fn advance_write(&mut self, n: usize) {
        self.write = (self.write + n).min(self.data.len());
    }

    /// True when the readable bytes start with `literal`.
    pub fn starts_with(&self, literal: &[u8]) -> bool {
        self.readable_slice().starts_with(literal)
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.data.len())
            .field("read", &self.read)
            .field("write", &self.write)
            .field("read_mark", &self.read_mark)
            .finish()
    }
}
