//! Byte-oriented scanner with a single refillable ring buffer.
//!
//! Both preprocessors read C source one byte at a time, need to backtrack
//! across a handful of tentative lookaheads (e.g. "is this `struct NAME {`
//! or just `struct NAME;`?"), and must keep reporting 1-indexed line and
//! column numbers across the whole file. [`ByteScanner`] is the one
//! implementation both drive.
//!
//! The subtle part is `refill`: when the tail of the buffer runs dry we
//! shift the unconsumed bytes to the head and top up from the reader. Any
//! [`Mark`] taken before the shift still has to resolve to the same byte
//! afterwards, so every live mark's buffer-relative position is rebased by
//! the shift amount. Forgetting this is the classic re2c-style refill bug:
//! a mark silently starts pointing at the wrong byte once the buffer has
//! scrolled underneath it.

use std::io::Read;

const CAPACITY: usize = 64 * 1024;

struct MarkSlot {
    pos: usize,
    line: u32,
    column: u32,
}

/// A backtrack point returned by [`ByteScanner::mark`]. Opaque handle into
/// the scanner's own slot table; only valid for the scanner that produced
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// Refillable ring-buffer scanner over a byte stream.
///
/// `advance` consumes one byte and updates line/column (treating `\n` as
/// the line break). `mark`/`restore` let a caller try a tentative parse and
/// rewind to exactly where it started, including line/column. End of input
/// is sticky: once the source reports EOF, every subsequent `peek`/`advance`
/// reports EOF too, even if `refill` is called again.
pub struct ByteScanner<R> {
    source: R,
    buf: Vec<u8>,
    cursor: usize,
    limit: usize,
    line: u32,
    column: u32,
    eof: bool,
    marks: Vec<Option<MarkSlot>>,
}

impl<R: Read> ByteScanner<R> {
    pub fn new(source: R) -> Self {
        ByteScanner {
            source,
            buf: vec![0u8; CAPACITY],
            cursor: 0,
            limit: 0,
            line: 1,
            column: 1,
            eof: false,
            marks: Vec::new(),
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&mut self) -> Option<u8> {
        if self.cursor >= self.limit {
            self.refill();
            if self.cursor >= self.limit {
                return None;
            }
        }
        Some(self.buf[self.cursor])
    }

    /// Look `offset` bytes ahead (0 == same as `peek`) without consuming.
    /// Used by the pragma scanner to distinguish `kan_export` from
    /// `kan_exportx` without committing to a token boundary.
    pub fn peek_at(&mut self, offset: usize) -> Option<u8> {
        while self.cursor + offset >= self.limit && !self.eof {
            self.refill();
        }
        self.buf.get(self.cursor + offset).copied()
    }

    /// Consume and return the next byte, updating line/column.
    pub fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.cursor += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    /// Take a backtrack point at the current position.
    pub fn mark(&mut self) -> Mark {
        let slot = MarkSlot {
            pos: self.cursor,
            line: self.line,
            column: self.column,
        };
        if let Some(idx) = self.marks.iter().position(|m| m.is_none()) {
            self.marks[idx] = Some(slot);
            Mark(idx)
        } else {
            self.marks.push(Some(slot));
            Mark(self.marks.len() - 1)
        }
    }

    /// Rewind to a previously taken mark and release it.
    pub fn restore(&mut self, mark: Mark) {
        let slot = self.marks[mark.0]
            .take()
            .expect("restore() called on an already-restored mark");
        self.cursor = slot.pos;
        self.line = slot.line;
        self.column = slot.column;
    }

    /// Drop a mark without rewinding to it (the tentative parse succeeded).
    pub fn release(&mut self, mark: Mark) {
        self.marks[mark.0] = None;
    }

    fn refill(&mut self) {
        if self.eof {
            return;
        }
        let shift = self
            .marks
            .iter()
            .flatten()
            .map(|m| m.pos)
            .min()
            .unwrap_or(self.cursor)
            .min(self.cursor);
        if shift > 0 {
            self.buf.copy_within(shift..self.limit, 0);
            self.limit -= shift;
            self.cursor -= shift;
            for slot in self.marks.iter_mut().flatten() {
                slot.pos -= shift;
            }
        }
        if self.limit == self.buf.len() {
            // Every live mark pins a byte all the way to the tail; there is
            // nowhere to shift bytes into. Grow instead of stalling.
            self.buf.resize(self.buf.len() * 2, 0);
        }
        match self.source.read(&mut self.buf[self.limit..]) {
            Ok(0) => self.eof = true,
            Ok(n) => self.limit += n,
            Err(_) => self.eof = true,
        }
    }
}
