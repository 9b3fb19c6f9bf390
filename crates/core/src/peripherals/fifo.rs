//! Fixed-capacity circular queue used for the SPI transmit/receive FIFOs.
//!
//! `head` points at the next free slot; the oldest entry sits at
//! `(head - len) mod 8`. Pushing advances `head` by one, popping only
//! shrinks `len`.

use serde::{Deserialize, Serialize};

pub const FIFO_DEPTH: usize = 8;
const MASK: usize = FIFO_DEPTH - 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fifo {
    buf: [u16; FIFO_DEPTH],
    head: usize,
    len: usize,
}

impl Fifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a value. Returns false (and drops it) when full.
    pub fn push(&mut self, value: u16) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = value;
        self.head = (self.head + 1) & MASK;
        self.len += 1;
        true
    }

    /// Take the oldest value.
    pub fn pop(&mut self) -> Option<u16> {
        if self.len == 0 {
            return None;
        }
        let val = self.buf[self.head.wrapping_sub(self.len) & MASK];
        self.len -= 1;
        Some(val)
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == FIFO_DEPTH
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// Raw slot contents, oldest-first ordering not applied.
    pub fn slots(&self) -> &[u16; FIFO_DEPTH] {
        &self.buf
    }

    /// Rebuild from snapshot fields, clamping out-of-range indices.
    pub fn from_parts(buf: [u16; FIFO_DEPTH], head: usize, len: usize) -> Self {
        Fifo { buf, head: head & MASK, len: len.min(FIFO_DEPTH) }
    }
}
