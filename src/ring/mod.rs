//! Fixed-capacity ring over caller-provided scratch.
//!
//! `begin..end` is the live span inside the scratch slice, `current` the next
//! write/read position. All wraparound arithmetic lives in [`CircularBuffer::advance`];
//! `write`, `fill` and `read` move data and then advance by the same count, so
//! the cursor can never drift away from the data it describes.
pub mod loader;
pub mod planner;

use crate::error::{KernelError, Result};

/// Scratch sizes are rounded up to this many bytes.
pub const SCRATCH_ALIGN: usize = 16;

pub fn align_up(bytes: usize) -> usize { bytes.div_ceil(SCRATCH_ALIGN) * SCRATCH_ALIGN }

#[derive(Debug)]
pub struct CircularBuffer<'s, T> {
    buf: &'s mut [T],
    begin: usize,
    end: usize,
    current: usize,
}

impl<'s, T: Copy> CircularBuffer<'s, T> {
    /// Ring of `len` elements at the start of `buf`.
    pub fn new(buf: &'s mut [T], len: usize) -> Result<Self> {
        if len == 0 { return Err(KernelError::NonPositive { what: "ring capacity" }); }
        if len > buf.len() {
            return Err(KernelError::BufferTooSmall { what: "ring scratch", need: len, got: buf.len() });
        }
        Ok(Self { buf, begin: 0, end: len, current: 0 })
    }

    pub fn capacity(&self) -> usize { self.end - self.begin }

    /// Offset of `current` from `begin`.
    pub fn position(&self) -> usize { self.current - self.begin }

    pub fn reset(&mut self) { self.current = self.begin; }

    pub fn advance(&mut self, delta: usize) {
        let cap = self.capacity();
        let pos = (self.position() + delta % cap) % cap;
        self.current = self.begin + pos;
    }

    /// Copy `src` in at `current`, wrapping at `end`. Writing more than the
    /// capacity leaves the last `capacity` elements resident.
    pub fn write(&mut self, src: &[T]) {
        let mut rest = src;
        while !rest.is_empty() {
            let room = self.end - self.current;
            let n = room.min(rest.len());
            self.buf[self.current..self.current + n].copy_from_slice(&rest[..n]);
            self.advance(n);
            rest = &rest[n..];
        }
    }

    /// Write `count` copies of `value`.
    pub fn fill(&mut self, value: T, count: usize) {
        let mut left = count;
        while left > 0 {
            let room = self.end - self.current;
            let n = room.min(left);
            self.buf[self.current..self.current + n].fill(value);
            self.advance(n);
            left -= n;
        }
    }

    /// Copy out `dst.len()` elements starting at `current`, then advance past them.
    pub fn read(&mut self, dst: &mut [T]) {
        let mut off = 0;
        while off < dst.len() {
            let room = self.end - self.current;
            let n = room.min(dst.len() - off);
            dst[off..off + n].copy_from_slice(&self.buf[self.current..self.current + n]);
            self.advance(n);
            off += n;
        }
    }

    /// Borrow `len` elements starting `offset` past `current` without moving it.
    /// The second slice is non-empty only when the span crosses `end`.
    pub fn segments(&self, offset: usize, len: usize) -> (&[T], &[T]) {
        let cap = self.capacity();
        let len = len.min(cap);
        let start = self.begin + (self.position() + offset % cap) % cap;
        let first = (self.end - start).min(len);
        (&self.buf[start..start + first], &self.buf[self.begin..self.begin + (len - first)])
    }

    /// Resident contents, oldest (at `current`) first.
    pub fn snapshot(&self) -> Vec<T> {
        let (a, b) = self.segments(0, self.capacity());
        let mut out = Vec::with_capacity(self.capacity());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        out
    }
}
