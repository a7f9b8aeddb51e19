//! 7-bit chunk packing shared by routes and string-like segments.
//!
//! BMF keeps bit 7 of every non-final byte set, so arbitrary bit strings are
//! carried 7 bits per byte, MSB-first.

pub(crate) const CHUNK_BITS: u32 = 7;
pub(crate) const CHUNK_MASK: u8 = 0x7f;
pub(crate) const MORE: u8 = 0x80;

/// Accumulates bit fields and emits them as 7-bit chunks.
///
/// # Invariants
/// - `bits` is always < 7 between calls
pub(crate) struct ChunkWriter {
    out: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl ChunkWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            acc: 0,
            bits: 0,
        }
    }

    /// Append the low `width` bits of `value` (width <= 8).
    pub(crate) fn push(&mut self, value: u8, width: u32) {
        debug_assert!(width <= 8);
        self.acc = (self.acc << width) | (u32::from(value) & ((1 << width) - 1));
        self.bits += width;
        while self.bits >= CHUNK_BITS {
            self.bits -= CHUNK_BITS;
            self.out
                .push(MORE | ((self.acc >> self.bits) as u8 & CHUNK_MASK));
            self.acc &= (1 << self.bits) - 1;
        }
    }

    /// Close with a single `1` marker bit and zero fill; the final chunk has
    /// bit 7 clear and is never zero.
    pub(crate) fn finish_marked(mut self) -> Vec<u8> {
        self.acc = (self.acc << 1) | 1;
        self.bits += 1;
        self.out
            .push((self.acc << (CHUNK_BITS - self.bits)) as u8 & CHUNK_MASK);
        self.out
    }

    /// Zero-fill the last partial chunk; every emitted byte keeps bit 7 set.
    pub(crate) fn finish_padded(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.out
                .push(MORE | ((self.acc << (CHUNK_BITS - self.bits)) as u8 & CHUNK_MASK));
        }
        self.out
    }
}

/// Reads bit fields back out of 7-bit chunks.
pub(crate) struct ChunkReader<'a> {
    chunks: &'a [u8],
    next: usize,
    acc: u32,
    bits: u32,
}

impl<'a> ChunkReader<'a> {
    pub(crate) fn new(chunks: &'a [u8]) -> Self {
        Self {
            chunks,
            next: 0,
            acc: 0,
            bits: 0,
        }
    }

    pub(crate) fn remaining_bits(&self) -> usize {
        (self.chunks.len() - self.next) * CHUNK_BITS as usize + self.bits as usize
    }

    /// Read `width` bits (width <= 8). Caller checks `remaining_bits` first.
    pub(crate) fn read(&mut self, width: u32) -> u8 {
        debug_assert!(width <= 8);
        while self.bits < width {
            let chunk = self.chunks.get(self.next).copied().unwrap_or(0);
            self.acc = (self.acc << CHUNK_BITS) | u32::from(chunk & CHUNK_MASK);
            self.next += 1;
            self.bits += CHUNK_BITS;
        }
        self.bits -= width;
        let value = (self.acc >> self.bits) & ((1 << width) - 1);
        self.acc &= (1 << self.bits) - 1;
        value as u8
    }

    /// True when every bit not yet read is zero.
    pub(crate) fn rest_is_zero(&self) -> bool {
        self.acc == 0
            && self.chunks[self.next.min(self.chunks.len())..]
                .iter()
                .all(|c| c & CHUNK_MASK == 0)
    }
}
