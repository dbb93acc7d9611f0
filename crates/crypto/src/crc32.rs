//! CRC-32 (IEEE) with combine
//!
//! The segmented archive writer never holds the payload, so the payload CRC
//! is assembled from per-segment CRCs with [`combine`].

use crc32fast::Hasher;

/// CRC-32 of `data`
pub fn compute(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC-32 of `A || B` given `crc(A)`, `crc(B)` and `len(B)`
pub fn combine(crc1: u32, crc2: u32, len2: u64) -> u32 {
    let mut hasher = Hasher::new_with_initial_len(crc1, 0);
    hasher.combine(&Hasher::new_with_initial_len(crc2, len2));
    hasher.finalize()
}

/// Running CRC over a sequence of parts known only by `(crc, len)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32Combiner {
    crc: u32,
    len: u64,
}

impl Crc32Combiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a part with checksum `crc` and length `len`
    pub fn push(&mut self, crc: u32, len: u64) {
        self.crc = combine(self.crc, crc, len);
        self.len += len;
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Total bytes covered so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
