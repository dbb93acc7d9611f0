//! Maps plaintext offsets to payload segments
//!
//! TDFs written with one segment size (the usual case) use [`SegmentLocator::Uniform`]
//! and resolve offsets by division. Streamed TDFs with arbitrary segment
//! sizes use [`SegmentLocator::Variable`], a binary search over cumulative
//! offsets.

use opentdf_crypto::symmetric::OVERHEAD;
use opentdf_protocol::IntegrityInformation;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Offset {offset} is beyond the payload ({total} bytes)")]
    OffsetOutOfRange { offset: u64, total: u64 },

    #[error("Invalid range {start}..{end} for a payload of {total} bytes")]
    InvalidRange { start: u64, end: u64, total: u64 },

    #[error("Segment {index} does not exist ({count} segments)")]
    SegmentOutOfRange { index: usize, count: usize },

    #[error("Invalid segment sizes: {0}")]
    InvalidSizes(String),
}

/// Where one segment sits in the plaintext and in the payload entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub index: usize,
    pub plaintext_offset: u64,
    pub plaintext_size: u64,
    pub encrypted_offset: u64,
    pub encrypted_size: u64,
}

impl SegmentSpan {
    pub fn plaintext_end(&self) -> u64 {
        self.plaintext_offset + self.plaintext_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentLocator {
    /// Every segment but the last has `segment_size` plaintext bytes
    Uniform {
        segment_size: u64,
        count: usize,
        total_size: u64,
    },
    /// Cumulative offsets; both vectors have `count + 1` entries
    Variable {
        plaintext_offsets: Vec<u64>,
        encrypted_offsets: Vec<u64>,
    },
}

impl SegmentLocator {
    /// Fixed-size segments covering `total_size` bytes
    pub fn uniform(segment_size: u64, total_size: u64) -> Result<Self, LocatorError> {
        if segment_size == 0 {
            return Err(LocatorError::InvalidSizes("segment size must be positive".to_string()));
        }
        let count = total_size.div_ceil(segment_size);
        count
            .checked_mul(OVERHEAD as u64)
            .and_then(|overhead| overhead.checked_add(total_size))
            .ok_or_else(|| overflow("encrypted payload size"))?;
        let count = usize::try_from(count).map_err(|_| overflow("segment count"))?;
        Ok(SegmentLocator::Uniform {
            segment_size,
            count,
            total_size,
        })
    }

    /// Segments with the given `(plaintext, encrypted)` sizes, in order
    pub fn variable(sizes: &[(u64, u64)]) -> Result<Self, LocatorError> {
        let mut plaintext_offsets = Vec::with_capacity(sizes.len() + 1);
        let mut encrypted_offsets = Vec::with_capacity(sizes.len() + 1);
        let (mut plain, mut enc) = (0u64, 0u64);
        plaintext_offsets.push(plain);
        encrypted_offsets.push(enc);
        for (p, e) in sizes {
            plain = plain.checked_add(*p).ok_or_else(|| overflow("plaintext size"))?;
            enc = enc.checked_add(*e).ok_or_else(|| overflow("encrypted size"))?;
            plaintext_offsets.push(plain);
            encrypted_offsets.push(enc);
        }
        Ok(SegmentLocator::Variable {
            plaintext_offsets,
            encrypted_offsets,
        })
    }

    /// Build from manifest integrity information
    ///
    /// Uniform when every segment matches the defaults except a shorter
    /// final one; variable otherwise.
    pub fn from_integrity(info: &IntegrityInformation) -> Result<Self, LocatorError> {
        let mut sizes = Vec::with_capacity(info.segments.len());
        for index in 0..info.segments.len() {
            let plain = info.plaintext_size_of(index).unwrap_or_default();
            let enc = info.encrypted_size_of(index).unwrap_or_default();
            if plain < 0 || enc < 0 {
                return Err(LocatorError::InvalidSizes(format!(
                    "segment {} has a negative size",
                    index
                )));
            }
            if enc as u64 != plain as u64 + OVERHEAD as u64 {
                return Err(LocatorError::InvalidSizes(format!(
                    "segment {}: encrypted size {} does not match plaintext size {}",
                    index, enc, plain
                )));
            }
            sizes.push((plain as u64, enc as u64));
        }

        let default = info.segment_size_default;
        let regular = default > 0
            && sizes.split_last().is_some_and(|((last, _), rest)| {
                *last > 0
                    && *last <= default as u64
                    && rest.iter().all(|(p, _)| *p == default as u64)
            });

        if regular {
            let total = sizes
                .iter()
                .try_fold(0u64, |total, (p, _)| total.checked_add(*p))
                .ok_or_else(|| overflow("plaintext size"))?;
            SegmentLocator::uniform(default as u64, total)
        } else {
            SegmentLocator::variable(&sizes)
        }
    }

    pub fn segment_count(&self) -> usize {
        match self {
            SegmentLocator::Uniform { count, .. } => *count,
            SegmentLocator::Variable {
                plaintext_offsets, ..
            } => plaintext_offsets.len() - 1,
        }
    }

    /// Plaintext bytes covered by all segments
    pub fn total_size(&self) -> u64 {
        match self {
            SegmentLocator::Uniform { total_size, .. } => *total_size,
            SegmentLocator::Variable {
                plaintext_offsets, ..
            } => plaintext_offsets.last().copied().unwrap_or_default(),
        }
    }

    /// Bytes of the payload entry
    pub fn encrypted_total_size(&self) -> u64 {
        match self {
            SegmentLocator::Uniform {
                total_size, count, ..
            } => total_size + (*count as u64) * OVERHEAD as u64,
            SegmentLocator::Variable {
                encrypted_offsets, ..
            } => encrypted_offsets.last().copied().unwrap_or_default(),
        }
    }

    pub fn span(&self, index: usize) -> Result<SegmentSpan, LocatorError> {
        let count = self.segment_count();
        if index >= count {
            return Err(LocatorError::SegmentOutOfRange { index, count });
        }
        Ok(match self {
            SegmentLocator::Uniform {
                segment_size,
                total_size,
                ..
            } => {
                let plaintext_offset = index as u64 * segment_size;
                let plaintext_size = (*segment_size).min(total_size - plaintext_offset);
                SegmentSpan {
                    index,
                    plaintext_offset,
                    plaintext_size,
                    encrypted_offset: index as u64 * (segment_size + OVERHEAD as u64),
                    encrypted_size: plaintext_size + OVERHEAD as u64,
                }
            }
            SegmentLocator::Variable {
                plaintext_offsets,
                encrypted_offsets,
            } => SegmentSpan {
                index,
                plaintext_offset: plaintext_offsets[index],
                plaintext_size: plaintext_offsets[index + 1] - plaintext_offsets[index],
                encrypted_offset: encrypted_offsets[index],
                encrypted_size: encrypted_offsets[index + 1] - encrypted_offsets[index],
            },
        })
    }

    /// The segment holding plaintext byte `offset`
    pub fn find_by_offset(&self, offset: u64) -> Result<SegmentSpan, LocatorError> {
        let total = self.total_size();
        if offset >= total {
            return Err(LocatorError::OffsetOutOfRange { offset, total });
        }
        let index = match self {
            SegmentLocator::Uniform { segment_size, .. } => (offset / segment_size) as usize,
            SegmentLocator::Variable {
                plaintext_offsets, ..
            } => {
                let starts = &plaintext_offsets[..plaintext_offsets.len() - 1];
                starts.partition_point(|&start| start <= offset) - 1
            }
        };
        self.span(index)
    }

    /// Segments overlapping the plaintext range `start..end`
    pub fn range(&self, start: u64, end: u64) -> Result<Vec<SegmentSpan>, LocatorError> {
        let total = self.total_size();
        if start > end || end > total {
            return Err(LocatorError::InvalidRange { start, end, total });
        }
        if start == end {
            return Ok(Vec::new());
        }
        let first = self.find_by_offset(start)?.index;
        let last = self.find_by_offset(end - 1)?.index;
        (first..=last).map(|index| self.span(index)).collect()
    }
}

fn overflow(what: &str) -> LocatorError {
    LocatorError::InvalidSizes(format!("{} overflows", what))
}
