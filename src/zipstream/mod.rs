//! Streaming segmented ZIP container
//!
//! The writer emits a TDF archive (`0.payload` + `0.manifest.json`) without
//! ever holding payload bytes: callers pass each encrypted segment's size and
//! CRC, receive the bytes that precede it, and store both wherever they
//! like. At finalize the payload CRC is assembled with CRC32-combine and the
//! trailer (data descriptor, manifest entry, central directory) is returned.
//!
//! The reader parses the same subset of ZIP over any `Read + Seek`.
//!
//! # Example
//!
//! ```
//! use opentdf_core::zipstream::{SegmentWriter, Zip64Mode};
//! use opentdf_crypto::crc32;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = SegmentWriter::new(Zip64Mode::Auto);
//! let segment = b"encrypted segment bytes";
//!
//! let mut archive = writer.write_segment(0, segment.len() as u64, crc32::compute(segment))?;
//! archive.extend_from_slice(segment);
//! archive.extend(writer.finalize(br#"{"manifest":true}"#)?);
//! assert_eq!(&archive[..4], b"PK\x03\x04");
//! # Ok(())
//! # }
//! ```

pub mod primitives;
pub mod reader;
pub mod segment_writer;

use std::str::FromStr;
use thiserror::Error;

pub use reader::{ArchiveEntry, ArchiveReader};
pub use segment_writer::{SegmentWriter, WriterStatus};

/// When to emit ZIP64 structures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Mode {
    /// Only when sizes or offsets overflow 32 bits
    #[default]
    Auto,
    /// Always, including the payload local header
    Always,
    /// Never; finalize fails with [`ArchiveError::Zip64Required`] on overflow
    Never,
}

impl FromStr for Zip64Mode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Zip64Mode::Auto),
            "always" => Ok(Zip64Mode::Always),
            "never" => Ok(Zip64Mode::Never),
            other => Err(ArchiveError::Malformed(format!("unknown ZIP64 mode: {}", other))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid segment index {index}")]
    InvalidSegment { index: i64 },

    #[error("Segment {index} already written")]
    DuplicateSegment { index: u64 },

    #[error("Segment {index} missing at finalize")]
    SegmentMissing { index: u64 },

    #[error("Segment order must be set before the first segment is written")]
    OrderLocked,

    #[error("Writer is closed or finalized")]
    WriterClosed,

    #[error("Archive needs ZIP64 but ZIP64 is disabled")]
    Zip64Required,

    #[error("Malformed archive: {0}")]
    Malformed(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::Io(_))
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ArchiveError::SegmentMissing { .. } => {
                Some("Write every segment (including index 0) before finalizing")
            }
            ArchiveError::Zip64Required => Some("Use Zip64Mode::Auto or Zip64Mode::Always"),
            ArchiveError::WriterClosed => Some("Create a new writer for each archive"),
            _ => None,
        }
    }
}
