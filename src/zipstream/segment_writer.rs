//! Out-of-order segment writer
//!
//! Each call records only the segment's size and CRC. The leading segment
//! (index 0, or the first index of an explicit order) returns the payload
//! local file header; every other segment returns nothing, so the archive is
//! `header ‖ seg₀ ‖ seg₁ ‖ … ‖ trailer` with segments in ascending (or
//! explicit) order.

use super::primitives::{
    streaming_local_header_len, write_central_directory, write_data_descriptor,
    write_stored_local_header, write_streaming_local_header, ByteWriter, FileEntry, ZIP64_MAGIC,
};
use super::{ArchiveError, Zip64Mode};
use chrono::{DateTime, Utc};
use opentdf_crypto::crc32;
use opentdf_protocol::{MANIFEST_ENTRY, PAYLOAD_ENTRY};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Writer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    /// No segment written yet
    Created,
    Open,
    Finalized,
    Closed,
}

#[derive(Debug, Clone)]
struct SegmentEntry {
    size: u64,
    crc32: u32,
}

/// Per-index size and CRC; never payload bytes
#[derive(Debug, Default)]
struct SegmentMetadata {
    segments: BTreeMap<u64, SegmentEntry>,
    order: Option<Vec<u64>>,
    total_size: u64,
}

impl SegmentMetadata {
    fn add(&mut self, index: u64, size: u64, crc32: u32) -> Result<(), ArchiveError> {
        if self.segments.contains_key(&index) {
            return Err(ArchiveError::DuplicateSegment { index });
        }
        self.segments.insert(index, SegmentEntry { size, crc32 });
        self.total_size += size;
        Ok(())
    }

    fn leading_index(&self) -> u64 {
        self.order
            .as_ref()
            .and_then(|o| o.first().copied())
            .unwrap_or(0)
    }

    /// Finalize order: explicit, or present indices ascending
    fn resolved_order(&self) -> Result<Vec<u64>, ArchiveError> {
        let order: Vec<u64> = match &self.order {
            Some(order) => order.clone(),
            None => self.segments.keys().copied().collect(),
        };
        let leading = self.leading_index();
        if order.first() != Some(&leading) {
            return Err(ArchiveError::SegmentMissing { index: leading });
        }
        if let Some(missing) = order.iter().find(|i| !self.segments.contains_key(i)) {
            return Err(ArchiveError::SegmentMissing { index: *missing });
        }
        Ok(order)
    }

    fn combined_crc(&self, order: &[u64]) -> u32 {
        let mut combiner = crc32::Crc32Combiner::new();
        for index in order {
            if let Some(seg) = self.segments.get(index) {
                combiner.push(seg.crc32, seg.size);
            }
        }
        combiner.crc()
    }
}

struct State {
    status: WriterStatus,
    metadata: SegmentMetadata,
}

/// Streaming ZIP writer for out-of-order, variable-size segments
///
/// All methods take `&self`; an internal mutex serializes them so the writer
/// can be shared across threads.
pub struct SegmentWriter {
    zip64: Zip64Mode,
    modified: DateTime<Utc>,
    state: Mutex<State>,
}

impl SegmentWriter {
    pub fn new(zip64: Zip64Mode) -> Self {
        SegmentWriter {
            zip64,
            modified: Utc::now(),
            state: Mutex::new(State {
                status: WriterStatus::Created,
                metadata: SegmentMetadata::default(),
            }),
        }
    }

    /// Fix the logical segment order; indices may be sparse
    pub fn with_order(self, order: &[i64]) -> Result<Self, ArchiveError> {
        self.set_order(order)?;
        Ok(self)
    }

    /// Set the logical order before any segment is written
    ///
    /// An empty order reverts to ascending index order.
    pub fn set_order(&self, order: &[i64]) -> Result<(), ArchiveError> {
        let mut state = self.lock();
        match state.status {
            WriterStatus::Created => {}
            WriterStatus::Open => return Err(ArchiveError::OrderLocked),
            WriterStatus::Finalized | WriterStatus::Closed => return Err(ArchiveError::WriterClosed),
        }
        if order.is_empty() {
            state.metadata.order = None;
            return Ok(());
        }
        let mut seen = HashSet::with_capacity(order.len());
        let mut resolved = Vec::with_capacity(order.len());
        for &index in order {
            let index = to_index(index)?;
            if !seen.insert(index) {
                return Err(ArchiveError::DuplicateSegment { index });
            }
            resolved.push(index);
        }
        state.metadata.order = Some(resolved);
        Ok(())
    }

    pub fn zip64_mode(&self) -> Zip64Mode {
        self.zip64
    }

    pub fn status(&self) -> WriterStatus {
        self.lock().status
    }

    pub fn segment_count(&self) -> usize {
        self.lock().metadata.segments.len()
    }

    /// Sum of stored segment sizes written so far
    pub fn total_size(&self) -> u64 {
        self.lock().metadata.total_size
    }

    /// Record a segment of `size` stored bytes with the given CRC
    ///
    /// Returns the archive bytes that precede this segment: the payload
    /// local header for the leading segment, nothing otherwise. On error the
    /// writer is unchanged.
    pub fn write_segment(&self, index: i64, size: u64, crc32: u32) -> Result<Vec<u8>, ArchiveError> {
        let mut state = self.lock();
        if matches!(state.status, WriterStatus::Finalized | WriterStatus::Closed) {
            return Err(ArchiveError::WriterClosed);
        }
        let index = to_index(index)?;
        if let Some(order) = &state.metadata.order {
            if !order.contains(&index) {
                return Err(ArchiveError::InvalidSegment { index: index as i64 });
            }
        }
        state.metadata.add(index, size, crc32)?;
        state.status = WriterStatus::Open;

        let mut out = ByteWriter::new();
        if index == state.metadata.leading_index() {
            write_streaming_local_header(
                &mut out,
                PAYLOAD_ENTRY,
                &self.modified,
                self.zip64 == Zip64Mode::Always,
            );
        }
        Ok(out.into_inner())
    }

    /// Produce the archive trailer around `manifest`
    ///
    /// A failed finalize leaves the writer open; a successful one moves it
    /// to [`WriterStatus::Finalized`].
    pub fn finalize(&self, manifest: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let mut state = self.lock();
        if matches!(state.status, WriterStatus::Finalized | WriterStatus::Closed) {
            return Err(ArchiveError::WriterClosed);
        }

        let metadata = &state.metadata;
        let order = metadata.resolved_order()?;
        let payload_crc = metadata.combined_crc(&order);
        let payload_size = metadata.total_size;

        let max32 = ZIP64_MAGIC as u64;
        let header_len = streaming_local_header_len(PAYLOAD_ENTRY, self.zip64 == Zip64Mode::Always);
        let payload_end = header_len + payload_size;

        let zip64_payload = self.zip64 == Zip64Mode::Always || payload_size >= max32;
        if self.zip64 == Zip64Mode::Never && zip64_payload {
            return Err(ArchiveError::Zip64Required);
        }

        let mut out = ByteWriter::new();
        write_data_descriptor(&mut out, payload_crc, payload_size, payload_size, zip64_payload);

        let manifest_entry = FileEntry {
            name: MANIFEST_ENTRY.to_string(),
            offset: payload_end + out.len() as u64,
            size: manifest.len() as u64,
            compressed_size: manifest.len() as u64,
            crc32: crc32::compute(manifest),
            modified: Utc::now(),
            streaming: false,
        };
        write_stored_local_header(&mut out, &manifest_entry);
        out.bytes(manifest);

        let payload_entry = FileEntry {
            name: PAYLOAD_ENTRY.to_string(),
            offset: 0,
            size: payload_size,
            compressed_size: payload_size,
            crc32: payload_crc,
            modified: self.modified,
            streaming: true,
        };

        let cd_offset = payload_end + out.len() as u64;
        let zip64_cd = zip64_payload || cd_offset >= max32 || manifest_entry.offset >= max32;
        if self.zip64 == Zip64Mode::Never && zip64_cd {
            return Err(ArchiveError::Zip64Required);
        }
        write_central_directory(&mut out, &[payload_entry, manifest_entry], cd_offset, zip64_cd);

        tracing::debug!(
            segments = order.len(),
            payload_size,
            zip64 = zip64_cd,
            "Finalized segmented archive"
        );
        state.status = WriterStatus::Finalized;
        Ok(out.into_inner())
    }

    /// Close without finalizing; idempotent
    pub fn close(&self) {
        let mut state = self.lock();
        if state.status != WriterStatus::Finalized {
            state.status = WriterStatus::Closed;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn to_index(index: i64) -> Result<u64, ArchiveError> {
    u64::try_from(index).map_err(|_| ArchiveError::InvalidSegment { index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zipstream::reader::ArchiveReader;
    use std::io::Cursor;

    fn segment(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    fn assemble(writer: &SegmentWriter, segments: &[(i64, Vec<u8>)], order: &[i64], manifest: &[u8]) -> Vec<u8> {
        let mut parts: BTreeMap<i64, Vec<u8>> = BTreeMap::new();
        for (index, data) in segments {
            let mut bytes = writer
                .write_segment(*index, data.len() as u64, crc32::compute(data))
                .unwrap();
            bytes.extend_from_slice(data);
            parts.insert(*index, bytes);
        }
        let mut archive = Vec::new();
        for index in order {
            archive.extend_from_slice(&parts[index]);
        }
        archive.extend(writer.finalize(manifest).unwrap());
        archive
    }

    #[test]
    fn test_only_leading_segment_gets_header() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        assert_eq!(writer.status(), WriterStatus::Created);
        assert!(writer.write_segment(1, 10, 0).unwrap().is_empty());
        assert_eq!(writer.status(), WriterStatus::Open);
        let header = writer.write_segment(0, 10, 0).unwrap();
        assert_eq!(header.len(), 30 + PAYLOAD_ENTRY.len());
        assert_eq!(&header[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_out_of_order_roundtrip() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        let segs = vec![(2, segment(b'c', 7)), (0, segment(b'a', 5)), (1, segment(b'b', 11))];
        let archive = assemble(&writer, &segs, &[0, 1, 2], b"{}");

        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        let payload = reader.read_entry(PAYLOAD_ENTRY).unwrap();
        let expected: Vec<u8> = [segment(b'a', 5), segment(b'b', 11), segment(b'c', 7)].concat();
        assert_eq!(payload, expected);
        assert_eq!(reader.entry(PAYLOAD_ENTRY).unwrap().crc32, crc32::compute(&expected));
        assert_eq!(reader.read_entry(MANIFEST_ENTRY).unwrap(), b"{}");
    }

    #[test]
    fn test_sparse_indices_sorted() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        let segs = vec![(10, segment(3, 4)), (0, segment(1, 4)), (5, segment(2, 4))];
        let archive = assemble(&writer, &segs, &[0, 5, 10], b"m");
        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        assert_eq!(reader.read_entry(PAYLOAD_ENTRY).unwrap(), [segment(1, 4), segment(2, 4), segment(3, 4)].concat());
    }

    #[test]
    fn test_explicit_order() {
        let writer = SegmentWriter::new(Zip64Mode::Auto).with_order(&[3, 1]).unwrap();
        let header = writer.write_segment(3, 2, crc32::compute(b"xy")).unwrap();
        assert!(!header.is_empty());
        assert!(writer.write_segment(1, 1, crc32::compute(b"z")).unwrap().is_empty());
        assert!(matches!(
            writer.write_segment(2, 1, 0),
            Err(ArchiveError::InvalidSegment { index: 2 })
        ));
        assert!(matches!(writer.set_order(&[1, 3]), Err(ArchiveError::OrderLocked)));

        let mut archive = header;
        archive.extend_from_slice(b"xy");
        archive.extend_from_slice(b"z");
        archive.extend(writer.finalize(b"{}").unwrap());
        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        assert_eq!(reader.read_entry(PAYLOAD_ENTRY).unwrap(), b"xyz");
    }

    #[test]
    fn test_write_errors_leave_state_unchanged() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        assert!(matches!(
            writer.write_segment(-1, 1, 0),
            Err(ArchiveError::InvalidSegment { index: -1 })
        ));
        writer.write_segment(0, 4, 0).unwrap();
        assert!(matches!(
            writer.write_segment(0, 4, 0),
            Err(ArchiveError::DuplicateSegment { index: 0 })
        ));
        assert_eq!(writer.segment_count(), 1);
        assert_eq!(writer.total_size(), 4);
        assert!(matches!(
            SegmentWriter::new(Zip64Mode::Auto).with_order(&[0, 0]),
            Err(ArchiveError::DuplicateSegment { index: 0 })
        ));
    }

    #[test]
    fn test_finalize_requires_segment_zero() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        writer.write_segment(1, 4, 0).unwrap();
        assert!(matches!(
            writer.finalize(b"{}"),
            Err(ArchiveError::SegmentMissing { index: 0 })
        ));
        // failed finalize keeps the writer usable
        writer.write_segment(0, 4, 0).unwrap();
        assert!(writer.finalize(b"{}").is_ok());
    }

    #[test]
    fn test_missing_ordered_segment() {
        let writer = SegmentWriter::new(Zip64Mode::Auto).with_order(&[0, 1, 2]).unwrap();
        writer.write_segment(0, 1, 0).unwrap();
        writer.write_segment(2, 1, 0).unwrap();
        assert!(matches!(
            writer.finalize(b"{}"),
            Err(ArchiveError::SegmentMissing { index: 1 })
        ));
    }

    #[test]
    fn test_closed_writer_rejects_calls() {
        let writer = SegmentWriter::new(Zip64Mode::Auto);
        writer.write_segment(0, 1, 0).unwrap();
        writer.finalize(b"{}").unwrap();
        assert_eq!(writer.status(), WriterStatus::Finalized);
        assert!(matches!(writer.write_segment(1, 1, 0), Err(ArchiveError::WriterClosed)));
        assert!(matches!(writer.finalize(b"{}"), Err(ArchiveError::WriterClosed)));

        let other = SegmentWriter::new(Zip64Mode::Auto);
        other.close();
        other.close();
        assert_eq!(other.status(), WriterStatus::Closed);
        assert!(matches!(other.write_segment(0, 1, 0), Err(ArchiveError::WriterClosed)));
        assert!(matches!(other.set_order(&[0]), Err(ArchiveError::WriterClosed)));
    }

    #[test]
    fn test_zip64_always_layout() {
        let writer = SegmentWriter::new(Zip64Mode::Always);
        let archive = assemble(&writer, &[(0, segment(9, 16))], &[0], b"{\"a\":1}");
        assert_eq!(&archive[18..26], &[0xFF; 8]);

        let trailer_start = archive.len() - 22;
        assert_eq!(&archive[trailer_start..trailer_start + 4], b"PK\x05\x06");
        assert_eq!(&archive[trailer_start + 8..trailer_start + 10], &[0xFF, 0xFF]);

        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        assert!(reader.is_zip64());
        assert_eq!(reader.read_entry(PAYLOAD_ENTRY).unwrap(), segment(9, 16));
        assert_eq!(reader.read_entry(MANIFEST_ENTRY).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_zip64_never_rejects_large_payload() {
        let writer = SegmentWriter::new(Zip64Mode::Never);
        writer.write_segment(0, 0xFFFF_0000, 0).unwrap();
        writer.write_segment(1, 0x0002_0000, 0).unwrap();
        assert!(matches!(writer.finalize(b"{}"), Err(ArchiveError::Zip64Required)));

        let auto = SegmentWriter::new(Zip64Mode::Auto);
        auto.write_segment(0, 0xFFFF_0000, 0).unwrap();
        auto.write_segment(1, 0x0002_0000, 0).unwrap();
        let trailer = auto.finalize(b"{}").unwrap();
        assert_eq!(&trailer[..4], b"PK\x07\x08");
        assert!(trailer.len() > 24);
    }

    #[test]
    fn test_zip64_threshold_is_inclusive() {
        // 0xFFFFFFFF is the ZIP64 sentinel, so it cannot be stored as a 32-bit size
        let never = SegmentWriter::new(Zip64Mode::Never);
        never.write_segment(0, ZIP64_MAGIC as u64, 0).unwrap();
        assert!(matches!(never.finalize(b"{}"), Err(ArchiveError::Zip64Required)));

        let auto = SegmentWriter::new(Zip64Mode::Auto);
        auto.write_segment(0, ZIP64_MAGIC as u64, 0).unwrap();
        let trailer = auto.finalize(b"{}").unwrap();
        assert_eq!(&trailer[..4], b"PK\x07\x08");
        assert_eq!(&trailer[24..28], b"PK\x03\x04");

        let below = SegmentWriter::new(Zip64Mode::Auto);
        below.write_segment(0, ZIP64_MAGIC as u64 - 1, 0).unwrap();
        let trailer = below.finalize(b"{}").unwrap();
        assert_eq!(&trailer[16..20], b"PK\x03\x04");
    }

    #[test]
    fn test_zip64_mode_from_str() {
        assert_eq!("Always".parse::<Zip64Mode>().unwrap(), Zip64Mode::Always);
        assert_eq!("never".parse::<Zip64Mode>().unwrap(), Zip64Mode::Never);
        assert!("sometimes".parse::<Zip64Mode>().is_err());
    }
}
