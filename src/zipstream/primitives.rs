//! ZIP record layouts used by TDF archives
//!
//! Only stored (uncompressed) entries are produced. All multi-byte fields are
//! little-endian.

use chrono::{DateTime, Datelike, Timelike, Utc};

pub const ZIP_VERSION: u16 = 45;
pub const DATA_DESCRIPTOR_FLAG: u16 = 0x08;
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const ZIP64_MAGIC: u32 = 0xFFFF_FFFF;
pub const ZIP64_MAGIC_COUNT: u16 = 0xFFFF;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub const END_OF_CD_SIGNATURE: u32 = 0x0605_4b50;
pub const ZIP64_END_OF_CD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;

pub const LOCAL_FILE_HEADER_SIZE: u64 = 30;
pub const CD_FILE_HEADER_SIZE: u64 = 46;
pub const END_OF_CD_SIZE: u64 = 22;
pub const ZIP64_END_OF_CD_SIZE: u64 = 56;
pub const ZIP64_LOCATOR_SIZE: u64 = 20;
pub const EXTRA_FIELD_HEADER_SIZE: u16 = 4;
/// Local header ZIP64 extra: original + compressed size
pub const ZIP64_LOCAL_EXTRA_SIZE: u16 = 20;
/// Central directory ZIP64 extra: original + compressed size + offset
pub const ZIP64_CD_EXTRA_SIZE: u16 = 28;
pub const DATA_DESCRIPTOR_SIZE_32: u64 = 16;
pub const DATA_DESCRIPTOR_SIZE_64: u64 = 24;

const DOS_BASE_YEAR: i32 = 1980;

/// MS-DOS `(time, date)` pair
pub fn dos_date_time(t: &DateTime<Utc>) -> (u16, u16) {
    let time = (t.hour() << 11) | (t.minute() << 5) | (t.second() >> 1);
    let year = (t.year() - DOS_BASE_YEAR).clamp(0, 127) as u32;
    let date = (year << 9) | (t.month() << 5) | t.day();
    (time as u16, date as u16)
}

/// One file in the central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub modified: DateTime<Utc>,
    pub streaming: bool,
}

impl FileEntry {
    fn needs_zip64(&self) -> bool {
        self.size >= ZIP64_MAGIC as u64
            || self.compressed_size >= ZIP64_MAGIC as u64
            || self.offset >= ZIP64_MAGIC as u64
    }
}

#[derive(Debug, Default)]
pub struct ByteWriter(Vec<u8>);

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter(Vec::new())
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Local file header for a streamed entry (sizes in the data descriptor)
pub fn write_streaming_local_header(out: &mut ByteWriter, name: &str, modified: &DateTime<Utc>, zip64: bool) {
    let (time, date) = dos_date_time(modified);
    let (size_field, extra_len) = if zip64 {
        (ZIP64_MAGIC, ZIP64_LOCAL_EXTRA_SIZE)
    } else {
        (0, 0)
    };
    out.u32(LOCAL_FILE_HEADER_SIGNATURE)
        .u16(ZIP_VERSION)
        .u16(DATA_DESCRIPTOR_FLAG)
        .u16(0)
        .u16(time)
        .u16(date)
        .u32(0)
        .u32(size_field)
        .u32(size_field)
        .u16(name.len() as u16)
        .u16(extra_len)
        .bytes(name.as_bytes());
    if zip64 {
        out.u16(ZIP64_EXTRA_ID)
            .u16(ZIP64_LOCAL_EXTRA_SIZE - EXTRA_FIELD_HEADER_SIZE)
            .u64(0)
            .u64(0);
    }
}

/// Size of the streaming local header as written by [`write_streaming_local_header`]
pub fn streaming_local_header_len(name: &str, zip64: bool) -> u64 {
    let extra = if zip64 { ZIP64_LOCAL_EXTRA_SIZE as u64 } else { 0 };
    LOCAL_FILE_HEADER_SIZE + name.len() as u64 + extra
}

/// Local file header for an entry whose size and CRC are known up front
pub fn write_stored_local_header(out: &mut ByteWriter, entry: &FileEntry) {
    let (time, date) = dos_date_time(&entry.modified);
    out.u32(LOCAL_FILE_HEADER_SIGNATURE)
        .u16(ZIP_VERSION)
        .u16(0)
        .u16(0)
        .u16(time)
        .u16(date)
        .u32(entry.crc32)
        .u32(entry.compressed_size as u32)
        .u32(entry.size as u32)
        .u16(entry.name.len() as u16)
        .u16(0)
        .bytes(entry.name.as_bytes());
}

pub fn write_data_descriptor(out: &mut ByteWriter, crc32: u32, compressed: u64, size: u64, zip64: bool) {
    out.u32(DATA_DESCRIPTOR_SIGNATURE).u32(crc32);
    if zip64 {
        out.u64(compressed).u64(size);
    } else {
        out.u32(compressed as u32).u32(size as u32);
    }
}

/// Central directory, ZIP64 end records when `zip64`, and the EOCD
pub fn write_central_directory(out: &mut ByteWriter, entries: &[FileEntry], cd_offset: u64, zip64: bool) {
    let start = out.len();
    for entry in entries {
        let (time, date) = dos_date_time(&entry.modified);
        let entry_zip64 = zip64 || entry.needs_zip64();
        let (compressed, size, offset, extra_len) = if entry_zip64 {
            (ZIP64_MAGIC, ZIP64_MAGIC, ZIP64_MAGIC, ZIP64_CD_EXTRA_SIZE)
        } else {
            (
                entry.compressed_size as u32,
                entry.size as u32,
                entry.offset as u32,
                0,
            )
        };
        let flags = if entry.streaming { DATA_DESCRIPTOR_FLAG } else { 0 };
        out.u32(CENTRAL_DIRECTORY_SIGNATURE)
            .u16(ZIP_VERSION)
            .u16(ZIP_VERSION)
            .u16(flags)
            .u16(0)
            .u16(time)
            .u16(date)
            .u32(entry.crc32)
            .u32(compressed)
            .u32(size)
            .u16(entry.name.len() as u16)
            .u16(extra_len)
            .u16(0)
            .u16(0)
            .u16(0)
            .u32(0)
            .u32(offset)
            .bytes(entry.name.as_bytes());
        if entry_zip64 {
            out.u16(ZIP64_EXTRA_ID)
                .u16(ZIP64_CD_EXTRA_SIZE - EXTRA_FIELD_HEADER_SIZE)
                .u64(entry.size)
                .u64(entry.compressed_size)
                .u64(entry.offset);
        }
    }
    let cd_size = (out.len() - start) as u64;
    let count = entries.len() as u64;

    if zip64 {
        let zip64_eocd_offset = cd_offset + cd_size;
        out.u32(ZIP64_END_OF_CD_SIGNATURE)
            .u64(ZIP64_END_OF_CD_SIZE - 12)
            .u16(ZIP_VERSION)
            .u16(ZIP_VERSION)
            .u32(0)
            .u32(0)
            .u64(count)
            .u64(count)
            .u64(cd_size)
            .u64(cd_offset);
        out.u32(ZIP64_LOCATOR_SIGNATURE)
            .u32(0)
            .u64(zip64_eocd_offset)
            .u32(1);
    }

    let (count16, size32, offset32) = if zip64 {
        (ZIP64_MAGIC_COUNT, ZIP64_MAGIC, ZIP64_MAGIC)
    } else {
        (count as u16, cd_size as u32, cd_offset as u32)
    };
    out.u32(END_OF_CD_SIGNATURE)
        .u16(0)
        .u16(0)
        .u16(count16)
        .u16(count16)
        .u32(size32)
        .u32(offset32)
        .u16(0);
}

/// Little-endian field reader over a byte slice
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Some(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dos_date_time() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 58).unwrap();
        let (time, date) = dos_date_time(&t);
        assert_eq!(time, (13 << 11) | (45 << 5) | 29);
        assert_eq!(date, (44 << 9) | (3 << 5) | 15);
    }

    #[test]
    fn test_streaming_header_layout() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut out = ByteWriter::new();
        write_streaming_local_header(&mut out, "0.payload", &t, false);
        let bytes = out.into_inner();
        assert_eq!(bytes.len() as u64, streaming_local_header_len("0.payload", false));

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.u32(), Some(LOCAL_FILE_HEADER_SIGNATURE));
        assert_eq!(r.u16(), Some(45));
        assert_eq!(r.u16(), Some(0x08));

        let mut out = ByteWriter::new();
        write_streaming_local_header(&mut out, "0.payload", &t, true);
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 30 + 9 + 20);
        assert_eq!(&bytes[18..26], &[0xFF; 8]);
        assert_eq!(&bytes[39..41], &ZIP64_EXTRA_ID.to_le_bytes());
    }

    #[test]
    fn test_data_descriptor_sizes() {
        let mut out = ByteWriter::new();
        write_data_descriptor(&mut out, 1, 2, 2, false);
        assert_eq!(out.len() as u64, DATA_DESCRIPTOR_SIZE_32);
        let mut out = ByteWriter::new();
        write_data_descriptor(&mut out, 1, 2, 2, true);
        assert_eq!(out.len() as u64, DATA_DESCRIPTOR_SIZE_64);
    }

    #[test]
    fn test_byte_reader_bounds() {
        let mut r = ByteReader::new(&[1, 0, 0]);
        assert_eq!(r.u16(), Some(1));
        assert_eq!(r.u16(), None);
        assert_eq!(r.position(), 2);
    }
}
