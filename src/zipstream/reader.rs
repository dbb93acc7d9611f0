//! ZIP reader for TDF archives
//!
//! Parses the end-of-central-directory records (following the ZIP64
//! locator when present), the central directory and each entry's local
//! header, then serves entry contents and byte ranges by seeking. Only
//! stored entries are supported.

use super::primitives::{
    ByteReader, CD_FILE_HEADER_SIZE, CENTRAL_DIRECTORY_SIGNATURE, END_OF_CD_SIGNATURE,
    END_OF_CD_SIZE, LOCAL_FILE_HEADER_SIGNATURE, LOCAL_FILE_HEADER_SIZE, ZIP64_END_OF_CD_SIGNATURE,
    ZIP64_END_OF_CD_SIZE, ZIP64_EXTRA_ID, ZIP64_LOCATOR_SIGNATURE, ZIP64_LOCATOR_SIZE, ZIP64_MAGIC,
    ZIP64_MAGIC_COUNT,
};
use super::ArchiveError;
use std::io::{Read, Seek, SeekFrom};

const MAX_COMMENT_LEN: u64 = 0xFFFF;

/// One entry of the central directory, resolved to its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    /// Offset of the local file header
    pub header_offset: u64,
    /// Offset of the first data byte
    pub data_offset: u64,
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub streaming: bool,
}

#[derive(Debug)]
struct EndOfCentralDirectory {
    entries: u64,
    cd_size: u64,
    cd_offset: u64,
    zip64: bool,
}

/// Reader over any `Read + Seek` source
#[derive(Debug)]
pub struct ArchiveReader<R> {
    inner: R,
    entries: Vec<ArchiveEntry>,
    zip64: bool,
}

fn malformed(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::Malformed(msg.into())
}

fn truncated(what: &str) -> ArchiveError {
    malformed(format!("truncated {}", what))
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Parse the archive structure; entry data is read lazily
    pub fn new(mut inner: R) -> Result<Self, ArchiveError> {
        let eocd = read_end_of_central_directory(&mut inner)?;
        let mut entries = read_central_directory(&mut inner, &eocd)?;
        for entry in &mut entries {
            entry.data_offset = resolve_data_offset(&mut inner, entry)?;
        }
        Ok(ArchiveReader {
            inner,
            entries,
            zip64: eocd.zip64,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// True when the archive carries ZIP64 end records
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Read a whole entry
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let size = self
            .entry(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?
            .size;
        self.read_range(name, 0, size)
    }

    /// Read `len` bytes starting `offset` bytes into an entry
    pub fn read_range(&mut self, name: &str, offset: u64, len: u64) -> Result<Vec<u8>, ArchiveError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= entry.size)
            .ok_or_else(|| {
                malformed(format!(
                    "range {}+{} outside entry {} of {} bytes",
                    offset, len, name, entry.size
                ))
            })?;
        let start = entry.data_offset + offset;
        let len = usize::try_from(end - offset).map_err(|_| malformed("range too large"))?;

        self.inner.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn read_end_of_central_directory<R: Read + Seek>(r: &mut R) -> Result<EndOfCentralDirectory, ArchiveError> {
    let file_len = r.seek(SeekFrom::End(0))?;
    if file_len < END_OF_CD_SIZE {
        return Err(malformed("archive shorter than end of central directory record"));
    }
    let tail_len = file_len.min(END_OF_CD_SIZE + MAX_COMMENT_LEN);
    let tail_start = file_len - tail_len;
    r.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    r.read_exact(&mut tail)?;

    // Scan backwards for a signature whose comment length reaches exactly the end
    let sig = END_OF_CD_SIGNATURE.to_le_bytes();
    let eocd_pos = (0..=tail.len() - END_OF_CD_SIZE as usize)
        .rev()
        .find(|&i| {
            tail[i..i + 4] == sig && {
                let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
                i + END_OF_CD_SIZE as usize + comment_len == tail.len()
            }
        })
        .ok_or_else(|| malformed("end of central directory not found"))?;

    let mut rec = ByteReader::new(&tail[eocd_pos + 4..]);
    let _disk = rec.u16();
    let _cd_disk = rec.u16();
    let _disk_entries = rec.u16();
    let entries = rec.u16().ok_or_else(|| truncated("EOCD"))?;
    let cd_size = rec.u32().ok_or_else(|| truncated("EOCD"))?;
    let cd_offset = rec.u32().ok_or_else(|| truncated("EOCD"))?;

    let eocd_abs = tail_start + eocd_pos as u64;
    if eocd_abs >= ZIP64_LOCATOR_SIZE {
        r.seek(SeekFrom::Start(eocd_abs - ZIP64_LOCATOR_SIZE))?;
        let mut locator = [0u8; ZIP64_LOCATOR_SIZE as usize];
        r.read_exact(&mut locator)?;
        let mut loc = ByteReader::new(&locator);
        if loc.u32() == Some(ZIP64_LOCATOR_SIGNATURE) {
            let _disk = loc.u32();
            let zip64_offset = loc.u64().ok_or_else(|| truncated("ZIP64 locator"))?;
            return read_zip64_end_of_central_directory(r, zip64_offset);
        }
    }

    if entries == ZIP64_MAGIC_COUNT || cd_size == ZIP64_MAGIC || cd_offset == ZIP64_MAGIC {
        return Err(malformed("ZIP64 sentinels without ZIP64 locator"));
    }
    Ok(EndOfCentralDirectory {
        entries: entries as u64,
        cd_size: cd_size as u64,
        cd_offset: cd_offset as u64,
        zip64: false,
    })
}

fn read_zip64_end_of_central_directory<R: Read + Seek>(
    r: &mut R,
    offset: u64,
) -> Result<EndOfCentralDirectory, ArchiveError> {
    r.seek(SeekFrom::Start(offset))?;
    let mut record = [0u8; ZIP64_END_OF_CD_SIZE as usize];
    r.read_exact(&mut record)?;
    let mut rec = ByteReader::new(&record);
    if rec.u32() != Some(ZIP64_END_OF_CD_SIGNATURE) {
        return Err(malformed("bad ZIP64 end of central directory signature"));
    }
    let _record_size = rec.u64();
    let _made_by = rec.u16();
    let _needed = rec.u16();
    let _disk = rec.u32();
    let _cd_disk = rec.u32();
    let _disk_entries = rec.u64();
    let entries = rec.u64().ok_or_else(|| truncated("ZIP64 EOCD"))?;
    let cd_size = rec.u64().ok_or_else(|| truncated("ZIP64 EOCD"))?;
    let cd_offset = rec.u64().ok_or_else(|| truncated("ZIP64 EOCD"))?;
    Ok(EndOfCentralDirectory {
        entries,
        cd_size,
        cd_offset,
        zip64: true,
    })
}

fn read_central_directory<R: Read + Seek>(
    r: &mut R,
    eocd: &EndOfCentralDirectory,
) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let cd_len = usize::try_from(eocd.cd_size).map_err(|_| malformed("central directory too large"))?;
    r.seek(SeekFrom::Start(eocd.cd_offset))?;
    let mut cd = vec![0u8; cd_len];
    r.read_exact(&mut cd)?;

    let mut rec = ByteReader::new(&cd);
    let mut entries = Vec::new();
    for _ in 0..eocd.entries {
        if cd.len() - rec.position() < CD_FILE_HEADER_SIZE as usize {
            return Err(truncated("central directory"));
        }
        if rec.u32() != Some(CENTRAL_DIRECTORY_SIGNATURE) {
            return Err(malformed("bad central directory signature"));
        }
        let _made_by = rec.u16();
        let _needed = rec.u16();
        let flags = rec.u16().unwrap_or_default();
        let method = rec.u16().unwrap_or_default();
        let _time = rec.u16();
        let _date = rec.u16();
        let crc32 = rec.u32().unwrap_or_default();
        let compressed32 = rec.u32().unwrap_or_default();
        let size32 = rec.u32().unwrap_or_default();
        let name_len = rec.u16().unwrap_or_default() as usize;
        let extra_len = rec.u16().unwrap_or_default() as usize;
        let comment_len = rec.u16().unwrap_or_default() as usize;
        let _disk = rec.u16();
        let _internal = rec.u16();
        let _external = rec.u32();
        let offset32 = rec.u32().unwrap_or_default();

        let name = rec.take(name_len).ok_or_else(|| truncated("entry name"))?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| malformed("entry name is not UTF-8"))?;
        let extra = rec.take(extra_len).ok_or_else(|| truncated("extra field"))?;
        rec.take(comment_len).ok_or_else(|| truncated("entry comment"))?;

        if method != 0 {
            return Err(malformed(format!("entry {} uses unsupported compression method {}", name, method)));
        }

        let mut size = size32 as u64;
        let mut compressed_size = compressed32 as u64;
        let mut header_offset = offset32 as u64;
        if size32 == ZIP64_MAGIC || compressed32 == ZIP64_MAGIC || offset32 == ZIP64_MAGIC {
            let mut zip64 = find_zip64_extra(extra)
                .ok_or_else(|| malformed(format!("entry {} lacks ZIP64 extra field", name)))?;
            if size32 == ZIP64_MAGIC {
                size = zip64.u64().ok_or_else(|| truncated("ZIP64 extra"))?;
            }
            if compressed32 == ZIP64_MAGIC {
                compressed_size = zip64.u64().ok_or_else(|| truncated("ZIP64 extra"))?;
            }
            if offset32 == ZIP64_MAGIC {
                header_offset = zip64.u64().ok_or_else(|| truncated("ZIP64 extra"))?;
            }
        }

        entries.push(ArchiveEntry {
            name,
            header_offset,
            data_offset: 0,
            size,
            compressed_size,
            crc32,
            streaming: flags & 0x08 != 0,
        });
    }
    Ok(entries)
}

fn find_zip64_extra(extra: &[u8]) -> Option<ByteReader<'_>> {
    let mut fields = ByteReader::new(extra);
    loop {
        let id = fields.u16()?;
        let len = fields.u16()? as usize;
        let body = fields.take(len)?;
        if id == ZIP64_EXTRA_ID {
            return Some(ByteReader::new(body));
        }
    }
}

fn resolve_data_offset<R: Read + Seek>(r: &mut R, entry: &ArchiveEntry) -> Result<u64, ArchiveError> {
    r.seek(SeekFrom::Start(entry.header_offset))?;
    let mut header = [0u8; LOCAL_FILE_HEADER_SIZE as usize];
    r.read_exact(&mut header)?;
    let mut rec = ByteReader::new(&header);
    if rec.u32() != Some(LOCAL_FILE_HEADER_SIGNATURE) {
        return Err(malformed(format!("bad local header signature for {}", entry.name)));
    }
    let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
    let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
    Ok(entry.header_offset + LOCAL_FILE_HEADER_SIZE + name_len + extra_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zipstream::{SegmentWriter, Zip64Mode};
    use opentdf_crypto::crc32;
    use std::io::Cursor;

    fn build(mode: Zip64Mode, payload: &[u8], manifest: &[u8]) -> Vec<u8> {
        let writer = SegmentWriter::new(mode);
        let mut out = writer
            .write_segment(0, payload.len() as u64, crc32::compute(payload))
            .unwrap();
        out.extend_from_slice(payload);
        out.extend(writer.finalize(manifest).unwrap());
        out
    }

    #[test]
    fn test_entries_and_ranges() {
        let archive = build(Zip64Mode::Auto, b"0123456789", b"{\"m\":1}");
        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        assert!(!reader.is_zip64());
        let names: Vec<&str> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["0.payload", "0.manifest.json"]);
        assert!(reader.entry("0.payload").unwrap().streaming);
        assert_eq!(reader.read_range("0.payload", 3, 4).unwrap(), b"3456");
        assert!(reader.read_range("0.payload", 8, 4).is_err());
        assert!(matches!(
            reader.read_entry("missing"),
            Err(ArchiveError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_trailing_comment_honored() {
        let mut archive = build(Zip64Mode::Auto, b"abc", b"{}");
        let len = archive.len();
        archive[len - 2..].copy_from_slice(&5u16.to_le_bytes());
        archive.extend_from_slice(b"hello");
        let mut reader = ArchiveReader::new(Cursor::new(archive)).unwrap();
        assert_eq!(reader.read_entry("0.payload").unwrap(), b"abc");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ArchiveReader::new(Cursor::new(vec![0u8; 10])).is_err());
        assert!(ArchiveReader::new(Cursor::new(vec![0u8; 100])).is_err());
    }

    #[test]
    fn test_reads_zip_crate_output() {
        use std::io::Write;
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("0.payload", options).unwrap();
            zip.write_all(b"payload bytes").unwrap();
            zip.start_file("0.manifest.json", options).unwrap();
            zip.write_all(b"{}").unwrap();
            zip.finish().unwrap();
        }
        let mut reader = ArchiveReader::new(Cursor::new(buf.into_inner())).unwrap();
        assert_eq!(reader.read_entry("0.payload").unwrap(), b"payload bytes");
        assert_eq!(reader.read_entry("0.manifest.json").unwrap(), b"{}");
    }
}
