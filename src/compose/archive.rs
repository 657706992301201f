//! Minimal zip writer for tile bundles.
//!
//! Entries are stored uncompressed: the payloads are already JPEG or PNG
//! bitstreams and recompressing them buys nothing. Output is deterministic
//! (fixed DOS timestamp), so identical inputs produce identical archives.
//!
//! Only the features bundle consumers need are implemented: local file
//! headers, a central directory and the end-of-central-directory record.
//! Zero-length entries are valid and serve as positional placeholders.

use crate::tile::compressor::crc32;

/// DOS date for 1980-01-01, the zip epoch.
const DOS_EPOCH_DATE: u16 = 0x0021;

struct EntryRecord {
    name: String,
    crc: u32,
    size: u32,
    offset: u32,
}

/// Streaming zip builder.
///
/// ```ignore
/// let mut archive = ArchiveWriter::new();
/// archive.add_entry("t0.jpg", &tile_bytes);
/// archive.add_entry("t1.jpg", &[]); // positional placeholder
/// let bytes = archive.finish();
/// ```
pub struct ArchiveWriter {
    buffer: Vec<u8>,
    entries: Vec<EntryRecord>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Append one stored entry.
    pub fn add_entry(&mut self, name: &str, data: &[u8]) {
        let offset = self.buffer.len() as u32;
        let crc = crc32(data);
        let size = data.len() as u32;

        // Local file header
        self.push_u32(0x0403_4B50);
        self.push_u16(20); // version needed: 2.0
        self.push_u16(0); // flags
        self.push_u16(0); // method: stored
        self.push_u16(0); // mod time
        self.push_u16(DOS_EPOCH_DATE);
        self.push_u32(crc);
        self.push_u32(size); // compressed size == size for stored
        self.push_u32(size);
        self.push_u16(name.len() as u16);
        self.push_u16(0); // extra length
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(data);

        self.entries.push(EntryRecord {
            name: name.to_string(),
            crc,
            size,
            offset,
        });
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Write the central directory and return the finished archive.
    pub fn finish(mut self) -> Vec<u8> {
        let directory_offset = self.buffer.len() as u32;

        for i in 0..self.entries.len() {
            let EntryRecord {
                crc, size, offset, ..
            } = self.entries[i];
            let name = std::mem::take(&mut self.entries[i].name);

            // Central directory header
            self.push_u32(0x0201_4B50);
            self.push_u16(20); // version made by
            self.push_u16(20); // version needed
            self.push_u16(0); // flags
            self.push_u16(0); // method: stored
            self.push_u16(0); // mod time
            self.push_u16(DOS_EPOCH_DATE);
            self.push_u32(crc);
            self.push_u32(size);
            self.push_u32(size);
            self.push_u16(name.len() as u16);
            self.push_u16(0); // extra length
            self.push_u16(0); // comment length
            self.push_u16(0); // disk number
            self.push_u16(0); // internal attributes
            self.push_u32(0); // external attributes
            self.push_u32(offset);
            self.buffer.extend_from_slice(name.as_bytes());
        }

        let directory_size = self.buffer.len() as u32 - directory_offset;
        let count = self.entries.len() as u16;

        // End of central directory
        self.push_u32(0x0605_4B50);
        self.push_u16(0); // this disk
        self.push_u16(0); // directory disk
        self.push_u16(count);
        self.push_u16(count);
        self.push_u32(directory_size);
        self.push_u32(directory_offset);
        self.push_u16(0); // comment length

        self.buffer
    }

    fn push_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse the local file headers of an archive.
    fn read_local_entries(archive: &[u8]) -> Vec<(String, Vec<u8>, u32)> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos + 4 <= archive.len() {
            let sig = u32::from_le_bytes(archive[pos..pos + 4].try_into().unwrap());
            if sig != 0x0403_4B50 {
                break;
            }
            let crc = u32::from_le_bytes(archive[pos + 14..pos + 18].try_into().unwrap());
            let size =
                u32::from_le_bytes(archive[pos + 18..pos + 22].try_into().unwrap()) as usize;
            let name_len =
                u16::from_le_bytes(archive[pos + 26..pos + 28].try_into().unwrap()) as usize;
            let name =
                String::from_utf8(archive[pos + 30..pos + 30 + name_len].to_vec()).unwrap();
            let data_start = pos + 30 + name_len;
            let data = archive[data_start..data_start + size].to_vec();
            entries.push((name, data, crc));
            pos = data_start + size;
        }
        entries
    }

    fn eocd_entry_count(archive: &[u8]) -> u16 {
        let pos = archive.len() - 22;
        let sig = u32::from_le_bytes(archive[pos..pos + 4].try_into().unwrap());
        assert_eq!(sig, 0x0605_4B50, "EOCD record expected at archive end");
        u16::from_le_bytes(archive[pos + 10..pos + 12].try_into().unwrap())
    }

    #[test]
    fn test_empty_archive() {
        let archive = ArchiveWriter::new().finish();
        // Just the EOCD record
        assert_eq!(archive.len(), 22);
        assert_eq!(eocd_entry_count(&archive), 0);
    }

    #[test]
    fn test_entries_round_trip() {
        let mut writer = ArchiveWriter::new();
        writer.add_entry("t0.jpg", b"first tile");
        writer.add_entry("t1.jpg", b"");
        writer.add_entry("t2.jpg", b"third tile");
        assert_eq!(writer.entry_count(), 3);

        let archive = writer.finish();
        let entries = read_local_entries(&archive);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "t0.jpg");
        assert_eq!(entries[0].1, b"first tile");
        assert_eq!(entries[1].0, "t1.jpg");
        assert!(entries[1].1.is_empty());
        assert_eq!(entries[2].1, b"third tile");
        assert_eq!(eocd_entry_count(&archive), 3);
    }

    #[test]
    fn test_entry_crc() {
        let mut writer = ArchiveWriter::new();
        writer.add_entry("t0.jpg", b"123456789");
        writer.add_entry("t1.jpg", b"");

        let archive = writer.finish();
        let entries = read_local_entries(&archive);
        assert_eq!(entries[0].2, 0xCBF4_3926);
        assert_eq!(entries[1].2, 0); // empty payload
    }

    #[test]
    fn test_deterministic_output() {
        let build = || {
            let mut writer = ArchiveWriter::new();
            writer.add_entry("t0.jpg", b"payload");
            writer.add_entry("t1.jpg", b"");
            writer.finish()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_central_directory_offsets() {
        let mut writer = ArchiveWriter::new();
        writer.add_entry("t0.jpg", b"abc");
        writer.add_entry("t1.jpg", b"defgh");
        let archive = writer.finish();

        // EOCD points at the central directory; first header there names t0
        let pos = archive.len() - 22;
        let dir_offset =
            u32::from_le_bytes(archive[pos + 16..pos + 20].try_into().unwrap()) as usize;
        let sig = u32::from_le_bytes(archive[dir_offset..dir_offset + 4].try_into().unwrap());
        assert_eq!(sig, 0x0201_4B50);
        let name_len = u16::from_le_bytes(
            archive[dir_offset + 28..dir_offset + 30].try_into().unwrap(),
        ) as usize;
        let name = &archive[dir_offset + 46..dir_offset + 46 + name_len];
        assert_eq!(name, b"t0.jpg");
    }
}
