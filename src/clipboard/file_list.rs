//! File Reference Encodings
//!
//! Two encodings carry file references across the bridge:
//!
//! - **DROPFILES** (`CF_HDROP`) - what the native clipboard holds when a file
//!   manager copies files: a 20-byte header followed by a double-null
//!   terminated block of UTF-16 paths.
//! - **FILEDESCRIPTORW array** (`FileGroupDescriptorW`) - what goes on the wire
//!   instead of the raw drop list: a count followed by fixed 592-byte records
//!   with name, attributes, last-write time and size.

use crate::clipboard::error::{ClipboardError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the DROPFILES header
pub const DROPFILES_HEADER_LEN: usize = 20;

/// Size of one FILEDESCRIPTORW record
pub const FILE_DESCRIPTOR_LEN: usize = 592;

/// Name field capacity of a FILEDESCRIPTORW record, in UTF-16 units
const MAX_PATH: usize = 260;

/// Win32 file attribute flags
pub mod attributes {
    /// Read-only file
    pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
    /// Hidden file
    pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
    /// Directory
    pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
    /// Archive bit
    pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
    /// No other attributes
    pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
}

mod fd_flags {
    pub(super) const FD_ATTRIBUTES: u32 = 0x0000_0004;
    pub(super) const FD_WRITESTIME: u32 = 0x0000_0020;
    pub(super) const FD_FILESIZE: u32 = 0x0000_0040;
    pub(super) const FD_SHOWPROGRESSUI: u32 = 0x0000_4000;
}

use attributes::*;
use fd_flags::*;

/// Ordered list of file names from a DROPFILES block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDropList {
    names: Vec<String>,
}

impl FileDropList {
    /// Build a drop list, rejecting names the encoding cannot represent
    pub fn new(names: Vec<String>) -> Result<Self> {
        if let Some(bad) = names.iter().find(|n| n.is_empty() || n.contains('\0')) {
            return Err(ClipboardError::InvalidData(format!(
                "file name {:?} cannot be carried in a drop list",
                bad
            )));
        }
        Ok(Self { names })
    }

    /// File names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when the list holds no names
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Encode as a wide-character DROPFILES block
    pub fn encode(&self) -> Bytes {
        let mut hdrop = BytesMut::new();

        hdrop.put_u32_le(DROPFILES_HEADER_LEN as u32); // pFiles
        hdrop.put_i32_le(0); // pt.x
        hdrop.put_i32_le(0); // pt.y
        hdrop.put_u32_le(0); // fNC
        hdrop.put_u32_le(1); // fWide

        for name in &self.names {
            for unit in name.encode_utf16() {
                hdrop.put_u16_le(unit);
            }
            hdrop.put_u16_le(0);
        }
        hdrop.put_u16_le(0);

        hdrop.freeze()
    }

    /// Decode a DROPFILES block (wide or narrow)
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < DROPFILES_HEADER_LEN {
            return Err(ClipboardError::InvalidData(format!(
                "DROPFILES needs {} bytes, got {}",
                DROPFILES_HEADER_LEN,
                data.len()
            )));
        }

        let mut header = &data[..DROPFILES_HEADER_LEN];
        let offset = header.get_u32_le() as usize;
        header.advance(12); // pt.x, pt.y, fNC
        let wide = header.get_u32_le() != 0;

        if offset < DROPFILES_HEADER_LEN || offset > data.len() {
            return Err(ClipboardError::InvalidData(format!(
                "DROPFILES offset {} outside block of {} bytes",
                offset,
                data.len()
            )));
        }

        let block = &data[offset..];
        let names = if wide {
            split_wide(block)?
        } else {
            split_narrow(block)
        };

        Ok(Self { names })
    }
}

fn split_wide(block: &[u8]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut current = Vec::new();

    for chunk in block.chunks_exact(2) {
        match u16::from_le_bytes([chunk[0], chunk[1]]) {
            0 if current.is_empty() => return Ok(names),
            0 => {
                names.push(String::from_utf16(&current).map_err(|_| ClipboardError::InvalidUtf16)?);
                current.clear();
            }
            unit => current.push(unit),
        }
    }

    // Tolerate a block that ends without the final terminator
    if !current.is_empty() {
        names.push(String::from_utf16(&current).map_err(|_| ClipboardError::InvalidUtf16)?);
    }
    Ok(names)
}

fn split_narrow(block: &[u8]) -> Vec<String> {
    block
        .split(|&b| b == 0)
        .take_while(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

/// Windows FILETIME: 100ns intervals since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileTime(pub u64);

/// FILETIME value of the Unix epoch
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

impl FileTime {
    /// Convert from a system timestamp (pre-1970 times clamp to the epoch)
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ticks = since_epoch.as_nanos() / 100;
        Self(FILETIME_UNIX_EPOCH.saturating_add(ticks.min(u64::MAX as u128) as u64))
    }

    /// Low 32 bits
    pub fn low(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits
    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn from_parts(low: u32, high: u32) -> Self {
        Self(((high as u64) << 32) | low as u64)
    }
}

/// What a file reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file with its size in bytes
    File {
        /// Size in bytes
        size: u64,
    },
    /// Directory
    Directory,
}

/// File metadata decoded once at the OS boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// File or directory
    pub kind: FileKind,
    /// Win32 attribute flags
    pub attributes: u32,
    /// Last modification time
    pub last_write: FileTime,
}

impl FileMetadata {
    /// Regular file
    pub fn file(size: u64, last_write: FileTime) -> Self {
        Self {
            kind: FileKind::File { size },
            attributes: FILE_ATTRIBUTE_ARCHIVE,
            last_write,
        }
    }

    /// Directory
    pub fn directory(last_write: FileTime) -> Self {
        Self {
            kind: FileKind::Directory,
            attributes: FILE_ATTRIBUTE_DIRECTORY,
            last_write,
        }
    }

    /// Translate host filesystem metadata
    pub fn from_std(meta: &std::fs::Metadata) -> Self {
        let last_write = meta
            .modified()
            .map(FileTime::from_system_time)
            .unwrap_or_default();

        let mut result = if meta.is_dir() {
            Self::directory(last_write)
        } else {
            Self::file(meta.len(), last_write)
        };
        if meta.permissions().readonly() {
            result.attributes |= FILE_ATTRIBUTE_READONLY;
        }
        result
    }

    /// Size in bytes (zero for directories)
    pub fn size(&self) -> u64 {
        match self.kind {
            FileKind::File { size } => size,
            FileKind::Directory => 0,
        }
    }
}

/// One entry of a FileGroupDescriptorW payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Base file name
    pub name: String,
    /// Metadata when the source could stat the file
    pub metadata: Option<FileMetadata>,
}

impl FileDescriptor {
    /// Descriptor for a full path, keeping only its last component
    pub fn for_path(path: &str, metadata: Option<FileMetadata>) -> Self {
        let name = path
            .trim_end_matches(['\\', '/'])
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(path)
            .to_string();
        Self { name, metadata }
    }
}

/// Encode a FILEDESCRIPTORW array
pub fn encode_file_descriptors(descriptors: &[FileDescriptor]) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + descriptors.len() * FILE_DESCRIPTOR_LEN);
    out.put_u32_le(descriptors.len() as u32);

    for descriptor in descriptors {
        let (flags, attrs, last_write, size) = match descriptor.metadata {
            Some(meta) => (
                FD_SHOWPROGRESSUI | FD_ATTRIBUTES | FD_WRITESTIME | FD_FILESIZE,
                meta.attributes,
                meta.last_write,
                meta.size(),
            ),
            None => (FD_SHOWPROGRESSUI, 0, FileTime::default(), 0),
        };

        out.put_u32_le(flags);
        out.put_bytes(0, 16 + 8 + 8); // clsid, sizel, pointl
        out.put_u32_le(attrs);
        out.put_bytes(0, 16); // ftCreationTime, ftLastAccessTime
        out.put_u32_le(last_write.low());
        out.put_u32_le(last_write.high());
        out.put_u32_le((size >> 32) as u32);
        out.put_u32_le(size as u32);

        let units = truncated_name(&descriptor.name);
        for unit in &units {
            out.put_u16_le(*unit);
        }
        out.put_bytes(0, (MAX_PATH - units.len()) * 2);
    }

    out.freeze()
}

/// Name as UTF-16, cut on a character boundary to leave room for the terminator
fn truncated_name(name: &str) -> Vec<u16> {
    let mut units = Vec::with_capacity(name.len());
    let mut buf = [0u16; 2];
    for ch in name.chars() {
        let encoded = ch.encode_utf16(&mut buf);
        if units.len() + encoded.len() > MAX_PATH - 1 {
            break;
        }
        units.extend_from_slice(encoded);
    }
    units
}

/// Decode a FILEDESCRIPTORW array
pub fn decode_file_descriptors(data: &[u8]) -> Result<Vec<FileDescriptor>> {
    let mut input = data;
    if input.remaining() < 4 {
        return Err(ClipboardError::InvalidData(
            "file group descriptor missing item count".to_string(),
        ));
    }

    let count = input.get_u32_le() as usize;
    let needed = count.saturating_mul(FILE_DESCRIPTOR_LEN);
    if input.remaining() < needed {
        return Err(ClipboardError::InvalidData(format!(
            "file group descriptor declares {} items but holds {} bytes",
            count,
            input.remaining()
        )));
    }

    let mut descriptors = Vec::with_capacity(count);
    for _ in 0..count {
        let flags = input.get_u32_le();
        input.advance(32);
        let attrs = input.get_u32_le();
        input.advance(16);
        let last_write = FileTime::from_parts(input.get_u32_le(), input.get_u32_le());
        let size = ((input.get_u32_le() as u64) << 32) | input.get_u32_le() as u64;

        let mut units = Vec::new();
        for i in 0..MAX_PATH {
            let unit = input.get_u16_le();
            if unit == 0 {
                input.advance((MAX_PATH - i - 1) * 2);
                break;
            }
            units.push(unit);
        }

        let metadata = (flags & FD_ATTRIBUTES != 0).then(|| FileMetadata {
            kind: if attrs & FILE_ATTRIBUTE_DIRECTORY != 0 {
                FileKind::Directory
            } else {
                FileKind::File { size }
            },
            attributes: attrs,
            last_write,
        });

        descriptors.push(FileDescriptor {
            name: String::from_utf16_lossy(&units),
            metadata,
        });
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_metadata_from_host_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&path, permissions).unwrap();

        let file = FileMetadata::from_std(&std::fs::metadata(&path).unwrap());
        assert_eq!(file.kind, FileKind::File { size: 5 });
        assert_eq!(file.size(), 5);
        assert_ne!(file.attributes & FILE_ATTRIBUTE_READONLY, 0);
        assert_ne!(file.attributes & FILE_ATTRIBUTE_ARCHIVE, 0);
        assert!(file.last_write.0 > FILETIME_UNIX_EPOCH);

        let directory = FileMetadata::from_std(&std::fs::metadata(dir.path()).unwrap());
        assert_eq!(directory.kind, FileKind::Directory);
        assert_eq!(directory.size(), 0);
        assert_ne!(directory.attributes & FILE_ATTRIBUTE_DIRECTORY, 0);
        assert_eq!(directory.attributes & FILE_ATTRIBUTE_READONLY, 0);
    }

    #[test]
    fn test_drop_list_layout() {
        let list = FileDropList::new(vec!["C:\\a.txt".to_string()]).unwrap();
        let hdrop = list.encode();

        assert_eq!(u32::from_le_bytes([hdrop[0], hdrop[1], hdrop[2], hdrop[3]]), 20);
        assert_eq!(u32::from_le_bytes([hdrop[16], hdrop[17], hdrop[18], hdrop[19]]), 1);
        // 8 chars + terminator + list terminator
        assert_eq!(hdrop.len(), 20 + (8 + 1 + 1) * 2);
        assert_eq!(&hdrop[hdrop.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_drop_list() {
        let hdrop = FileDropList::default().encode();
        assert_eq!(hdrop.len(), 22);
        assert!(FileDropList::decode(&hdrop).unwrap().is_empty());
    }

    #[test]
    fn test_drop_list_rejects_unrepresentable_names() {
        assert!(FileDropList::new(vec![String::new()]).is_err());
        assert!(FileDropList::new(vec!["a\0b".to_string()]).is_err());
    }

    #[test]
    fn test_narrow_drop_list() {
        let mut data = vec![20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(b"C:\\one\0C:\\two\0\0");

        let list = FileDropList::decode(&data).unwrap();
        assert_eq!(list.names(), &["C:\\one".to_string(), "C:\\two".to_string()]);
    }

    #[test]
    fn test_drop_list_bad_offset() {
        let mut data = FileDropList::default().encode().to_vec();
        data[0] = 200;
        assert!(matches!(
            FileDropList::decode(&data),
            Err(ClipboardError::InvalidData(_))
        ));
        assert!(FileDropList::decode(&data[..10]).is_err());
    }

    #[test]
    fn test_file_time_epoch() {
        assert_eq!(FileTime::from_system_time(UNIX_EPOCH).0, FILETIME_UNIX_EPOCH);
        let t = FileTime(0x0123_4567_89AB_CDEF);
        assert_eq!(FileTime::from_parts(t.low(), t.high()), t);
    }

    #[test]
    fn test_descriptor_for_path_keeps_base_name() {
        assert_eq!(FileDescriptor::for_path("C:\\docs\\report.pdf", None).name, "report.pdf");
        assert_eq!(FileDescriptor::for_path("/home/u/photos/", None).name, "photos");
        assert_eq!(FileDescriptor::for_path("plain", None).name, "plain");
    }

    #[test]
    fn test_file_descriptors_encode_decode() {
        let written = FileTime(132_000_000_000_000_000);
        let descriptors = vec![
            FileDescriptor {
                name: "report.pdf".to_string(),
                metadata: Some(FileMetadata::file(5_000_000_000, written)),
            },
            FileDescriptor {
                name: "photos".to_string(),
                metadata: Some(FileMetadata::directory(written)),
            },
            FileDescriptor {
                name: "unknown.bin".to_string(),
                metadata: None,
            },
        ];

        let encoded = encode_file_descriptors(&descriptors);
        assert_eq!(encoded.len(), 4 + 3 * FILE_DESCRIPTOR_LEN);
        assert_eq!(decode_file_descriptors(&encoded).unwrap(), descriptors);
    }

    #[test]
    fn test_file_descriptor_name_truncated() {
        let long = "x".repeat(400);
        let encoded = encode_file_descriptors(&[FileDescriptor {
            name: long,
            metadata: None,
        }]);
        let decoded = decode_file_descriptors(&encoded).unwrap();
        assert_eq!(decoded[0].name.len(), MAX_PATH - 1);
    }

    #[test]
    fn test_file_descriptors_short_buffer() {
        let mut encoded = encode_file_descriptors(&[FileDescriptor {
            name: "a".to_string(),
            metadata: None,
        }])
        .to_vec();
        encoded.truncate(100);
        assert!(decode_file_descriptors(&encoded).is_err());
    }

    proptest! {
        #[test]
        fn prop_drop_list_round_trip(names in prop::collection::vec("[^\\x00]{1,24}", 0..64)) {
            let list = FileDropList::new(names).unwrap();
            let decoded = FileDropList::decode(&list.encode()).unwrap();
            prop_assert_eq!(decoded, list);
        }
    }

    #[test]
    fn test_drop_list_round_trip_thousand_names() {
        let names: Vec<String> = (0..1000).map(|i| format!("C:\\data\\file-{i}.dat")).collect();
        let list = FileDropList::new(names).unwrap();
        assert_eq!(FileDropList::decode(&list.encode()).unwrap(), list);
    }
}
