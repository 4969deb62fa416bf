//! Clipboard Format Catalog
//!
//! Builds the ordered format list the local clipboard currently advertises and
//! parses the list a remote peer sends. File references are never advertised
//! as raw `CF_HDROP`; they are replaced by the FileGroupDescriptorW /
//! FileContents pair, and a remote list carrying that pair means "file list
//! available".

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::native::{ClipboardLock, ListenerId, NativeClipboard};
use crate::clipboard::pdu::{get_utf16z, malformed, put_utf16z};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Predefined clipboard format IDs
pub mod format_id {
    /// Text format (ANSI)
    pub const CF_TEXT: u32 = 1;
    /// Bitmap format
    pub const CF_BITMAP: u32 = 2;
    /// Device-independent bitmap
    pub const CF_DIB: u32 = 8;
    /// Unicode text format
    pub const CF_UNICODETEXT: u32 = 13;
    /// File drop format
    pub const CF_HDROP: u32 = 15;
    /// Locale identifier
    pub const CF_LOCALE: u32 = 16;
    /// Version 5 device-independent bitmap
    pub const CF_DIBV5: u32 = 17;
    /// First id handed out for registered formats
    pub const CF_REGISTERED_START: u32 = 0xC000;
}

/// Well-known registered format names
pub mod format_name {
    /// File group descriptor (wide names)
    pub const FILE_GROUP_DESCRIPTOR_W: &str = "FileGroupDescriptorW";
    /// File contents stream
    pub const FILE_CONTENTS: &str = "FileContents";
}

use format_id::*;
use format_name::*;

/// One advertised format
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    id: u32,
    name: String,
}

impl FormatDescriptor {
    /// Named (registered) format
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    /// Predefined format, advertised without a name
    pub fn predefined(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
        }
    }

    /// Format id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Format name; empty for predefined formats
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the format travels by number rather than by name
    pub fn is_predefined(&self) -> bool {
        self.name.is_empty()
    }
}

/// Ordered, duplicate-free list of advertised formats
///
/// Never mutated once advertised; every clipboard change builds a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatList {
    formats: Vec<FormatDescriptor>,
}

impl FromIterator<FormatDescriptor> for FormatList {
    /// Collect formats in order; a repeated id keeps its first entry
    fn from_iter<I: IntoIterator<Item = FormatDescriptor>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let formats = iter.into_iter().filter(|f| seen.insert(f.id)).collect();
        Self { formats }
    }
}

impl<'a> IntoIterator for &'a FormatList {
    type Item = &'a FormatDescriptor;
    type IntoIter = std::slice::Iter<'a, FormatDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.formats.iter()
    }
}

impl FormatList {
    /// Iterate in advertisement order
    pub fn iter(&self) -> std::slice::Iter<'_, FormatDescriptor> {
        self.formats.iter()
    }

    /// Number of formats
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Whether nothing is advertised
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Descriptor for an id
    pub fn get(&self, id: u32) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.id == id)
    }

    /// Whether an id is advertised
    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Descriptor for a registered name
    pub fn find_by_name(&self, name: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| !f.name.is_empty() && f.name == name)
    }

    /// Whether the list carries the file descriptor / file contents pair
    pub fn is_file_list(&self) -> bool {
        self.find_by_name(FILE_GROUP_DESCRIPTOR_W).is_some() && self.find_by_name(FILE_CONTENTS).is_some()
    }

    pub(crate) fn encode_body(&self, buf: &mut BytesMut) {
        for format in &self.formats {
            buf.put_u32_le(format.id);
            put_utf16z(buf, &format.name);
        }
    }

    pub(crate) fn decode_body(mut body: &[u8]) -> Result<Self> {
        if body.len() % 2 != 0 {
            return Err(malformed(format!("odd format list length {}", body.len())));
        }

        let mut formats = Vec::new();
        let mut seen = HashSet::new();
        while body.has_remaining() {
            if body.remaining() < 4 {
                return Err(malformed("truncated format id"));
            }
            let id = body.get_u32_le();
            let name = get_utf16z(&mut body).map_err(|e| match e {
                ClipboardError::InvalidUtf16 => malformed(format!("name of format {} is not valid UTF-16", id)),
                other => other,
            })?;
            if !seen.insert(id) {
                debug!(format_id = id, "Dropping duplicate format in remote list");
                continue;
            }
            formats.push(FormatDescriptor { id, name });
        }

        Ok(Self { formats })
    }
}

/// Enumerate the local clipboard into a format list
///
/// When `CF_HDROP` is present and `substitute_files` is set, the native format
/// is replaced by the two synthetic file entries. A clipboard that cannot be
/// opened yields an empty list.
pub fn build_local_format_list(
    native: &dyn NativeClipboard,
    lock: &ClipboardLock,
    owner: ListenerId,
    substitute_files: bool,
) -> FormatList {
    let clipboard = match lock.open(native, owner) {
        Ok(clipboard) => clipboard,
        Err(e) => {
            warn!("Cannot open clipboard to enumerate formats: {}", e);
            return FormatList::default();
        }
    };

    if substitute_files && clipboard.is_format_available(CF_HDROP) {
        return match file_pair(&*clipboard) {
            Ok(list) => list,
            Err(e) => {
                warn!("Failed to register file transfer formats: {}", e);
                FormatList::default()
            }
        };
    }

    let mut formats = Vec::new();
    let mut id = clipboard.next_format(0);
    while id != 0 {
        if id != CF_HDROP || !substitute_files {
            let name = if id >= CF_REGISTERED_START {
                clipboard.format_name(id).unwrap_or_default()
            } else {
                String::new()
            };
            formats.push(FormatDescriptor { id, name });
        }
        id = clipboard.next_format(id);
    }

    debug!(count = formats.len(), "Enumerated local clipboard formats");
    formats.into_iter().collect()
}

fn file_pair(native: &dyn NativeClipboard) -> Result<FormatList> {
    let descriptor = native.register_format(FILE_GROUP_DESCRIPTOR_W)?;
    let contents = native.register_format(FILE_CONTENTS)?;
    Ok(vec![
        FormatDescriptor::new(descriptor, FILE_GROUP_DESCRIPTOR_W),
        FormatDescriptor::new(contents, FILE_CONTENTS),
    ]
    .into_iter()
    .collect())
}

/// Parse the body of a remote Format List PDU
pub fn parse_remote_format_list(body: &[u8]) -> Result<FormatList> {
    FormatList::decode_body(body)
}

/// Serialize a format list into a Format List PDU body
pub fn serialize_format_list(list: &FormatList) -> Bytes {
    let mut buf = BytesMut::new();
    list.encode_body(&mut buf);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::error::RetryConfig;
    use crate::clipboard::memory::MemoryClipboard;
    use proptest::prelude::*;

    fn lock() -> ClipboardLock {
        ClipboardLock::new(RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 1,
            max_delay_ms: 1,
        })
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let list: FormatList = vec![
            FormatDescriptor::predefined(CF_UNICODETEXT),
            FormatDescriptor::new(CF_UNICODETEXT, "shadow"),
            FormatDescriptor::predefined(CF_TEXT),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 2);
        assert!(list.get(CF_UNICODETEXT).unwrap().is_predefined());
    }

    #[test]
    fn test_local_text_list() {
        let native = MemoryClipboard::new();
        let app = ListenerId::next();
        native
            .copy(app, vec![(CF_UNICODETEXT, Bytes::from_static(b"h\0i\0\0\0"))])
            .unwrap();

        let list = build_local_format_list(&native, &lock(), ListenerId::next(), true);
        let ids: Vec<u32> = list.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![CF_UNICODETEXT]);
    }

    #[test]
    fn test_local_registered_format_carries_name() {
        let native = MemoryClipboard::new();
        let html = native.register_format("HTML Format").unwrap();
        native
            .copy(
                ListenerId::next(),
                vec![
                    (html, Bytes::from_static(b"<b>x</b>")),
                    (CF_UNICODETEXT, Bytes::from_static(b"x\0\0\0")),
                ],
            )
            .unwrap();

        let list = build_local_format_list(&native, &lock(), ListenerId::next(), true);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(html).unwrap().name(), "HTML Format");
        assert!(list.get(CF_UNICODETEXT).unwrap().is_predefined());
    }

    #[test]
    fn test_hdrop_substituted_by_file_pair() {
        let native = MemoryClipboard::new();
        native
            .copy_files(ListenerId::next(), vec!["C:\\tmp\\a.txt".to_string()])
            .unwrap();

        let list = build_local_format_list(&native, &lock(), ListenerId::next(), true);
        assert_eq!(list.len(), 2);
        assert!(list.is_file_list());
        assert!(!list.contains(CF_HDROP));
        assert_eq!(list.iter().next().unwrap().name(), FILE_GROUP_DESCRIPTOR_W);
    }

    #[test]
    fn test_hdrop_passes_through_when_file_lists_disabled() {
        let native = MemoryClipboard::new();
        native
            .copy_files(ListenerId::next(), vec!["C:\\tmp\\a.txt".to_string()])
            .unwrap();

        let list = build_local_format_list(&native, &lock(), ListenerId::next(), false);
        assert!(list.contains(CF_HDROP));
        assert!(!list.is_file_list());
    }

    #[test]
    fn test_busy_clipboard_yields_empty_list() {
        let native = MemoryClipboard::new();
        let app = ListenerId::next();
        native
            .copy(app, vec![(CF_UNICODETEXT, Bytes::from_static(b"x\0\0\0"))])
            .unwrap();
        native.hold_open(app).unwrap();

        let list = build_local_format_list(&native, &lock(), ListenerId::next(), true);
        assert!(list.is_empty());

        native.release(app).unwrap();
    }

    #[test]
    fn test_remote_list_with_duplicates_is_deduped() {
        let mut body = BytesMut::new();
        body.put_u32_le(CF_UNICODETEXT);
        body.put_u16_le(0);
        body.put_u32_le(CF_UNICODETEXT);
        body.put_u16_le(0);

        let list = parse_remote_format_list(&body).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remote_list_unterminated_name_is_malformed() {
        let mut body = BytesMut::new();
        body.put_u32_le(0xC001);
        body.put_u16_le(u16::from(b'A'));

        assert!(matches!(
            parse_remote_format_list(&body),
            Err(ClipboardError::ProtocolMalformed(_))
        ));
    }

    #[test]
    fn test_remote_list_odd_length_is_malformed() {
        let body = [0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            parse_remote_format_list(&body),
            Err(ClipboardError::ProtocolMalformed(_))
        ));
    }

    fn descriptor_strategy() -> impl Strategy<Value = FormatDescriptor> {
        prop_oneof![
            (1u32..0xC000).prop_map(FormatDescriptor::predefined),
            (0xC000u32..0xFFFF, "[a-zA-Z][a-zA-Z0-9 ]{0,31}").prop_map(|(id, name)| FormatDescriptor::new(id, name)),
        ]
    }

    proptest! {
        #[test]
        fn prop_format_list_round_trip(formats in prop::collection::vec(descriptor_strategy(), 0..32)) {
            let list: FormatList = formats.into_iter().collect();
            let parsed = parse_remote_format_list(&serialize_format_list(&list)).unwrap();
            prop_assert_eq!(parsed, list);
        }
    }
}
