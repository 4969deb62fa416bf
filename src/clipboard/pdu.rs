//! Clipboard Virtual Channel PDUs
//!
//! Encoding and decoding of the CLIPRDR messages exchanged on the clipboard
//! virtual channel. Every message carries an 8-byte header followed by a
//! message-specific body; all integers are little-endian.
//!
//! ```text
//! 0        2        4                8
//! ┌────────┬────────┬────────────────┬──────────────────┐
//! │msgType │msgFlags│    dataLen     │  body (dataLen)  │
//! └────────┴────────┴────────────────┴──────────────────┘
//! ```

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::formats::FormatList;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// CLIPRDR message types
pub mod msg_type {
    /// Format List PDU
    pub const CB_FORMAT_LIST: u16 = 0x0002;
    /// Format List Response PDU
    pub const CB_FORMAT_LIST_RESPONSE: u16 = 0x0003;
    /// Format Data Request PDU
    pub const CB_FORMAT_DATA_REQUEST: u16 = 0x0004;
    /// Format Data Response PDU
    pub const CB_FORMAT_DATA_RESPONSE: u16 = 0x0005;
}

/// CLIPRDR message flags
pub mod msg_flags {
    /// Request succeeded
    pub const CB_RESPONSE_OK: u16 = 0x0001;
    /// Request failed
    pub const CB_RESPONSE_FAIL: u16 = 0x0002;
}

/// Size of the common PDU header
pub const HEADER_LEN: usize = 8;

use msg_flags::*;
use msg_type::*;

/// Payload of a Format Data Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDataResponse {
    /// Whether the sender managed to render the format
    pub ok: bool,
    /// Rendered bytes (empty on failure)
    pub data: Bytes,
}

impl FormatDataResponse {
    /// Successful response carrying `data`
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self {
            ok: true,
            data: data.into(),
        }
    }

    /// Failure response with a zero-length payload
    pub fn fail() -> Self {
        Self {
            ok: false,
            data: Bytes::new(),
        }
    }
}

/// A decoded clipboard channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPdu {
    /// Sender's clipboard now offers these formats
    FormatList(FormatList),
    /// Acknowledgement of a Format List
    FormatListResponse {
        /// Whether the list was accepted
        ok: bool,
    },
    /// Request for the bytes of one format
    FormatDataRequest {
        /// Requested format
        format_id: u32,
    },
    /// Reply to the last Format Data Request
    FormatDataResponse(FormatDataResponse),
    /// A message type this core does not handle (capabilities, file contents, locks)
    Unsupported {
        /// Raw message type
        msg_type: u16,
    },
}

impl ClipboardPdu {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::FormatList(_) => "FormatList",
            Self::FormatListResponse { .. } => "FormatListResponse",
            Self::FormatDataRequest { .. } => "FormatDataRequest",
            Self::FormatDataResponse(_) => "FormatDataResponse",
            Self::Unsupported { .. } => "Unsupported",
        }
    }

    /// Encode the PDU including its header
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        let (msg_type, flags) = match self {
            Self::FormatList(list) => {
                list.encode_body(&mut body);
                (CB_FORMAT_LIST, 0)
            }
            Self::FormatListResponse { ok } => (CB_FORMAT_LIST_RESPONSE, response_flags(*ok)),
            Self::FormatDataRequest { format_id } => {
                body.put_u32_le(*format_id);
                (CB_FORMAT_DATA_REQUEST, 0)
            }
            Self::FormatDataResponse(response) => {
                if response.ok {
                    body.put_slice(&response.data);
                }
                (CB_FORMAT_DATA_RESPONSE, response_flags(response.ok))
            }
            Self::Unsupported { msg_type } => (*msg_type, 0),
        };

        let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
        out.put_u16_le(msg_type);
        out.put_u16_le(flags);
        out.put_u32_le(body.len() as u32);
        out.put_slice(&body);
        out.freeze()
    }

    /// Decode one complete PDU
    pub fn decode(mut input: &[u8]) -> Result<Self> {
        if input.len() < HEADER_LEN {
            return Err(malformed(format!(
                "header needs {} bytes, got {}",
                HEADER_LEN,
                input.len()
            )));
        }

        let msg_type = input.get_u16_le();
        let flags = input.get_u16_le();
        let data_len = input.get_u32_le() as usize;

        if input.remaining() != data_len {
            return Err(malformed(format!(
                "dataLen {} but {} body bytes present",
                data_len,
                input.remaining()
            )));
        }

        match msg_type {
            CB_FORMAT_LIST => Ok(Self::FormatList(FormatList::decode_body(input)?)),
            CB_FORMAT_LIST_RESPONSE => Ok(Self::FormatListResponse {
                ok: flags & CB_RESPONSE_OK != 0,
            }),
            CB_FORMAT_DATA_REQUEST => {
                if input.len() != 4 {
                    return Err(malformed(format!(
                        "format data request body must be 4 bytes, got {}",
                        input.len()
                    )));
                }
                Ok(Self::FormatDataRequest {
                    format_id: input.get_u32_le(),
                })
            }
            CB_FORMAT_DATA_RESPONSE => {
                if flags & CB_RESPONSE_FAIL != 0 || flags & CB_RESPONSE_OK == 0 {
                    Ok(Self::FormatDataResponse(FormatDataResponse::fail()))
                } else {
                    Ok(Self::FormatDataResponse(FormatDataResponse::ok(
                        Bytes::copy_from_slice(input),
                    )))
                }
            }
            other => Ok(Self::Unsupported { msg_type: other }),
        }
    }
}

fn response_flags(ok: bool) -> u16 {
    if ok {
        CB_RESPONSE_OK
    } else {
        CB_RESPONSE_FAIL
    }
}

pub(crate) fn malformed(reason: impl Into<String>) -> ClipboardError {
    ClipboardError::ProtocolMalformed(reason.into())
}

/// Append `text` as null-terminated UTF-16LE
pub(crate) fn put_utf16z(buf: &mut BytesMut, text: &str) {
    for unit in text.encode_utf16() {
        buf.put_u16_le(unit);
    }
    buf.put_u16_le(0);
}

/// Read a null-terminated UTF-16LE string, advancing `buf` past the terminator
pub(crate) fn get_utf16z(buf: &mut &[u8]) -> Result<String> {
    let mut units = Vec::new();
    loop {
        if buf.remaining() < 2 {
            return Err(malformed("unterminated UTF-16 string"));
        }
        match buf.get_u16_le() {
            0 => break,
            unit => units.push(unit),
        }
    }
    String::from_utf16(&units).map_err(|_| ClipboardError::InvalidUtf16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::formats::{format_id::CF_UNICODETEXT, FormatDescriptor};

    #[test]
    fn test_data_request_wire_layout() {
        let encoded = ClipboardPdu::FormatDataRequest { format_id: 13 }.encode();
        assert_eq!(
            encoded.as_ref(),
            &[0x04, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_fail_response_has_empty_body() {
        let encoded = ClipboardPdu::FormatDataResponse(FormatDataResponse::fail()).encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(u16::from_le_bytes([encoded[2], encoded[3]]), CB_RESPONSE_FAIL);

        match ClipboardPdu::decode(&encoded).unwrap() {
            ClipboardPdu::FormatDataResponse(resp) => assert!(!resp.ok),
            other => panic!("Expected FormatDataResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_format_list_decode() {
        let list: FormatList = vec![
            FormatDescriptor::predefined(CF_UNICODETEXT),
            FormatDescriptor::new(0xC123, "HTML Format"),
        ]
        .into_iter()
        .collect();

        let decoded = ClipboardPdu::decode(&ClipboardPdu::FormatList(list.clone()).encode()).unwrap();
        assert_eq!(decoded, ClipboardPdu::FormatList(list));
    }

    #[test]
    fn test_data_response_payload() {
        let payload = Bytes::from_static(b"h\0i\0\0\0");
        let encoded = ClipboardPdu::FormatDataResponse(FormatDataResponse::ok(payload.clone())).encode();

        match ClipboardPdu::decode(&encoded).unwrap() {
            ClipboardPdu::FormatDataResponse(resp) => {
                assert!(resp.ok);
                assert_eq!(resp.data, payload);
            }
            other => panic!("Expected FormatDataResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let err = ClipboardPdu::decode(&[0x02, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ClipboardError::ProtocolMalformed(_)));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let mut encoded = BytesMut::from(&ClipboardPdu::FormatDataRequest { format_id: 1 }.encode()[..]);
        encoded.put_u8(0xFF);
        assert!(matches!(
            ClipboardPdu::decode(&encoded),
            Err(ClipboardError::ProtocolMalformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf16_format_name_is_malformed() {
        // Lone high surrogate in the name of format 0xC001
        let body = [0x01, 0xC0, 0x00, 0x00, 0x00, 0xD8, 0x00, 0x00];
        let mut encoded = BytesMut::new();
        encoded.put_u16_le(msg_type::CB_FORMAT_LIST);
        encoded.put_u16_le(0);
        encoded.put_u32_le(body.len() as u32);
        encoded.put_slice(&body);

        assert!(matches!(
            ClipboardPdu::decode(&encoded),
            Err(ClipboardError::ProtocolMalformed(_))
        ));
    }

    #[test]
    fn test_short_request_body_is_malformed() {
        let bytes = [0x04, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x0D, 0x00];
        assert!(matches!(
            ClipboardPdu::decode(&bytes),
            Err(ClipboardError::ProtocolMalformed(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        // CB_CLIP_CAPS with an empty body
        let bytes = [0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            ClipboardPdu::decode(&bytes).unwrap(),
            ClipboardPdu::Unsupported { msg_type: 0x0007 }
        );
    }

    #[test]
    fn test_utf16z_helpers() {
        let mut buf = BytesMut::new();
        put_utf16z(&mut buf, "Fichier é");
        put_utf16z(&mut buf, "");

        let mut cursor: &[u8] = &buf;
        assert_eq!(get_utf16z(&mut cursor).unwrap(), "Fichier é");
        assert_eq!(get_utf16z(&mut cursor).unwrap(), "");
        assert!(cursor.is_empty());

        let mut unterminated: &[u8] = &[0x41, 0x00];
        assert!(get_utf16z(&mut unterminated).is_err());
    }
}
