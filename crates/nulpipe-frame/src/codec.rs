use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// The reserved byte that terminates every message on the wire.
pub const DELIMITER: u8 = 0x00;

static DELIMITER_BYTES: [u8; 1] = [DELIMITER];

/// A complete message, without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Create a message from a payload.
    ///
    /// The payload is taken as-is; see [`validate_payload`] for producers that
    /// cannot guarantee the absence of the delimiter.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the message and return its payload.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrow the payload as UTF-8 text.
    pub fn to_str(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Decode the payload as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// The number of bytes this message occupies on the wire.
    pub fn wire_size(&self) -> usize {
        self.payload.len() + 1
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Self::new(text)
    }
}

impl From<Message> for Bytes {
    fn from(message: Message) -> Self {
        message.payload
    }
}

/// The two halves of a frame, for writers that hand them over as one batch.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬──────────┐
/// │ Payload (any bytes but 0x00) │ 0x00     │
/// └──────────────────────────────┴──────────┘
/// ```
pub fn frame_parts(payload: &[u8]) -> [&[u8]; 2] {
    [payload, &DELIMITER_BYTES]
}

/// Encode a message into the wire format.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(DELIMITER);
}

/// Reject payloads that contain the delimiter.
///
/// There is no escaping on the wire: such a payload would arrive as two
/// messages.
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    match find_delimiter(payload) {
        Some(offset) => Err(FrameError::EmbeddedDelimiter { offset }),
        None => Ok(()),
    }
}

/// Index of the first delimiter in `bytes`.
pub fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_single_delimiter() {
        let mut buf = BytesMut::new();
        encode_message(b"hello", &mut buf);
        assert_eq!(&buf[..], b"hello\0");
    }

    #[test]
    fn encode_empty_payload() {
        let mut buf = BytesMut::new();
        encode_message(b"", &mut buf);
        assert_eq!(&buf[..], b"\0");
    }

    #[test]
    fn encode_appends_to_existing_bytes() {
        let mut buf = BytesMut::new();
        encode_message(b"first", &mut buf);
        encode_message(b"second", &mut buf);
        assert_eq!(&buf[..], b"first\0second\0");
    }

    #[test]
    fn frame_parts_match_encoding() {
        let parts = frame_parts(b"abc");
        let joined: Vec<u8> = parts.concat();

        let mut encoded = BytesMut::new();
        encode_message(b"abc", &mut encoded);
        assert_eq!(joined, encoded.to_vec());
    }

    #[test]
    fn validate_reports_delimiter_offset() {
        assert!(validate_payload(b"clean").is_ok());
        let err = validate_payload(b"ab\0cd").unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedDelimiter { offset: 2 }));
    }

    #[test]
    fn message_text_and_str() {
        let message = Message::from("héllo");
        assert_eq!(message.to_str().unwrap(), "héllo");
        assert_eq!(message.text(), "héllo");
        assert_eq!(message.len(), 6);
        assert_eq!(message.wire_size(), 7);
    }

    #[test]
    fn invalid_utf8_is_lossy_in_text() {
        let message = Message::new(vec![b'o', b'k', 0xFF]);
        assert!(matches!(message.to_str(), Err(FrameError::InvalidUtf8(_))));
        assert_eq!(message.text(), "ok\u{FFFD}");
    }

    #[test]
    fn message_into_bytes() {
        let message = Message::new(Bytes::from_static(b"raw"));
        let bytes: Bytes = message.clone().into();
        assert_eq!(bytes.as_ref(), b"raw");
        assert_eq!(message.into_bytes().as_ref(), b"raw");
    }
}
