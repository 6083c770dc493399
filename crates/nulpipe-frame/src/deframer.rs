use bytes::{Bytes, BytesMut};

use crate::codec::{find_delimiter, Message};

/// Splits an incoming byte stream into messages.
///
/// Bytes after the last delimiter seen are held until a later chunk
/// completes them. Only newly arrived bytes are scanned; the held bytes
/// never contain a delimiter.
#[derive(Debug, Default)]
pub struct Deframer {
    pending: BytesMut,
}

impl Deframer {
    /// Create an empty deframer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every message it completes, in order.
    pub fn push(&mut self, chunk: impl Into<Bytes>) -> Vec<Message> {
        let chunk = chunk.into();

        let Some(end) = find_delimiter(&chunk) else {
            self.pending.extend_from_slice(&chunk);
            return Vec::new();
        };

        let mut messages = Vec::new();
        if self.pending.is_empty() {
            messages.push(Message::new(chunk.slice(..end)));
        } else {
            self.pending.extend_from_slice(&chunk[..end]);
            messages.push(Message::new(self.pending.split().freeze()));
        }

        let mut start = end + 1;
        while let Some(offset) = find_delimiter(&chunk[start..]) {
            let end = start + offset;
            messages.push(Message::new(chunk.slice(start..end)));
            start = end + 1;
        }

        self.pending.extend_from_slice(&chunk[start..]);
        messages
    }

    /// Bytes held while waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard held bytes.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
