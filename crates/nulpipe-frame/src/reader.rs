use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::debug;

use crate::codec::Message;
use crate::deframer::Deframer;
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete messages.
pub struct MessageReader<T> {
    inner: T,
    deframer: Deframer,
    ready: VecDeque<Message>,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            deframer: Deframer::new(),
            ready: VecDeque::new(),
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Bytes
    /// of an unterminated final message stay counted in
    /// [`pending_len`](Self::pending_len).
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.deframer.pending_len() > 0 {
                    debug!(
                        pending = self.deframer.pending_len(),
                        "stream ended inside an unterminated message"
                    );
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.ready
                .extend(self.deframer.push(Bytes::copy_from_slice(&chunk[..read])));
        }
    }

    /// Bytes received after the last complete message.
    pub fn pending_len(&self) -> usize {
        self.deframer.pending_len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Iterator for MessageReader<T> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_message() {
            Err(FrameError::ConnectionClosed) => None,
            other => Some(other),
        }
    }
}
