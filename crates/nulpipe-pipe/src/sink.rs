use std::io;

use bytes::{Buf, BytesMut};

/// Outcome of handing bytes to a [`PipeSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// The sink is below its capacity threshold and can take more writes.
    Accepting,
    /// The sink took the bytes but its buffer is now at or over capacity.
    /// The writer should hold further data until the sink reports ready.
    Saturated,
}

/// The write side of a pipe as seen by a message transport.
///
/// A sink always takes the bytes it is given (or fails); saturation is
/// reported after the fact so the caller can stop feeding it. Readiness is
/// a one-shot notification: [`watch_ready`](PipeSink::watch_ready) arms it,
/// the owner of the sink delivers it once, and it must be re-armed for the
/// next saturation episode.
pub trait PipeSink {
    /// Queue every slice in `parts` as one contiguous write.
    ///
    /// No flush can happen between the parts, so a reader on the other end
    /// never observes a prefix of the batch without the rest of it.
    fn write_batch(&mut self, parts: &[&[u8]]) -> io::Result<SinkState>;

    /// Arm the one-shot "ready again" notification.
    fn watch_ready(&mut self);

    /// Disarm a previously armed readiness notification.
    fn unwatch_ready(&mut self);
}

/// In-memory sink with a high-water mark.
///
/// The owner moves buffered bytes into the real pipe with
/// [`chunk`](WriteBuffer::chunk) / [`consume`](WriteBuffer::consume) and
/// polls [`take_ready`](WriteBuffer::take_ready) after each write to learn
/// when a saturated buffer has fully drained.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: BytesMut,
    high_water_mark: usize,
    ready_armed: bool,
    fault: Option<io::ErrorKind>,
}

impl WriteBuffer {
    /// Default capacity threshold: 16 KiB.
    pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

    /// Create a buffer that saturates once `high_water_mark` bytes are queued.
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(high_water_mark),
            high_water_mark,
            ready_armed: false,
            fault: None,
        }
    }

    /// Bytes queued but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Configured capacity threshold.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Whether the queued bytes are at or over the threshold.
    pub fn is_saturated(&self) -> bool {
        self.buf.len() >= self.high_water_mark
    }

    /// Whether a readiness notification is armed.
    pub fn is_watching(&self) -> bool {
        self.ready_armed
    }

    /// The queued bytes, oldest first.
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the first `n` queued bytes after they reached the pipe.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Report readiness if a notification is armed and the buffer is empty.
    ///
    /// Returns `true` at most once per [`watch_ready`](PipeSink::watch_ready).
    pub fn take_ready(&mut self) -> bool {
        if self.ready_armed && self.buf.is_empty() {
            self.ready_armed = false;
            return true;
        }
        false
    }

    /// Record a write fault on the underlying pipe.
    ///
    /// Every later [`write_batch`](PipeSink::write_batch) fails with `kind`.
    pub fn fail(&mut self, kind: io::ErrorKind) {
        self.fault = Some(kind);
    }

    /// The recorded write fault, if any.
    pub fn fault(&self) -> Option<io::ErrorKind> {
        self.fault
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HIGH_WATER_MARK)
    }
}

impl PipeSink for WriteBuffer {
    fn write_batch(&mut self, parts: &[&[u8]]) -> io::Result<SinkState> {
        if let Some(kind) = self.fault {
            return Err(io::Error::new(kind, "pipe sink failed earlier"));
        }

        let total = parts.iter().map(|part| part.len()).sum();
        self.buf.reserve(total);
        for part in parts {
            self.buf.extend_from_slice(part);
        }

        if self.is_saturated() {
            Ok(SinkState::Saturated)
        } else {
            Ok(SinkState::Accepting)
        }
    }

    fn watch_ready(&mut self) {
        self.ready_armed = true;
    }

    fn unwatch_ready(&mut self) {
        self.ready_armed = false;
    }
}
