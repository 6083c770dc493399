use std::time::Duration;

use nulpipe_pipe::WriteBuffer;

/// Default read size for the source pipe: 64 KiB.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default time allowed for already-accepted bytes to reach the pipe on close.
pub const DEFAULT_CLOSE_LINGER: Duration = Duration::from_millis(500);

/// Tuning for a driven pipe transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Buffered outbound bytes at which the transport starts queueing sends.
    /// Default: 16 KiB.
    pub high_water_mark: usize,
    /// Maximum bytes requested from the source pipe per read.
    pub read_chunk_size: usize,
    /// Upper bound on flushing buffered bytes after close.
    pub close_linger: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            high_water_mark: WriteBuffer::DEFAULT_HIGH_WATER_MARK,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            close_linger: DEFAULT_CLOSE_LINGER,
        }
    }
}
