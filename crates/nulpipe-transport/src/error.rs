/// Errors surfaced by the pipe transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed; nothing more can be sent.
    #[error("pipe transport closed")]
    Closed,

    /// The write-side pipe failed.
    #[error("sink error: {0}")]
    Sink(#[source] std::io::Error),

    /// The read-side pipe failed.
    #[error("source error: {0}")]
    Source(#[source] std::io::Error),
}

impl TransportError {
    /// Whether this is the transport-closed condition.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
