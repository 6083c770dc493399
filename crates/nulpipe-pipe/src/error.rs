/// Errors that can occur while creating or driving pipe endpoints.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// The operating system refused to create a pipe.
    #[error("failed to create pipe: {0}")]
    Create(std::io::Error),

    /// Failed to adjust descriptor flags on a pipe end.
    #[error("failed to configure pipe descriptor {fd}: {source}")]
    Configure { fd: i32, source: std::io::Error },

    /// An I/O error occurred on a pipe end.
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipeError>;
