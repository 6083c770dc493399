//! Duplex NUL-framed message transport over a pair of pipes.
//!
//! [`PipeTransport`] is the protocol core: it frames outgoing messages into
//! a [`PipeSink`](nulpipe_pipe::PipeSink), queues sends while the sink is
//! saturated, reassembles inbound messages and reports everything through
//! an [`Events`] channel. It performs no I/O itself.
//!
//! [`spawn`] runs a transport on a tokio task over any `AsyncWrite` /
//! `AsyncRead` pair and hands back a cloneable [`TransportHandle`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use nulpipe_transport::{spawn, TransportConfig};
//!
//! let (handle, mut events) = spawn(tokio::io::stdout(), tokio::io::stdin(), TransportConfig::default());
//! handle.send("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}").await?;
//! while let Some(message) = events.next_message().await {
//!     println!("{}", message?.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod transport;

pub use config::{TransportConfig, DEFAULT_CLOSE_LINGER, DEFAULT_READ_CHUNK_SIZE};
pub use driver::{spawn, TransportHandle};
pub use error::{Result, TransportError};
pub use event::{Events, TransportEvent};
pub use transport::{Completion, PipeTransport};
