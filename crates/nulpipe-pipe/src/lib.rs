//! Pipe endpoints for NUL-framed message transports.
//!
//! Provides the two things a message transport needs from the layer below it:
//! - [`PipeSink`]: the write-side contract (batch writes with a saturation
//!   report, and a one-shot readiness notification), with [`WriteBuffer`] as
//!   the standard high-water-mark implementation
//! - Anonymous pipes ([`pipe`], Unix only), convertible into tokio pipe
//!   halves with the `async` feature
//!
//! This is the lowest layer of nulpipe.

pub mod error;
pub mod sink;

#[cfg(unix)]
pub mod anon;

pub use error::{PipeError, Result};
pub use sink::{PipeSink, SinkState, WriteBuffer};

#[cfg(unix)]
pub use anon::{pipe, PipeReader, PipeWriter};
