//! NUL-delimited message transport over pipes.
//!
//! Messages travel as their payload bytes followed by a single `0x00`. The
//! transport frames outgoing messages, queues sends while the write side is
//! saturated, and reassembles inbound messages from arbitrary read chunks.
//!
//! # Crate Structure
//!
//! - [`pipe`]: write-side sink contract, high-water-mark buffer, anonymous pipes
//! - [`frame`]: wire codec, deframer, blocking reader and writer
//! - [`transport`]: the transport state machine and its tokio driver

/// Re-export pipe types.
pub mod pipe {
    pub use nulpipe_pipe::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nulpipe_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use nulpipe_transport::*;
}
