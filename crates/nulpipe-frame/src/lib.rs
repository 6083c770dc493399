//! NUL-delimited message framing for pipe transports.
//!
//! Every message on the wire is its payload followed by a single `0x00`
//! byte. There is no length prefix and no escaping, so payloads must not
//! contain the delimiter.
//!
//! - [`Deframer`] turns arbitrary read chunks back into messages
//! - [`MessageReader`] / [`MessageWriter`] do the same over blocking
//!   `Read` / `Write` streams

pub mod codec;
pub mod deframer;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    encode_message, find_delimiter, frame_parts, validate_payload, Message, DELIMITER,
};
pub use deframer::Deframer;
pub use error::{FrameError, Result};
pub use reader::MessageReader;
pub use writer::MessageWriter;
