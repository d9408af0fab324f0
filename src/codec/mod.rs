//! Wire codec.
//!
//! Frames are a text header block followed by a body. Encoding a message is
//! always `serialize → compress → encrypt → header`; decoding runs the same
//! steps in reverse. This module owns the framing and the message body; the
//! compression and encryption steps live in their own modules.

mod decoder;
mod header;
mod message;
mod payload;

pub use decoder::*;
pub use header::*;
pub use message::*;
pub use payload::*;
