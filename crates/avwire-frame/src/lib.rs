//! Device message framing for control protocols.
//!
//! AV and building-control hardware frames its messages in many ways. This
//! crate turns a per-connection [`FrameCodec`] description into exact wire
//! bytes and back:
//! - Framing: delimiter-terminated, indicator-then-delimiter, fixed length
//!   after an indicator, or length-prefixed via a [`LengthRule`]
//! - Checksums: XOR, additive 8-bit two's complement, byte-count check
//! - Byte-stuffing of reserved control bytes
//!
//! Decoding never yields a frame whose checksum failed, and always makes
//! progress: corrupt input is discarded up to the next marker.

pub mod checksum;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod escape;
pub mod profile;

#[cfg(feature = "async")]
mod tokio_codec;

pub use checksum::Checksum;
pub use codec::{
    FieldWidth, Frame, FrameCodec, FrameLength, Framing, LengthRule, DEFAULT_MAX_FRAME,
};
pub use decoder::{FrameDecoder, DEFAULT_MAX_BUFFER};
pub use encoder::FrameEncoder;
pub use error::{FrameError, Result};
pub use escape::{escape, unescape, Escaping};
pub use profile::{CodecProfile, FramingProfile};
