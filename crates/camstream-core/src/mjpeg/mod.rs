//! MJPEG framing
//!
//! A `multipart/x-mixed-replace` body is a run of parts, each a boundary line,
//! a header block, and a JPEG payload. The camera does not report payload
//! lengths reliably, so the framer finds frame ends by looking for the
//! boundary right after a JPEG end-of-image marker.

mod framer;
mod validator;

pub use framer::{
    advance, CandidateFrame, Framer, FramerEvent, FramerState, Framing, ParserState, Transition,
};
pub use validator::{validate, Rejection};

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// True if `bytes` contains an end-of-image marker pair
pub(crate) fn contains_eoi(bytes: &[u8]) -> bool {
    bytes.windows(2).any(|pair| pair == JPEG_EOI)
}
