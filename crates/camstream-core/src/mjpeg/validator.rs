//! Structural checks on candidate frames before they are decoded

use thiserror::Error;

use super::{contains_eoi, JPEG_SOI};

/// Frames this size or smaller are never worth decoding
const MIN_FRAME_BYTES: usize = 100;
/// The end-of-image marker must sit within this many trailing bytes
const EOI_SEARCH_BYTES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("frame too small: {len} bytes")]
    TooSmall { len: usize },

    #[error("missing JPEG start marker")]
    MissingStartMarker,

    #[error("no JPEG end marker in the last 100 bytes")]
    MissingEndMarker,
}

/// Check that `frame` looks like a complete JPEG payload
pub fn validate(frame: &[u8]) -> Result<(), Rejection> {
    if frame.len() <= MIN_FRAME_BYTES {
        return Err(Rejection::TooSmall { len: frame.len() });
    }
    if frame[..2] != JPEG_SOI {
        return Err(Rejection::MissingStartMarker);
    }
    let tail = &frame[frame.len().saturating_sub(EOI_SEARCH_BYTES)..];
    if !contains_eoi(tail) {
        return Err(Rejection::MissingEndMarker);
    }
    Ok(())
}
