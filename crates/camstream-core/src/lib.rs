//! Core library for camstream
//!
//! Turns the `multipart/x-mixed-replace` byte stream of a network camera into
//! validated, decoded still frames:
//!
//! - [`mjpeg`] - byte-level framer and JPEG structure validator
//! - [`decode`] - codec seam, decode worker pool, and inference rescaling
//! - [`session`] - stream lifecycle, HTTP connector, and listener delivery
//! - [`config`] - TOML-backed stream settings

pub mod config;
pub mod decode;
pub mod error;
pub mod mjpeg;
pub mod session;

pub use config::{ConfigError, StreamConfig};
pub use decode::{
    prepare_for_inference, DecodeError, DecodedFrame, FrameDecoder, FrameMetadata,
    JpegFrameDecoder,
};
pub use error::StreamError;
pub use mjpeg::{validate, CandidateFrame, Framer, FramerEvent, Framing, Rejection};
pub use session::{
    Connection, Connector, HttpConnector, SessionState, SessionStats, StreamController,
    StreamListener, StreamRequest,
};
