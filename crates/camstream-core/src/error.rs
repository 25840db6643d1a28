//! Session-level errors
//!
//! Anything that ends a stream session surfaces as a [`StreamError`]. Per-frame
//! problems (validation, decode) have their own types and never end a session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The camera answered with a non-2xx status
    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("connection failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The per-session runtime could not be built
    #[error("failed to start stream runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to spawn stream thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stream worker panicked: {0}")]
    WorkerPanicked(String),
}

impl StreamError {
    /// Build a panic error from a `catch_unwind` payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        StreamError::WorkerPanicked(message)
    }
}
