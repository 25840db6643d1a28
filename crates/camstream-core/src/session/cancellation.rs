//! Cancellation for stream sessions
//!
//! Interrupts a stream thread blocked on connect or read.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Wrapper around CancellationToken for stream session cancellation
#[derive(Clone, Default)]
pub(crate) struct StreamCancellation {
    token: CancellationToken,
}

impl StreamCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the stream thread and make it exit
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
