//! Listener callbacks and their delivery thread
//!
//! Every callback goes through one channel drained by one thread, so a
//! listener never sees two callbacks at once and per-session ordering
//! (started, frames, error, stopped) follows send order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::shared::SessionShared;
use crate::decode::DecodedFrame;

/// Receives stream lifecycle and frame callbacks
///
/// All methods run on the callback thread, one at a time.
pub trait StreamListener: Send + Sync {
    /// Connected; fired once before any frame
    fn on_stream_started(&self) {}

    /// A validated, decoded frame. Order across decode workers is best-effort.
    fn on_frame_received(&self, frame: DecodedFrame);

    /// The stream ended because of an error; at most once per session
    fn on_stream_error(&self, _message: &str) {}

    /// The session is over; exactly once per session
    fn on_stream_stopped(&self) {}
}

pub(crate) enum StreamEvent {
    Started,
    Frame(DecodedFrame),
    Error(String),
    Stopped,
}

impl StreamEvent {
    fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Started => "started",
            StreamEvent::Frame(_) => "frame",
            StreamEvent::Error(_) => "error",
            StreamEvent::Stopped => "stopped",
        }
    }
}

struct Callback {
    session: Arc<SessionShared>,
    event: StreamEvent,
}

#[derive(Clone)]
pub(crate) struct CallbackSender {
    tx: mpsc::UnboundedSender<Callback>,
}

impl CallbackSender {
    pub fn send(&self, session: &Arc<SessionShared>, event: StreamEvent) {
        let kind = event.kind();
        let callback = Callback {
            session: Arc::clone(session),
            event,
        };
        if self.tx.send(callback).is_err() {
            debug!("Callback thread gone, dropping {} event", kind);
        }
    }
}

/// Start the callback thread; it exits once every sender is dropped
pub(crate) fn spawn_dispatcher() -> std::io::Result<CallbackSender> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();
    std::thread::Builder::new()
        .name("mjpeg-callbacks".to_string())
        .spawn(move || {
            while let Some(callback) = rx.blocking_recv() {
                deliver(callback);
            }
            debug!("Callback thread exiting");
        })?;
    Ok(CallbackSender { tx })
}

fn deliver(callback: Callback) {
    let Callback { session, event } = callback;
    let kind = event.kind();
    let listener = session.listener();

    let result = catch_unwind(AssertUnwindSafe(|| match event {
        StreamEvent::Started => listener.on_stream_started(),
        StreamEvent::Frame(frame) => {
            // No frames after a stop request or after the stopped callback
            if session.accepts_frames() {
                listener.on_frame_received(frame);
            } else {
                trace!("Dropping frame {} decoded after stop", frame.sequence);
            }
        }
        StreamEvent::Error(message) => listener.on_stream_error(&message),
        StreamEvent::Stopped => {
            session.mark_closed();
            listener.on_stream_stopped();
        }
    }));

    if result.is_err() {
        error!("Stream listener panicked handling {} event", kind);
    }
}
