//! State shared between the controller, the stream thread, decode workers,
//! and the callback thread

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::listener::StreamListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

impl SessionState {
    /// Connecting or streaming
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }
}

/// Lifecycle and pause flag, always read and written together
#[derive(Debug)]
struct SessionStatus {
    state: SessionState,
    paused: bool,
    /// Set once by a stop request; frames are no longer delivered
    stop_requested: bool,
    /// Set once the stopped callback has been delivered
    closed: bool,
}

/// One streaming attempt
pub(crate) struct SessionShared {
    pub address: String,
    listener: Mutex<Arc<dyn StreamListener>>,
    status: Mutex<SessionStatus>,
    pub stats: StatsCounters,
    pub rejections: DiagnosticSampler,
    pub decode_failures: DiagnosticSampler,
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl SessionShared {
    pub fn new(
        address: impl Into<String>,
        listener: Arc<dyn StreamListener>,
        diagnostic_samples: usize,
    ) -> Self {
        Self {
            address: address.into(),
            listener: Mutex::new(listener),
            status: Mutex::new(SessionStatus {
                state: SessionState::Connecting,
                paused: false,
                stop_requested: false,
                closed: false,
            }),
            stats: StatsCounters::default(),
            rejections: DiagnosticSampler::new(diagnostic_samples),
            decode_failures: DiagnosticSampler::new(diagnostic_samples),
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    pub fn listener(&self) -> Arc<dyn StreamListener> {
        Arc::clone(&self.listener.lock())
    }

    /// Later callbacks for this session go to `listener`
    pub fn replace_listener(&self, listener: Arc<dyn StreamListener>) {
        *self.listener.lock() = listener;
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().state
    }

    /// Decoded frames may still reach the listener
    pub fn accepts_frames(&self) -> bool {
        let status = self.status.lock();
        !status.stop_requested && !status.closed
    }

    /// The listener has seen the stopped callback; nothing follows it
    pub fn mark_closed(&self) {
        self.status.lock().closed = true;
    }

    pub fn is_paused(&self) -> bool {
        self.status.lock().paused
    }

    /// Returns true if the flag changed
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut status = self.status.lock();
        let changed = status.paused != paused;
        status.paused = paused;
        changed
    }

    /// Connecting -> Streaming. False if a stop request got there first.
    pub fn mark_streaming(&self) -> bool {
        let mut status = self.status.lock();
        if status.state == SessionState::Connecting {
            status.state = SessionState::Streaming;
            true
        } else {
            false
        }
    }

    /// Connecting/Streaming -> Stopping. False if already winding down.
    pub fn request_stop(&self) -> bool {
        let mut status = self.status.lock();
        status.stop_requested = true;
        if status.state.is_active() {
            status.state = SessionState::Stopping;
            true
        } else {
            false
        }
    }

    pub fn mark_stopped(&self) {
        self.status.lock().state = SessionState::Stopped;
    }

    /// A frame was handed to the decode pool
    pub fn decode_started(&self) {
        *self.in_flight.lock() += 1;
    }

    /// A submitted frame finished decoding or was refused
    pub fn decode_finished(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }

    /// Wait until no decode for this session is outstanding
    ///
    /// Returns false on timeout or when `give_up` turns true.
    pub fn wait_for_decodes(&self, timeout: Duration, give_up: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if give_up() || Instant::now() >= deadline {
                return false;
            }
            self.drained
                .wait_for(&mut in_flight, DRAIN_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        true
    }
}

/// How often a drain re-checks its give-up condition
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Per-session counters
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    bytes_read: AtomicU64,
    frames_extracted: AtomicU64,
    frames_rejected: AtomicU64,
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
    frames_skipped_paused: AtomicU64,
    frames_dropped_busy: AtomicU64,
}

impl StatsCounters {
    pub fn add_bytes(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn frame_extracted(&self) {
        self.frames_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped_paused(&self) {
        self.frames_skipped_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped_busy(&self) {
        self.frames_dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_extracted: self.frames_extracted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            frames_skipped_paused: self.frames_skipped_paused.load(Ordering::Relaxed),
            frames_dropped_busy: self.frames_dropped_busy.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_read: u64,
    /// Candidate frames found by the framer
    pub frames_extracted: u64,
    /// Candidates that failed structural validation
    pub frames_rejected: u64,
    pub frames_decoded: u64,
    /// Frames that failed both decode attempts
    pub decode_failures: u64,
    pub frames_skipped_paused: u64,
    /// Frames refused because the decode queue was full
    pub frames_dropped_busy: u64,
}

/// Lets the first few occurrences of a diagnostic through in full
#[derive(Debug)]
pub(crate) struct DiagnosticSampler {
    limit: usize,
    seen: AtomicUsize,
}

impl DiagnosticSampler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            seen: AtomicUsize::new(0),
        }
    }

    /// True while still under the limit
    pub fn sample(&self) -> bool {
        self.seen.fetch_add(1, Ordering::Relaxed) < self.limit
    }
}
