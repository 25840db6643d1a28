//! Stream session controller
//!
//! Owns at most one live session, the decode pool, and the callback thread.
//! Construct one per camera consumer and share it by reference; nothing here
//! is global.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use super::cancellation::StreamCancellation;
use super::connector::{Connector, HttpConnector, StreamRequest};
use super::listener::{spawn_dispatcher, CallbackSender, StreamListener};
use super::shared::{SessionShared, SessionState, SessionStats};
use super::worker::{self, SessionContext};
use crate::config::StreamConfig;
use crate::decode::{DecodePool, FrameDecoder, FrameMetadata, JpegFrameDecoder};
use crate::error::StreamError;

struct ActiveSession {
    session: Arc<SessionShared>,
    cancel: StreamCancellation,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

pub struct StreamController {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    pool: Arc<DecodePool>,
    callbacks: CallbackSender,
    active: Mutex<Option<ActiveSession>>,
    /// The most recently stopped session, kept for its stats
    finished: Mutex<Option<Arc<SessionShared>>>,
    last_frame: Arc<Mutex<Option<FrameMetadata>>>,
}

impl StreamController {
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Result<Self, StreamError> {
        // Configs built in code skip the clamping done on load
        let config = config.sanitized();
        let pool = DecodePool::new(
            config.decode_workers,
            config.decode_queue,
            decoder,
            config.downsample_factor,
        )
        .map_err(StreamError::Spawn)?;
        let callbacks = spawn_dispatcher().map_err(StreamError::Spawn)?;

        Ok(Self {
            config,
            connector,
            pool: Arc::new(pool),
            callbacks,
            active: Mutex::new(None),
            finished: Mutex::new(None),
            last_frame: Arc::new(Mutex::new(None)),
        })
    }

    /// Controller using HTTP and the JPEG decoder
    pub fn from_config(config: StreamConfig) -> Result<Self, StreamError> {
        let connector = HttpConnector::new(config.connect_timeout())?;
        let decoder = JpegFrameDecoder::new(config.max_full_width, config.max_full_height);
        Self::new(config, Arc::new(connector), Arc::new(decoder))
    }

    /// Start streaming from `address` (a host, already validated)
    ///
    /// A no-op while a session for the same address is connecting or
    /// streaming, apart from `listener` replacing the registered one. Any
    /// other session is stopped first.
    pub fn start(&self, address: &str, listener: Arc<dyn StreamListener>) -> Result<(), StreamError> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.session.address == address && current.session.state().is_active() {
                debug!("Already streaming from {}", address);
                current.session.replace_listener(listener);
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            self.shutdown(previous);
        }

        let session = Arc::new(SessionShared::new(
            address,
            listener,
            self.config.diagnostic_samples,
        ));
        let cancel = StreamCancellation::new();
        let request = StreamRequest {
            url: self.config.stream_url(address),
            user_agent: self.config.user_agent.clone(),
        };
        info!("Starting stream: {}", request.url);

        let (handle, done) = worker::spawn(SessionContext {
            session: Arc::clone(&session),
            request,
            framing: self.config.framing(),
            connector: Arc::clone(&self.connector),
            pool: Arc::clone(&self.pool),
            callbacks: self.callbacks.clone(),
            cancel: cancel.clone(),
            last_frame: Arc::clone(&self.last_frame),
        })?;

        *active = Some(ActiveSession {
            session,
            cancel,
            handle,
            done,
        });
        Ok(())
    }

    /// Stop the current session, waiting up to the configured stop timeout
    ///
    /// A no-op when idle.
    pub fn stop(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };
        info!("Stopping stream from {}", active.session.address);
        self.shutdown(active);
    }

    fn shutdown(&self, active: ActiveSession) {
        active.session.request_stop();
        active.cancel.cancel();

        let timeout = self.config.stop_timeout();
        match active.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if active.handle.join().is_err() {
                    warn!("Stream thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Stream thread for {} did not exit within {:?}, detaching",
                    active.session.address, timeout
                );
            }
        }
        *self.finished.lock() = Some(active.session);
    }

    /// Lifecycle of the current session; `Idle` when there is none
    pub fn state(&self) -> SessionState {
        self.active
            .lock()
            .as_ref()
            .map_or(SessionState::Idle, |active| active.session.state())
    }

    pub fn address(&self) -> Option<String> {
        self.active
            .lock()
            .as_ref()
            .map(|active| active.session.address.clone())
    }

    /// Stop submitting frames for decode; parsing continues
    pub fn pause(&self) -> bool {
        self.set_paused(true)
    }

    pub fn resume(&self) -> bool {
        self.set_paused(false)
    }

    pub fn is_paused(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.session.is_paused())
    }

    /// Returns true if the pause state changed
    fn set_paused(&self, paused: bool) -> bool {
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return false;
        };
        let changed = active.session.set_paused(paused);
        if changed {
            info!(
                "Stream from {} {}",
                active.session.address,
                if paused { "paused" } else { "resumed" }
            );
        }
        changed
    }

    /// Counters of the current session, or of the last one after a stop
    pub fn stats(&self) -> Option<SessionStats> {
        if let Some(active) = self.active.lock().as_ref() {
            return Some(active.session.stats.snapshot());
        }
        self.finished
            .lock()
            .as_ref()
            .map(|session| session.stats.snapshot())
    }

    /// Metadata of the most recently decoded frame
    pub fn last_frame(&self) -> Option<FrameMetadata> {
        *self.last_frame.lock()
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop();
    }
}
