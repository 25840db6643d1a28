//! Console listener: logs frames and frame rate

use camstream_core::{prepare_for_inference, DecodedFrame, StreamListener};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info};

const FPS_WINDOW: Duration = Duration::from_secs(5);

/// Frames per second over fixed windows
#[derive(Debug)]
struct FpsMeter {
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Count a frame; returns the rate once a window has elapsed
    fn record(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_WINDOW {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

pub struct ConsoleListener {
    infer_size: Option<(u32, u32)>,
    fps: Mutex<FpsMeter>,
    error: Mutex<Option<String>>,
    stopped: Notify,
}

impl ConsoleListener {
    pub fn new(infer_size: Option<(u32, u32)>) -> Self {
        Self {
            infer_size,
            fps: Mutex::new(FpsMeter::new(Instant::now())),
            error: Mutex::new(None),
            stopped: Notify::new(),
        }
    }

    /// Resolves once the session has stopped
    pub async fn stopped(&self) {
        self.stopped.notified().await;
    }

    /// The error that ended the session, if any
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

impl StreamListener for ConsoleListener {
    fn on_stream_started(&self) {
        info!("Stream started");
        *self.fps.lock() = FpsMeter::new(Instant::now());
    }

    fn on_frame_received(&self, frame: DecodedFrame) {
        debug!(
            "Frame {}: {}x{}, {} bytes",
            frame.sequence,
            frame.image.width(),
            frame.image.height(),
            frame.encoded_len
        );

        if let Some((width, height)) = self.infer_size {
            let input = prepare_for_inference(&frame.image, width, height);
            debug!(
                "Frame {} prepared for inference at {}x{}",
                frame.sequence,
                input.width(),
                input.height()
            );
        }

        if let Some(fps) = self.fps.lock().record(Instant::now()) {
            info!("{:.1} fps", fps);
        }
    }

    fn on_stream_error(&self, message: &str) {
        error!("Stream error: {}", message);
        *self.error.lock() = Some(message.to_string());
    }

    fn on_stream_stopped(&self) {
        info!("Stream stopped");
        // notify_one keeps a permit if nobody is waiting yet
        self.stopped.notify_one();
    }
}
