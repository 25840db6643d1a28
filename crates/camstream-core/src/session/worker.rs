//! The stream thread
//!
//! One dedicated thread per session connects, reads chunks, and runs them
//! through the framer. It owns the framer outright; only the session flags,
//! counters, and the last-frame cache are shared with other threads.

use crossbeam::channel::{bounded, Receiver};
use futures::StreamExt;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::cancellation::StreamCancellation;
use super::connector::{Connector, StreamRequest};
use super::listener::{CallbackSender, StreamEvent};
use super::shared::SessionShared;
use crate::decode::{hex_prefix, DecodeFailure, DecodePool, DecodedFrame, FrameMetadata, SubmitError};
use crate::error::StreamError;
use crate::mjpeg::{validate, CandidateFrame, Framer, FramerEvent, Framing};

/// Successful decodes logged with dimensions
const LOGGED_DECODES: u64 = 10;
/// Leading bytes shown when a frame fails to decode
const HEX_DUMP_BYTES: usize = 20;
/// Upper bound on waiting for outstanding decodes once the stream has ended
const DECODE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the stream thread needs
pub(crate) struct SessionContext {
    pub session: Arc<SessionShared>,
    pub request: StreamRequest,
    pub framing: Framing,
    pub connector: Arc<dyn Connector>,
    pub pool: Arc<DecodePool>,
    pub callbacks: CallbackSender,
    pub cancel: StreamCancellation,
    pub last_frame: Arc<Mutex<Option<FrameMetadata>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    FinalBoundary,
    EndOfStream,
    Cancelled,
}

/// Spawn the stream thread; the receiver fires when it has finished
pub(crate) fn spawn(ctx: SessionContext) -> Result<(JoinHandle<()>, Receiver<()>), StreamError> {
    let (done_tx, done_rx) = bounded(1);
    let handle = std::thread::Builder::new()
        .name("mjpeg-stream".to_string())
        .spawn(move || {
            let _done = scopeguard::guard(done_tx, |tx| {
                let _ = tx.send(());
            });
            let outcome = catch_unwind(AssertUnwindSafe(|| run(&ctx)))
                .unwrap_or_else(|payload| Err(StreamError::from_panic(payload)));
            finish(&ctx, outcome);
        })
        .map_err(StreamError::Spawn)?;
    Ok((handle, done_rx))
}

fn run(ctx: &SessionContext) -> Result<SessionEnd, StreamError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(StreamError::Runtime)?;
    runtime.block_on(drive(ctx))
}

async fn drive(ctx: &SessionContext) -> Result<SessionEnd, StreamError> {
    let connection = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = ctx.connector.connect(&ctx.request) => result?,
    };

    if !connection.is_success() {
        return Err(StreamError::HttpStatus(connection.status));
    }
    connection.check_content_type();

    if !ctx.session.mark_streaming() {
        return Ok(SessionEnd::Cancelled);
    }
    info!("Stream connected: {}", ctx.request.url);
    ctx.callbacks.send(&ctx.session, StreamEvent::Started);

    let mut framer = Framer::new(ctx.framing.clone());
    let mut body = connection.body;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            next = body.next() => next,
        };
        let chunk = match next {
            Some(chunk) => chunk?,
            None => return Ok(SessionEnd::EndOfStream),
        };
        ctx.session.stats.add_bytes(chunk.len());

        for event in framer.feed(&chunk) {
            match event {
                FramerEvent::FrameExtracted(frame) => forward(ctx, frame),
                FramerEvent::StreamEnded => return Ok(SessionEnd::FinalBoundary),
            }
        }

        if ctx.cancel.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }
    }
}

/// Validate a candidate and hand it to the decode pool
fn forward(ctx: &SessionContext, frame: CandidateFrame) {
    let session = &ctx.session;
    session.stats.frame_extracted();

    if let Err(rejection) = validate(&frame.bytes) {
        session.stats.frame_rejected();
        if session.rejections.sample() {
            warn!("Frame {} rejected: {}", frame.sequence, rejection);
        } else {
            trace!("Frame {} rejected: {}", frame.sequence, rejection);
        }
        return;
    }

    // Paused: keep parsing, stop decoding
    if session.is_paused() {
        session.stats.frame_skipped_paused();
        return;
    }

    let sequence = frame.sequence;
    let bytes = frame.bytes.clone();
    let owner = Arc::clone(session);
    let callbacks = ctx.callbacks.clone();
    let last_frame = Arc::clone(&ctx.last_frame);
    session.decode_started();
    let submitted = ctx.pool.submit(frame, move |result| {
        on_decoded(&owner, &callbacks, &last_frame, &bytes, result);
        owner.decode_finished();
    });

    match submitted {
        Ok(()) => {}
        Err(SubmitError::QueueFull) => {
            session.decode_finished();
            session.stats.frame_dropped_busy();
            debug!("Decode queue full, dropping frame {}", sequence);
        }
        Err(SubmitError::Closed) => {
            session.decode_finished();
            warn!("Decode pool closed, dropping frame {}", sequence);
        }
    }
}

/// Runs on a decode worker
fn on_decoded(
    session: &Arc<SessionShared>,
    callbacks: &CallbackSender,
    last_frame: &Mutex<Option<FrameMetadata>>,
    bytes: &[u8],
    result: Result<DecodedFrame, DecodeFailure>,
) {
    match result {
        Ok(frame) => {
            session.stats.frame_decoded();
            if frame.sequence < LOGGED_DECODES {
                debug!(
                    "Frame {} decoded: {}x{}, {} bytes (1/{} scale)",
                    frame.sequence,
                    frame.image.width(),
                    frame.image.height(),
                    frame.encoded_len,
                    frame.sample_size
                );
            }
            *last_frame.lock() = Some(frame.metadata());
            callbacks.send(session, StreamEvent::Frame(frame));
        }
        Err(failure) => {
            session.stats.decode_failed();
            if session.decode_failures.sample() {
                warn!(
                    "{}. First {} bytes: {}",
                    failure,
                    HEX_DUMP_BYTES,
                    hex_prefix(bytes, HEX_DUMP_BYTES)
                );
            } else {
                trace!("{}", failure);
            }
        }
    }
}

/// Report how the session ended; always fires the stopped callback
fn finish(ctx: &SessionContext, outcome: Result<SessionEnd, StreamError>) {
    let address = &ctx.session.address;
    match outcome {
        Ok(SessionEnd::FinalBoundary) => info!("Stream from {} sent its final boundary", address),
        Ok(SessionEnd::EndOfStream) => info!("Stream from {} closed by peer", address),
        Ok(SessionEnd::Cancelled) => debug!("Stream from {} cancelled", address),
        Err(e) if ctx.cancel.is_cancelled() => {
            debug!("Ignoring error during shutdown of {}: {}", address, e);
        }
        Err(e) => {
            error!("Stream error from {}: {}", address, e);
            ctx.callbacks
                .send(&ctx.session, StreamEvent::Error(e.to_string()));
        }
    }

    // Frames still decoding belong before the stopped callback
    let cancel = &ctx.cancel;
    if !cancel.is_cancelled()
        && !ctx
            .session
            .wait_for_decodes(DECODE_DRAIN_TIMEOUT, || cancel.is_cancelled())
    {
        debug!("Stream from {} stopped with decodes outstanding", address);
    }

    ctx.session.mark_stopped();
    let stats = ctx.session.stats.snapshot();
    info!(
        "Stream from {} stopped: {} bytes, {} frames extracted, {} rejected, {} decoded, {} decode failures",
        address,
        stats.bytes_read,
        stats.frames_extracted,
        stats.frames_rejected,
        stats.frames_decoded,
        stats.decode_failures
    );
    ctx.callbacks.send(&ctx.session, StreamEvent::Stopped);
}
