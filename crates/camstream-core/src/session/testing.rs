//! Test doubles for session tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::connector::{ByteStream, Connection, Connector, StreamRequest};
use super::listener::StreamListener;
use crate::config::DEFAULT_BOUNDARY;
use crate::decode::{DecodeError, DecodedFrame, FrameDecoder};
use crate::error::StreamError;

/// Poll `condition` for up to five seconds
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Structurally valid JPEG of `len` bytes; the codec is never run on it
pub fn jpeg(len: usize, seed: u8) -> Vec<u8> {
    assert!(len > 4);
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend((0..len - 4).map(|i| 0x20 + ((i as u8).wrapping_add(seed) % 0x50)));
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

/// A multipart body using the default boundary, closed by the final boundary
pub fn mjpeg_stream(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(DEFAULT_BOUNDARY.as_bytes());
        body.extend_from_slice(
            format!(
                "\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                frame.len()
            )
            .as_bytes(),
        );
        body.extend_from_slice(frame);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(DEFAULT_BOUNDARY.as_bytes());
    body.extend_from_slice(b"--\r\n");
    body
}

enum Script {
    Chunks { chunks: Vec<Vec<u8>>, fail: bool },
    Hanging,
    Status(u16),
    Fed(Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>),
}

/// Connector that replays a fixed script on every connect
pub struct ScriptedConnector {
    script: Script,
    connects: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            connects: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Delivers the chunks, then ends the body
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Self::new(Script::Chunks {
            chunks,
            fail: false,
        })
    }

    /// Delivers the chunks, then fails the read
    pub fn failing_after(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Self::new(Script::Chunks { chunks, fail: true })
    }

    /// Connects, then never delivers a byte
    pub fn hanging() -> Arc<Self> {
        Self::new(Script::Hanging)
    }

    pub fn with_status(status: u16) -> Arc<Self> {
        Self::new(Script::Status(status))
    }

    /// Body chunks come from the returned sender; usable for one connect
    pub fn fed() -> (Arc<Self>, mpsc::UnboundedSender<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Script::Fed(Mutex::new(Some(rx)))), tx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

fn ok_connection(body: ByteStream) -> Connection {
    Connection {
        status: 200,
        content_type: Some(format!(
            "multipart/x-mixed-replace;boundary={}",
            DEFAULT_BOUNDARY.trim_start_matches('-')
        )),
        body,
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, request: &StreamRequest) -> Result<Connection, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.url.clone());

        let connection = match &self.script {
            Script::Chunks { chunks, fail } => {
                let mut items: Vec<Result<Bytes, StreamError>> = chunks
                    .iter()
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                if *fail {
                    items.push(Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))));
                }
                ok_connection(futures::stream::iter(items).boxed())
            }
            Script::Hanging => ok_connection(futures::stream::pending().boxed()),
            Script::Status(status) => Connection {
                status: *status,
                content_type: Some("text/html".to_string()),
                body: futures::stream::empty().boxed(),
            },
            Script::Fed(rx) => {
                let rx = rx.lock().take().ok_or_else(|| {
                    StreamError::Io(std::io::Error::other("fed connector already used"))
                })?;
                let body = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|chunk| (Ok(chunk), rx))
                });
                ok_connection(body.boxed())
            }
        };
        Ok(connection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Started,
    Frame { sequence: u64, sample_size: u32 },
    Error(String),
    Stopped,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    fn count(&self, wanted: &Recorded) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    pub fn started_count(&self) -> usize {
        self.count(&Recorded::Started)
    }

    pub fn stopped_count(&self) -> usize {
        self.count(&Recorded::Stopped)
    }

    pub fn frame_sequences(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Frame { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect()
    }

    pub fn sample_sizes(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Frame { sample_size, .. } => Some(*sample_size),
                _ => None,
            })
            .collect()
    }
}

impl StreamListener for RecordingListener {
    fn on_stream_started(&self) {
        self.events.lock().push(Recorded::Started);
    }

    fn on_frame_received(&self, frame: DecodedFrame) {
        self.events.lock().push(Recorded::Frame {
            sequence: frame.sequence,
            sample_size: frame.sample_size,
        });
    }

    fn on_stream_error(&self, message: &str) {
        self.events.lock().push(Recorded::Error(message.to_string()));
    }

    fn on_stream_stopped(&self) {
        self.events.lock().push(Recorded::Stopped);
    }
}

/// Produces a blank image without touching the bytes
#[derive(Default)]
pub struct SolidDecoder {
    fail_full_resolution: bool,
}

impl SolidDecoder {
    pub fn failing_full_resolution() -> Self {
        Self {
            fail_full_resolution: true,
        }
    }
}

impl FrameDecoder for SolidDecoder {
    fn decode(&self, _bytes: &[u8], sample_size: u32) -> Result<DynamicImage, DecodeError> {
        if self.fail_full_resolution && sample_size <= 1 {
            return Err(DecodeError::Corrupt("too large".to_string()));
        }
        let scale = sample_size.max(1);
        Ok(DynamicImage::new_rgb8(64 / scale, 48 / scale))
    }
}

/// Holds every decode until the returned sender signals or is dropped
pub struct GatedDecoder {
    release: crossbeam::channel::Receiver<()>,
}

impl GatedDecoder {
    pub fn new() -> (Self, crossbeam::channel::Sender<()>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { release: rx }, tx)
    }
}

impl FrameDecoder for GatedDecoder {
    fn decode(&self, _bytes: &[u8], _sample_size: u32) -> Result<DynamicImage, DecodeError> {
        let _ = self.release.recv();
        Ok(DynamicImage::new_rgb8(8, 8))
    }
}
