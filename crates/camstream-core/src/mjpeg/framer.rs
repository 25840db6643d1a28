//! Resumable byte-level MJPEG framer
//!
//! [`advance`] is the whole state machine: it takes the current state and one
//! byte and returns the next state plus what, if anything, that byte produced.
//! [`Framer`] drives it over arbitrarily split chunks and numbers the frames.
//!
//! Frame ends are detected heuristically. A boundary inside the JPEG payload
//! only closes the frame when an end-of-image marker sits in the few bytes
//! before it, so boundary look-alikes in binary data are skipped.

use bytes::Bytes;
use tracing::{trace, warn};

use super::contains_eoi;

/// Terminates a part's header block
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// Appended to the boundary to mark the last part
const FINAL_SUFFIX: &[u8] = b"--";
/// Extra bytes scanned before the boundary-sized tail of the buffer
const BOUNDARY_WINDOW_SLACK: usize = 10;
/// How far before a boundary the end-of-image marker may sit
const EOI_LOOKBACK: usize = 10;
const MAX_HEADER_BYTES: usize = 8 * 1024;
const INITIAL_FRAME_CAPACITY: usize = 64 * 1024;

/// Boundary markers and limits for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    boundary: Vec<u8>,
    final_boundary: Vec<u8>,
    max_frame_bytes: usize,
}

impl Framing {
    /// Framing for `boundary`; the final boundary is `boundary` followed by `--`
    ///
    /// # Panics
    ///
    /// Panics if `boundary` is empty.
    pub fn new(boundary: impl Into<Vec<u8>>) -> Self {
        let boundary = boundary.into();
        assert!(!boundary.is_empty(), "boundary marker must not be empty");
        let mut final_boundary = boundary.clone();
        final_boundary.extend_from_slice(FINAL_SUFFIX);
        Self {
            boundary,
            final_boundary,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    pub fn final_boundary(&self) -> &[u8] {
        &self.final_boundary
    }

    /// Position where the frame in `buf` ends, if a trailing boundary closes it
    fn find_frame_end(&self, buf: &[u8]) -> Option<usize> {
        let len = self.boundary.len();
        if buf.len() < len + 4 {
            return None;
        }
        let window_start = buf.len().saturating_sub(len + BOUNDARY_WINDOW_SLACK);
        (window_start..=buf.len() - len)
            .filter(|&pos| buf[pos..pos + len] == self.boundary[..])
            .find(|&pos| contains_eoi(&buf[pos.saturating_sub(EOI_LOOKBACK)..pos]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// Scanning for the boundary marker
    #[default]
    Boundary,
    /// Accumulating the part header block
    Headers,
    /// Accumulating JPEG payload
    JpegData,
}

/// Everything the framer carries between bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramerState {
    pub state: ParserState,
    /// Boundary bytes matched so far (Boundary only)
    pub matched: usize,
    /// Header or payload bytes for the current state
    pub buffer: Vec<u8>,
}

impl FramerState {
    fn enter(state: ParserState) -> Self {
        let buffer = match state {
            ParserState::JpegData => Vec::with_capacity(INITIAL_FRAME_CAPACITY),
            _ => Vec::new(),
        };
        Self {
            state,
            matched: 0,
            buffer,
        }
    }

    /// Boundary fully matched: move on to the part headers
    fn boundary_complete() -> Self {
        trace!("Boundary matched, reading part headers");
        Self::enter(ParserState::Headers)
    }
}

/// What one byte produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Pending,
    /// A frame closed by a boundary; payload bytes before the boundary
    Frame(Vec<u8>),
    /// A header block or payload outgrew its limit and was dropped
    Discarded { state: ParserState, len: usize },
    /// The final boundary was seen
    StreamEnded,
}

/// Feed one byte through the state machine
pub fn advance(framing: &Framing, mut current: FramerState, byte: u8) -> (FramerState, Transition) {
    match current.state {
        ParserState::Boundary => {
            if byte == framing.boundary[current.matched] {
                current.matched += 1;
                if current.matched == framing.boundary.len() {
                    return (FramerState::boundary_complete(), Transition::Pending);
                }
            } else {
                // Restart without re-checking this byte against the first marker byte
                current.matched = 0;
            }
            (current, Transition::Pending)
        }
        ParserState::Headers => {
            current.buffer.push(byte);
            if current.buffer.ends_with(HEADER_TERMINATOR) {
                trace!(
                    "Part headers: {:?}",
                    String::from_utf8_lossy(&current.buffer).trim()
                );
                return (FramerState::enter(ParserState::JpegData), Transition::Pending);
            }
            if current.buffer == FINAL_SUFFIX {
                return (FramerState::default(), Transition::StreamEnded);
            }
            if current.buffer.len() > MAX_HEADER_BYTES {
                let len = current.buffer.len();
                return (
                    FramerState::default(),
                    Transition::Discarded {
                        state: ParserState::Headers,
                        len,
                    },
                );
            }
            (current, Transition::Pending)
        }
        ParserState::JpegData => {
            current.buffer.push(byte);
            if let Some(end) = framing.find_frame_end(&current.buffer) {
                let mut frame = std::mem::take(&mut current.buffer);
                frame.truncate(end);
                // The accepted boundary ends at this byte, so nothing is re-fed.
                // It also opens the next part: Boundary completes immediately.
                return (FramerState::boundary_complete(), Transition::Frame(frame));
            }
            if current.buffer.ends_with(&framing.final_boundary) {
                return (FramerState::default(), Transition::StreamEnded);
            }
            if current.buffer.len() > framing.max_frame_bytes {
                let len = current.buffer.len();
                return (
                    FramerState::default(),
                    Transition::Discarded {
                        state: ParserState::JpegData,
                        len,
                    },
                );
            }
            (current, Transition::Pending)
        }
    }
}

/// A byte range provisionally identified as one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFrame {
    pub sequence: u64,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    FrameExtracted(CandidateFrame),
    StreamEnded,
}

/// Drives [`advance`] over a chunked byte stream
#[derive(Debug)]
pub struct Framer {
    framing: Framing,
    state: FramerState,
    next_sequence: u64,
    ended: bool,
}

impl Framer {
    pub fn new(framing: Framing) -> Self {
        trace!(
            "MJPEG framer using boundary {:?}",
            String::from_utf8_lossy(framing.boundary())
        );
        Self {
            framing,
            state: FramerState::default(),
            next_sequence: 0,
            ended: false,
        }
    }

    /// Feed a chunk; chunk edges may fall anywhere in the stream
    ///
    /// Once [`FramerEvent::StreamEnded`] has been returned, further input is
    /// ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }

        for &byte in chunk {
            let (next, transition) = advance(&self.framing, std::mem::take(&mut self.state), byte);
            self.state = next;

            match transition {
                Transition::Pending => {}
                Transition::Frame(bytes) => {
                    let sequence = self.next_sequence;
                    self.next_sequence += 1;
                    trace!("Frame {} extracted: {} bytes", sequence, bytes.len());
                    events.push(FramerEvent::FrameExtracted(CandidateFrame {
                        sequence,
                        bytes: Bytes::from(bytes),
                    }));
                }
                Transition::Discarded { state, len } => {
                    warn!(
                        "Discarded {} buffered bytes in {:?} state, resyncing on next boundary",
                        len, state
                    );
                }
                Transition::StreamEnded => {
                    self.ended = true;
                    events.push(FramerEvent::StreamEnded);
                    break;
                }
            }
        }

        events
    }

    pub fn state(&self) -> ParserState {
        self.state.state
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Frames emitted so far
    pub fn frames_extracted(&self) -> u64 {
        self.next_sequence
    }
}
