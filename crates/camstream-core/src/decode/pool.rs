//! Fixed-size decode worker pool
//!
//! Frames wait in a bounded queue; when it is full the frame is refused rather
//! than stalling the stream thread. Each job carries its own completion
//! callback, run on the worker thread once both decode attempts are done.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{decode_with_fallback, DecodeError, DecodeFailure, DecodedFrame, FrameDecoder};
use crate::mjpeg::CandidateFrame;

type DecodeCallback = Box<dyn FnOnce(Result<DecodedFrame, DecodeFailure>) + Send>;

struct DecodeJob {
    frame: CandidateFrame,
    done: DecodeCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("decode queue is full")]
    QueueFull,

    #[error("decode pool is shut down")]
    Closed,
}

pub struct DecodePool {
    tx: Option<Sender<DecodeJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawn `workers` decode threads sharing a queue of `queue` frames
    pub fn new(
        workers: usize,
        queue: usize,
        decoder: Arc<dyn FrameDecoder>,
        downsample_factor: u32,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<DecodeJob>(queue);

        let mut pool = Self {
            tx: Some(tx),
            workers: Vec::with_capacity(workers),
        };
        for i in 0..workers {
            let rx = rx.clone();
            let decoder = Arc::clone(&decoder);
            let handle = std::thread::Builder::new()
                .name(format!("mjpeg-decode-{}", i))
                .spawn(move || run_worker(i, rx, decoder.as_ref(), downsample_factor))?;
            pool.workers.push(handle);
        }
        debug!("Decode pool started: {} workers, queue {}", workers, queue);
        Ok(pool)
    }

    /// Queue a frame; `done` receives the decode result on a worker thread
    pub fn submit(
        &self,
        frame: CandidateFrame,
        done: impl FnOnce(Result<DecodedFrame, DecodeFailure>) + Send + 'static,
    ) -> Result<(), SubmitError> {
        let tx = self.tx.as_ref().ok_or(SubmitError::Closed)?;
        let job = DecodeJob {
            frame,
            done: Box::new(done),
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }
}

fn run_worker(
    index: usize,
    rx: Receiver<DecodeJob>,
    decoder: &dyn FrameDecoder,
    downsample_factor: u32,
) {
    for job in rx.iter() {
        let sequence = job.frame.sequence;
        let result = catch_unwind(AssertUnwindSafe(|| {
            decode_with_fallback(decoder, &job.frame, downsample_factor)
        }))
        .unwrap_or_else(|_| {
            error!("Decoder panicked on frame {}", sequence);
            Err(DecodeFailure {
                sequence,
                full: DecodeError::Corrupt("decoder panicked".to_string()),
                downsampled: DecodeError::Corrupt("decoder panicked".to_string()),
            })
        });
        (job.done)(result);
    }
    debug!("Decode worker {} exiting", index);
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        // Closing the queue lets workers drain and exit
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Decode worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crossbeam::channel::unbounded;
    use image::DynamicImage;
    use std::time::Duration;

    fn candidate(sequence: u64) -> CandidateFrame {
        CandidateFrame {
            sequence,
            bytes: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        }
    }

    struct Solid;

    impl FrameDecoder for Solid {
        fn decode(&self, _bytes: &[u8], _sample_size: u32) -> Result<DynamicImage, DecodeError> {
            Ok(DynamicImage::new_rgb8(4, 4))
        }
    }

    /// Signals when a decode starts, then blocks until released
    struct Gate {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl FrameDecoder for Gate {
        fn decode(&self, _bytes: &[u8], _sample_size: u32) -> Result<DynamicImage, DecodeError> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(DynamicImage::new_rgb8(2, 2))
        }
    }

    struct Panicking;

    impl FrameDecoder for Panicking {
        fn decode(&self, _bytes: &[u8], _sample_size: u32) -> Result<DynamicImage, DecodeError> {
            panic!("codec bug");
        }
    }

    #[test]
    fn test_decodes_submitted_frames() {
        let pool = DecodePool::new(2, 8, Arc::new(Solid), 2).unwrap();
        let (tx, rx) = unbounded();

        for sequence in 0..5 {
            let tx = tx.clone();
            pool.submit(candidate(sequence), move |result| {
                let _ = tx.send(result.map(|frame| frame.sequence).ok());
            })
            .unwrap();
        }

        let mut seen: Vec<u64> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_refuses_frames() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let decoder = Gate {
            started: started_tx,
            release: release_rx,
        };
        let pool = DecodePool::new(1, 1, Arc::new(decoder), 2).unwrap();
        let (done_tx, done_rx) = unbounded();

        let tx = done_tx.clone();
        pool.submit(candidate(0), move |_| {
            let _ = tx.send(0);
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker is busy: one frame fits in the queue, the next is refused
        let tx = done_tx.clone();
        pool.submit(candidate(1), move |_| {
            let _ = tx.send(1);
        })
        .unwrap();
        assert_eq!(
            pool.submit(candidate(2), |_| {}),
            Err(SubmitError::QueueFull)
        );

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let mut done = vec![
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        done.sort_unstable();
        assert_eq!(done, vec![0, 1]);
    }

    #[test]
    fn test_decoder_panic_reports_failure() {
        let pool = DecodePool::new(1, 2, Arc::new(Panicking), 2).unwrap();
        let (tx, rx) = unbounded();
        for sequence in 0..2 {
            let tx = tx.clone();
            pool.submit(candidate(sequence), move |result| {
                let _ = tx.send(result.err().map(|failure| failure.sequence));
            })
            .unwrap();
        }

        // The worker survives the first panic and handles the second frame
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(0));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(1));
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = DecodePool::new(2, 2, Arc::new(Solid), 2).unwrap();
        let (tx, rx) = unbounded();
        pool.submit(candidate(0), move |result| {
            let _ = tx.send(result.is_ok());
        })
        .unwrap();
        drop(pool);
        assert_eq!(rx.try_recv(), Ok(true));
    }
}
