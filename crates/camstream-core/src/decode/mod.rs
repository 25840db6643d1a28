//! Frame decoding
//!
//! The codec sits behind [`FrameDecoder`] so the pipeline can be exercised
//! without real JPEG data. Decoding happens on the worker threads of a
//! [`DecodePool`], never on the stream thread.

mod pool;

pub use pool::{DecodePool, SubmitError};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use std::time::Instant;
use thiserror::Error;
use tracing::trace;

use crate::mjpeg::CandidateFrame;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("corrupt frame: {0}")]
    Corrupt(String),
}

/// Turns compressed frame bytes into pixels
pub trait FrameDecoder: Send + Sync {
    /// Decode `bytes`, shrinking each dimension by `sample_size` (1 = full size)
    fn decode(&self, bytes: &[u8], sample_size: u32) -> Result<DynamicImage, DecodeError>;
}

/// JPEG decoder backed by the `image` crate
///
/// Full-resolution decodes are capped at `max_width` x `max_height`; anything
/// larger only decodes on the downsampled attempt.
#[derive(Debug, Clone)]
pub struct JpegFrameDecoder {
    max_width: u32,
    max_height: u32,
}

impl JpegFrameDecoder {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }
}

impl FrameDecoder for JpegFrameDecoder {
    fn decode(&self, bytes: &[u8], sample_size: u32) -> Result<DynamicImage, DecodeError> {
        let mut reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Jpeg);
        if sample_size <= 1 {
            let mut limits = Limits::default();
            limits.max_image_width = Some(self.max_width);
            limits.max_image_height = Some(self.max_height);
            reader.limits(limits);
        }

        let image = reader.decode()?;
        if sample_size <= 1 {
            return Ok(image);
        }

        let width = (image.width() / sample_size).max(1);
        let height = (image.height() / sample_size).max(1);
        Ok(image.resize_exact(width, height, FilterType::Triangle))
    }
}

/// A decoded frame handed to the listener
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub sequence: u64,
    pub image: DynamicImage,
    /// 1 for full resolution, otherwise the downsampling divisor used
    pub sample_size: u32,
    /// Size of the compressed frame
    pub encoded_len: usize,
}

impl DecodedFrame {
    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            sequence: self.sequence,
            width: self.image.width(),
            height: self.image.height(),
            encoded_len: self.encoded_len,
            sample_size: self.sample_size,
            decoded_at: Instant::now(),
        }
    }
}

/// Summary of the most recently decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub encoded_len: usize,
    pub sample_size: u32,
    pub decoded_at: Instant,
}

/// Both decode attempts failed
#[derive(Debug, Error)]
#[error("frame {sequence} failed to decode: {full} (downsampled: {downsampled})")]
pub struct DecodeFailure {
    pub sequence: u64,
    pub full: DecodeError,
    pub downsampled: DecodeError,
}

/// Decode at full resolution, retrying once downsampled by `downsample_factor`
pub fn decode_with_fallback(
    decoder: &dyn FrameDecoder,
    frame: &CandidateFrame,
    downsample_factor: u32,
) -> Result<DecodedFrame, DecodeFailure> {
    let full = match decoder.decode(&frame.bytes, 1) {
        Ok(image) => {
            return Ok(DecodedFrame {
                sequence: frame.sequence,
                image,
                sample_size: 1,
                encoded_len: frame.bytes.len(),
            })
        }
        Err(e) => e,
    };

    trace!(
        "Frame {} full decode failed ({}), retrying at 1/{}",
        frame.sequence,
        full,
        downsample_factor
    );
    match decoder.decode(&frame.bytes, downsample_factor) {
        Ok(image) => Ok(DecodedFrame {
            sequence: frame.sequence,
            image,
            sample_size: downsample_factor,
            encoded_len: frame.bytes.len(),
        }),
        Err(downsampled) => Err(DecodeFailure {
            sequence: frame.sequence,
            full,
            downsampled,
        }),
    }
}

/// Rescale a frame to the input size of a model
pub fn prepare_for_inference(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, FilterType::Triangle)
}

/// Space-separated hex of the first `count` bytes
pub(crate) fn hex_prefix(bytes: &[u8], count: usize) -> String {
    bytes
        .iter()
        .take(count)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;

    pub(crate) fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        out
    }

    fn candidate(sequence: u64, bytes: Vec<u8>) -> CandidateFrame {
        CandidateFrame {
            sequence,
            bytes: Bytes::from(bytes),
        }
    }

    /// Fails every full-resolution decode, records sample sizes
    struct FullFails {
        calls: Mutex<Vec<u32>>,
    }

    impl FrameDecoder for FullFails {
        fn decode(&self, _bytes: &[u8], sample_size: u32) -> Result<DynamicImage, DecodeError> {
            self.calls.lock().push(sample_size);
            if sample_size == 1 {
                Err(DecodeError::Corrupt("out of memory".to_string()))
            } else {
                Ok(DynamicImage::new_rgb8(8, 6))
            }
        }
    }

    #[test]
    fn test_decodes_real_jpeg_at_full_resolution() {
        let decoder = JpegFrameDecoder::new(1600, 1200);
        let frame = candidate(3, encode_jpeg(64, 48));

        let decoded = decode_with_fallback(&decoder, &frame, 2).unwrap();
        assert_eq!(decoded.sequence, 3);
        assert_eq!(decoded.sample_size, 1);
        assert_eq!((decoded.image.width(), decoded.image.height()), (64, 48));
        assert_eq!(decoded.encoded_len, frame.bytes.len());
    }

    #[test]
    fn test_oversized_jpeg_decodes_downsampled() {
        let decoder = JpegFrameDecoder::new(32, 32);
        let frame = candidate(9, encode_jpeg(64, 48));

        let decoded = decode_with_fallback(&decoder, &frame, 2).unwrap();
        assert_eq!(decoded.sequence, 9);
        assert_eq!(decoded.sample_size, 2);
        assert_eq!((decoded.image.width(), decoded.image.height()), (32, 24));
    }

    #[test]
    fn test_fallback_tries_full_then_downsampled() {
        let decoder = FullFails {
            calls: Mutex::new(Vec::new()),
        };
        let decoded = decode_with_fallback(&decoder, &candidate(4, vec![0xFF, 0xD8]), 4).unwrap();

        assert_eq!(*decoder.calls.lock(), vec![1, 4]);
        assert_eq!(decoded.sequence, 4);
        assert_eq!(decoded.sample_size, 4);
    }

    #[test]
    fn test_garbage_fails_both_attempts() {
        let decoder = JpegFrameDecoder::new(1600, 1200);
        let mut bytes = vec![0xFF, 0xD8];
        bytes.extend_from_slice(&[0x42; 200]);
        bytes.extend_from_slice(&[0xFF, 0xD9]);

        let failure = decode_with_fallback(&decoder, &candidate(7, bytes), 2).unwrap_err();
        assert_eq!(failure.sequence, 7);
        assert!(failure.to_string().starts_with("frame 7 failed to decode"));
    }

    #[test]
    fn test_prepare_for_inference() {
        let image = DynamicImage::new_rgb8(320, 240);
        let prepared = prepare_for_inference(&image, 224, 224);
        assert_eq!((prepared.width(), prepared.height()), (224, 224));
    }

    #[test]
    fn test_hex_prefix() {
        assert_eq!(hex_prefix(&[0xFF, 0xD8, 0x00, 0x10], 3), "FF D8 00");
        assert_eq!(hex_prefix(&[0x01], 20), "01");
    }
}
