/*!
Raw frame decoding.

A raw frame is `head_strip` envelope bytes, `width * height` little-endian
u16 samples in column-major order, then `tail_strip` envelope bytes. The
envelope carries nothing we use and is discarded.
*/

use crate::calibration::Calibration;
use crate::config::StreamConfig;
use crate::error::{Result, SharedError};
use crate::matrix::ImageMatrix;
use tracing::debug;

/// Result of decoding one raw frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub is_valid: bool,
    pub raw: Option<ImageMatrix<u16>>,
}

impl DecodedFrame {
    /// A frame that could not be decoded
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            raw: None,
        }
    }

    /// Convert the raw values to degrees Celsius
    pub fn temperatures(&self, calibration: &Calibration) -> Option<ImageMatrix<f32>> {
        self.raw.as_ref().map(|raw| calibration.apply(raw))
    }
}

/// Reinterpret `bytes` as little-endian u16 samples and lay them out as a
/// `height` x `width` image. Returns `None` when the length is wrong.
pub(crate) fn decode_image(bytes: &[u8], width: usize, height: usize) -> Option<ImageMatrix<u16>> {
    if bytes.len() != width * height * 2 {
        return None;
    }

    let samples: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    ImageMatrix::from_column_major(width, height, &samples).ok()
}

/// Serialise an image into little-endian column-major samples
pub(crate) fn encode_image(image: &ImageMatrix<u16>) -> Vec<u8> {
    image
        .to_column_major()
        .into_iter()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Decode one complete frame.
///
/// `frame` should be exactly `config.total_frame_size()` bytes; the stream
/// reassembler guarantees this. Any other length yields an invalid frame
/// rather than a panic.
pub fn decode_frame(frame: &[u8], config: &StreamConfig) -> DecodedFrame {
    if frame.len() != config.total_frame_size() {
        debug!(
            got = frame.len(),
            expected = config.total_frame_size(),
            "Frame has unexpected length"
        );
        return DecodedFrame::invalid();
    }

    let image_end = frame.len() - config.tail_strip_bytes();
    let image_bytes = &frame[config.head_strip_bytes()..image_end];

    match decode_image(image_bytes, config.width(), config.height()) {
        Some(raw) => DecodedFrame {
            is_valid: true,
            raw: Some(raw),
        },
        None => DecodedFrame::invalid(),
    }
}

/// Build a complete frame from an image, with zeroed envelope bytes.
///
/// This is the inverse of [`decode_frame`].
pub fn encode_frame(image: &ImageMatrix<u16>, config: &StreamConfig) -> Result<Vec<u8>> {
    if image.width() != config.width() || image.height() != config.height() {
        return Err(SharedError::invalid_frame(format!(
            "Image is {}x{}, stream expects {}x{}",
            image.width(),
            image.height(),
            config.width(),
            config.height()
        )));
    }

    let mut frame = Vec::with_capacity(config.total_frame_size());
    frame.resize(config.head_strip_bytes(), 0);
    frame.extend_from_slice(&encode_image(image));
    frame.resize(config.total_frame_size(), 0);

    Ok(frame)
}
