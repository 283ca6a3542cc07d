//! Raster → outbound message encoding
//!
//! The active mode comes from `Config::compressed` at the moment of the
//! tick; nothing is re-encoded retroactively when the mode flips.

pub mod message;

use std::io::Cursor;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::{debug, warn};

use crate::capture::Raster;
use crate::error::Result;
use crate::Config;

pub use message::{CompressedFrameMessage, FrameMessage, MessageKind, OutboundFrame, RawFrameMessage};

pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Turns sampled rasters into publishable messages
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    jpeg_quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder {
    /// `jpeg_quality` is clamped to 1..=100.
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Encode one raster in the mode selected by `config`.
    ///
    /// Returns `None` instead of an empty or inconsistent message.
    pub fn encode(&self, raster: &Raster, config: &Config) -> Option<FrameMessage> {
        if raster.is_empty() {
            return None;
        }

        let start = Instant::now();
        let message = if config.compressed {
            match self.encode_jpeg(raster) {
                Ok(data) => CompressedFrameMessage::new(
                    raster.captured_at(),
                    config.publish_frame_id.clone(),
                    data,
                )
                .map(FrameMessage::Compressed),
                Err(e) => {
                    warn!("JPEG encoding failed: {}", e);
                    None
                }
            }
        } else {
            RawFrameMessage::new(
                raster.captured_at(),
                config.publish_frame_id.clone(),
                raster.width(),
                raster.height(),
                raster.stride(),
                Bytes::copy_from_slice(raster.data()),
            )
            .map(FrameMessage::Raw)
        };

        if message.is_none() {
            debug!("Encoder produced no message for {}x{} raster", raster.width(), raster.height());
        }
        metrics::histogram!("webcam_encode_time_us").record(start.elapsed().as_micros() as f64);
        message
    }

    /// JPEG has no alpha channel, so pixels are flattened to RGB first.
    fn encode_jpeg(&self, raster: &Raster) -> Result<Bytes> {
        let rgb: Vec<u8> = raster
            .data()
            .chunks_exact(Raster::BYTES_PER_PIXEL)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality).write_image(
            &rgb,
            raster.width(),
            raster.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(Bytes::from(out.into_inner()))
    }
}
