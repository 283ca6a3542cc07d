use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Device frame as dequeued from a capture stream, before decoding
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the frame was dequeued
    pub timestamp: Instant,

    /// Wall-clock time of the dequeue, carried into published messages
    pub captured_at: Timestamp,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of `data`
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Device pixel formats the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Yuyv4,
    Mjpeg,
}

/// Wall-clock timestamp split into seconds and nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u32,
    pub nsec: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            sec: since_epoch.as_secs().min(u32::MAX as u64) as u32,
            nsec: since_epoch.subsec_nanos(),
        }
    }
}

/// Reusable RGBA pixel buffer holding one sampled frame.
///
/// The buffer keeps its allocation across ticks and is only reshaped when the
/// stream reports a different geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
    captured_at: Timestamp,
}

impl Raster {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a raster from packed RGBA bytes; `None` if the length is off.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, captured_at: Timestamp) -> Option<Self> {
        if data.len() != Self::len_for(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
            captured_at,
        })
    }

    fn len_for(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::BYTES_PER_PIXEL
    }

    /// Reshape to `width` x `height`, reusing the allocation.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.resize(Self::len_for(width, height), 0);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes
    pub fn stride(&self) -> u32 {
        self.width * Self::BYTES_PER_PIXEL as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    pub fn set_captured_at(&mut self, captured_at: Timestamp) {
        self.captured_at = captured_at;
    }
}
