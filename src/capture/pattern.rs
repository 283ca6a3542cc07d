//! Synthetic capture source
//!
//! Produces a moving gradient at the requested geometry, bounded by what a
//! real UHD camera could deliver. Used when no camera is present and as the
//! capture backend in tests, where it can also simulate a device that
//! substitutes its own geometry, a device that is slow to open, a device that
//! needs a moment before delivering frames, ids that are unavailable, and
//! devices that admit only one open stream at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::devices::DeviceOption;
use crate::error::{Result, WebcamError};
use crate::host::{CaptureBackend, CaptureStream, VideoSourceEnumerator};

use super::frame::{Raster, Timestamp};
use super::sampler::StreamRequest;

pub const PATTERN_DEVICE_ID: &str = "pattern:0";
/// Largest geometry the pattern delivers; bigger requests get this instead
pub const MAX_PATTERN_WIDTH: u32 = 3840;
pub const MAX_PATTERN_HEIGHT: u32 = 2160;

type HeldDevices = Arc<Mutex<HashSet<String>>>;

fn lock(held: &HeldDevices) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct TestPatternBackend {
    native_geometry: Option<(u32, u32)>,
    open_delay: Option<Duration>,
    warmup: Option<Duration>,
    unavailable: HashSet<String>,
    exclusive: bool,
    held: HeldDevices,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver this geometry whatever the request asks for
    pub fn with_native_geometry(mut self, width: u32, height: u32) -> Self {
        self.native_geometry = Some((width, height));
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Report zero geometry for this long after opening
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn with_unavailable(mut self, device_id: impl Into<String>) -> Self {
        self.unavailable.insert(device_id.into());
        self
    }

    /// Refuse a second open of a device id while a stream on it is alive,
    /// the way a V4L2 node with mapped buffers does
    pub fn with_exclusive_access(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Device ids that currently have an open stream
    pub fn held_devices(&self) -> Vec<String> {
        lock(&self.held).iter().cloned().collect()
    }
}

#[async_trait]
impl VideoSourceEnumerator for TestPatternBackend {
    async fn enumerate_video_sources(&self) -> Result<Vec<DeviceOption>> {
        Ok(vec![DeviceOption::new("Test pattern", PATTERN_DEVICE_ID)])
    }
}

#[async_trait]
impl CaptureBackend for TestPatternBackend {
    #[instrument(skip(self))]
    async fn open_capture_stream(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.contains(&request.device_id) {
            return Err(WebcamError::device_unavailable(&request.device_id, "no such device"));
        }
        let held = if self.exclusive {
            if !lock(&self.held).insert(request.device_id.clone()) {
                return Err(WebcamError::device_unavailable(&request.device_id, "device busy"));
            }
            Some(Arc::clone(&self.held))
        } else {
            None
        };

        let (width, height) = self.native_geometry.unwrap_or((
            request.width.min(MAX_PATTERN_WIDTH),
            request.height.min(MAX_PATTERN_HEIGHT),
        ));
        if (width, height) != (request.width, request.height) {
            debug!("Pattern substituted {}x{} for requested {}x{}", width, height, request.width, request.height);
        }
        Ok(Box::new(PatternStream {
            width,
            height,
            ready_at: Instant::now() + self.warmup.unwrap_or_default(),
            frame: 0,
            device_id: request.device_id.clone(),
            held,
        }))
    }

    fn conflicts_with_bound(&self, bound: &StreamRequest, next: &StreamRequest) -> bool {
        self.exclusive && bound.device_id == next.device_id
    }
}

struct PatternStream {
    width: u32,
    height: u32,
    ready_at: Instant,
    frame: u32,
    device_id: String,
    held: Option<HeldDevices>,
}

impl CaptureStream for PatternStream {
    fn geometry(&self) -> (u32, u32) {
        if Instant::now() < self.ready_at {
            (0, 0)
        } else {
            (self.width, self.height)
        }
    }

    fn snapshot(&mut self, raster: &mut Raster) -> Result<()> {
        raster.resize(self.width, self.height);
        let shift = self.frame as u8;
        let width = self.width as usize;
        for (i, px) in raster.data_mut().chunks_exact_mut(4).enumerate() {
            let (x, y) = (i % width, i / width);
            px.copy_from_slice(&[(x as u8).wrapping_add(shift), y as u8, shift, 255]);
        }
        raster.set_captured_at(Timestamp::now());
        self.frame = self.frame.wrapping_add(1);
        Ok(())
    }
}

impl Drop for PatternStream {
    fn drop(&mut self) {
        if let Some(held) = &self.held {
            lock(held).remove(&self.device_id);
        }
    }
}
