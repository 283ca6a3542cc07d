//! V4L2 capture backend
//!
//! Each open stream gets a dedicated reader thread that keeps dequeuing
//! frames from a memory-mapped stream and parks the newest one in a lock-free
//! slot; snapshots decode whatever is in the slot at tick time. Dropping a
//! stream joins its reader thread, so the device is free again once the drop
//! returns.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::capture::decoder;
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Raster, Timestamp};
use crate::capture::sampler::StreamRequest;
use crate::devices::DeviceOption;
use crate::error::{Result, WebcamError};
use crate::host::{CaptureBackend, CaptureStream, VideoSourceEnumerator};

/// Highest /dev/videoN index probed during enumeration
const MAX_DEVICE_INDEX: u32 = 16;
const BUFFER_COUNT: u32 = 4;
/// Dequeue timeout so the reader thread notices a stop request
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Capture backend over /dev/video* nodes
#[derive(Debug, Clone, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

/// Probe /dev/video* for nodes that can capture video.
pub fn list_capture_devices() -> Vec<DeviceOption> {
    let mut found = Vec::new();

    for i in 0..MAX_DEVICE_INDEX {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                // Metadata nodes share the card name but cannot capture
                if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                    info!("Found capture device: {} - {}", path, caps.card);
                    found.push(DeviceOption::new(caps.card, path));
                }
            }
        }
    }

    found
}

#[async_trait]
impl VideoSourceEnumerator for V4l2Backend {
    async fn enumerate_video_sources(&self) -> Result<Vec<DeviceOption>> {
        tokio::task::spawn_blocking(list_capture_devices)
            .await
            .map_err(|e| WebcamError::Enumeration(e.to_string()))
    }
}

#[async_trait]
impl CaptureBackend for V4l2Backend {
    #[instrument(skip(self))]
    async fn open_capture_stream(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>> {
        let request = request.clone();
        let device_label = request.device_id.clone();
        let stream = tokio::task::spawn_blocking(move || V4l2Stream::open(request))
            .await
            .map_err(|e| WebcamError::device_unavailable(device_label, e))??;
        Ok(Box::new(stream))
    }

    /// Capture nodes admit a single streaming owner. The default source may
    /// be any node, so it conflicts with everything.
    fn conflicts_with_bound(&self, bound: &StreamRequest, next: &StreamRequest) -> bool {
        same_device(&bound.device_id, &next.device_id)
    }
}

fn same_device(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() || a == b {
        return true;
    }
    // /dev/v4l/by-id links resolve to the same /dev/videoN
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn resolve_device_path(device_id: &str) -> Result<String> {
    if !device_id.is_empty() {
        return Ok(device_id.to_string());
    }
    list_capture_devices()
        .into_iter()
        .next()
        .map(|option| option.id)
        .ok_or_else(|| WebcamError::device_unavailable("default", "no capture device found"))
}

/// Prefer MJPEG, fall back to YUYV.
fn pick_fourcc(device: &Device) -> Result<(FourCC, PixelFormat)> {
    let formats = device
        .enum_formats()
        .map_err(|e| WebcamError::device_unavailable("format", e))?;
    let mjpg = FourCC::new(b"MJPG");
    let yuyv = FourCC::new(b"YUYV");

    if formats.iter().any(|f| f.fourcc == mjpg) {
        Ok((mjpg, PixelFormat::Mjpeg))
    } else if formats.iter().any(|f| f.fourcc == yuyv) {
        Ok((yuyv, PixelFormat::Yuyv4))
    } else {
        Err(WebcamError::device_unavailable("format", "neither MJPG nor YUYV supported"))
    }
}

/// An open V4L2 stream with its reader thread
pub struct V4l2Stream {
    latest: Arc<ArcSwapOption<Frame>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl V4l2Stream {
    fn open(request: StreamRequest) -> Result<Self> {
        let path = resolve_device_path(&request.device_id)?;
        let unavailable = |e: std::io::Error| WebcamError::device_unavailable(path.clone(), e);

        let device = Device::with_path(&path).map_err(unavailable)?;
        let caps = device.query_caps().map_err(unavailable)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(WebcamError::device_unavailable(path.clone(), "device doesn't support video capture"));
        }

        let (fourcc, format) = pick_fourcc(&device)?;
        let wanted = Format::new(request.width, request.height, fourcc);
        // The driver answers with the nearest geometry it supports
        let actual = device.set_format(&wanted).map_err(unavailable)?;
        if actual.width != request.width || actual.height != request.height {
            info!(
                "Device substituted {}x{} for requested {}x{}",
                actual.width, actual.height, request.width, request.height
            );
        }

        let fps = request.frame_rate.round().max(1.0) as u32;
        if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
            warn!("Could not set frame rate {}: {}", fps, e);
        }

        let latest = Arc::new(ArcSwapOption::empty());
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = flume::bounded(1);

        let slot = Arc::clone(&latest);
        let stop_flag = Arc::clone(&stop);
        let meta = FrameMetadata {
            sequence: 0,
            width: actual.width,
            height: actual.height,
            stride: actual.stride,
            format,
            device_timestamp: None,
        };
        let reader = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || reader_loop(device, meta, slot, stop_flag, ready_tx))
            .map_err(unavailable)?;

        let stream = Self {
            latest,
            stop,
            reader: Some(reader),
        };
        // On failure the stream drops here and joins the exited thread
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => Err(unavailable(e)),
            Err(_) => Err(WebcamError::device_unavailable(path.clone(), "capture thread exited")),
        }
    }
}

fn reader_loop(
    device: Device,
    template: FrameMetadata,
    slot: Arc<ArcSwapOption<Frame>>,
    stop: Arc<AtomicBool>,
    ready: flume::Sender<std::io::Result<()>>,
) {
    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);
    let _ = ready.send(Ok(()));
    info!("Capture stream started with {} buffers", BUFFER_COUNT);

    let mut sequence = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Capture error: {}", e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        if buf.is_empty() {
            continue;
        }

        sequence += 1;
        let used = (meta.bytesused as usize).min(buf.len()).max(1);
        let frame = Frame {
            data: Bytes::copy_from_slice(&buf[..used]),
            meta: Arc::new(FrameMetadata {
                sequence,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
                ..template.clone()
            }),
            timestamp: Instant::now(),
            captured_at: Timestamp::now(),
        };
        slot.store(Some(Arc::new(frame)));
    }

    debug!("Capture thread stopped after {} frames", sequence);
}

impl CaptureStream for V4l2Stream {
    fn geometry(&self) -> (u32, u32) {
        match self.latest.load().as_ref() {
            Some(frame) => (frame.meta.width, frame.meta.height),
            None => (0, 0),
        }
    }

    fn snapshot(&mut self, raster: &mut Raster) -> Result<()> {
        let frame = self
            .latest
            .load_full()
            .ok_or_else(|| WebcamError::Decode("no frame captured yet".into()))?;
        decoder::decode_frame(&frame, raster)
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}
