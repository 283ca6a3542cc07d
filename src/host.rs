//! Capabilities the host application provides to the panel
//!
//! The panel never touches devices, transports or storage directly; it only
//! calls through these traits. Test doubles and the binary's concrete host
//! both implement them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capture::{Raster, StreamRequest};
use crate::devices::DeviceOption;
use crate::display::PreviewSurface;
use crate::encode::{FrameMessage, MessageKind};
use crate::error::Result;
use crate::{Config, PartialConfig};

/// Lists the video sources that can be selected
#[async_trait]
pub trait VideoSourceEnumerator: Send + Sync {
    async fn enumerate_video_sources(&self) -> Result<Vec<DeviceOption>>;
}

/// Opens capture streams
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Fails with [`crate::WebcamError::DeviceUnavailable`] when the id is
    /// invalid or access is denied.
    async fn open_capture_stream(&self, request: &StreamRequest) -> Result<Box<dyn CaptureStream>>;

    /// Whether opening `next` requires the stream bound with `bound` to be
    /// closed first, because both address a device that admits only one
    /// open stream.
    fn conflicts_with_bound(&self, bound: &StreamRequest, next: &StreamRequest) -> bool {
        let _ = (bound, next);
        false
    }
}

/// An open, live capture stream. Dropping it closes the stream.
pub trait CaptureStream: Send {
    /// Geometry the device actually delivers; may differ from the request.
    /// `(0, 0)` until the first frame arrives.
    fn geometry(&self) -> (u32, u32);

    /// Draw the latest frame into `raster`.
    fn snapshot(&mut self, raster: &mut Raster) -> Result<()>;
}

/// Outbound side of the host: channel registration and best-effort sends
pub trait PublishSink: Send {
    fn advertise(&mut self, topic: &str, kind: MessageKind);
    fn unadvertise(&mut self, topic: &str);
    fn publish(&mut self, topic: &str, message: &FrameMessage);
}

/// Session persistence for the panel configuration
pub trait StateStore: Send {
    fn load_initial_state(&self) -> Result<PartialConfig>;
    fn persist_state(&mut self, config: &Config) -> Result<()>;
}

/// Everything a panel needs from its host
pub struct PanelHost {
    pub sources: Arc<dyn VideoSourceEnumerator>,
    pub capture: Arc<dyn CaptureBackend>,
    pub sink: Box<dyn PublishSink>,
    pub store: Box<dyn StateStore>,
    pub preview: Box<dyn PreviewSurface>,
}
