//! Render handshake with the host
//!
//! The host hands every render request a one-shot acknowledgment and will not
//! schedule the next render until it has been completed. Visual state is
//! applied first, then the acknowledgment is completed, exactly once.

use std::fmt;

use tracing::{debug, info, trace};

use crate::Config;

/// Host-provided render request details
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderState {
    /// Host render counter
    pub frame: u64,
}

/// One-shot render acknowledgment
///
/// `complete` consumes the value, so an acknowledgment cannot be delivered
/// twice. Dropping it without completing completes it, so a request that
/// never reaches the panel still releases the host.
pub struct RenderDone(Option<Box<dyn FnOnce() + Send>>);

impl RenderDone {
    pub fn new(done: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(done)))
    }

    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(done) = self.0.take() {
            done();
        }
    }
}

impl Drop for RenderDone {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for RenderDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderDone")
    }
}

/// Surface the preview is drawn on
pub trait PreviewSurface: Send {
    fn resize(&mut self, width: u32, height: u32);
}

/// Preview surface that only logs what it would do
#[derive(Debug, Default)]
pub struct LogPreview;

impl PreviewSurface for LogPreview {
    fn resize(&mut self, width: u32, height: u32) {
        info!("Preview resized to {}x{}", width, height);
    }
}

pub struct RenderHandshake {
    surface: Box<dyn PreviewSurface>,
    pending_size: Option<(u32, u32)>,
    applied_size: Option<(u32, u32)>,
    renders: u64,
}

impl RenderHandshake {
    pub fn new(surface: Box<dyn PreviewSurface>) -> Self {
        Self {
            surface,
            pending_size: None,
            applied_size: None,
            renders: 0,
        }
    }

    /// Queue the preview geometry derived from `config` for the next render.
    pub fn on_config_changed(&mut self, config: &Config) {
        let size = (config.width, config.height);
        if self.applied_size == Some(size) {
            self.pending_size = None;
        } else {
            self.pending_size = Some(size);
        }
    }

    /// Apply pending visual state, then acknowledge.
    pub fn render(&mut self, state: RenderState, done: RenderDone) {
        if let Some((width, height)) = self.pending_size.take() {
            debug!(frame = state.frame, "Applying preview size {}x{}", width, height);
            self.surface.resize(width, height);
            self.applied_size = Some((width, height));
        }
        self.renders += 1;
        trace!(frame = state.frame, "Render complete");
        done.complete();
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }
}
