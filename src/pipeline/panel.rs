//! The panel task
//!
//! All panel state lives in one task that drains a single event queue, so
//! edits, ticks, stream opens and renders never interleave mid-handler.
//! Observers read a lock-free snapshot that is swapped after every change.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::capture::CaptureSampler;
use crate::devices::{DeviceDirectory, DeviceOption};
use crate::display::{RenderDone, RenderHandshake, RenderState};
use crate::encode::{FrameEncoder, OutboundFrame, DEFAULT_JPEG_QUALITY};
use crate::host::{PanelHost, PublishSink, StateStore};
use crate::publish::{ChannelState, PublishManager, PublishOutcome};
use crate::settings::{apply_edit, build_settings_tree, SettingsEdit, SettingsTree};
use crate::{Config, PartialConfig};

use super::PanelEvent;

#[derive(Debug, Clone)]
pub struct PanelOptions {
    pub jpeg_quality: u8,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Point-in-time view of a running panel
#[derive(Debug, Clone)]
pub struct PanelSnapshot {
    pub config: Arc<Config>,
    pub devices: Vec<DeviceOption>,
    pub channel: ChannelState,
    /// Most recent encoded frame and the topic it was sampled for
    pub latest_frame: Option<OutboundFrame>,
    pub frames_published: u64,
    pub running: bool,
}

struct HandleInner {
    events: flume::Sender<PanelEvent>,
    snapshot: Arc<ArcSwap<PanelSnapshot>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // Last handle gone: nobody can tear the panel down anymore
        let _ = self.events.send(PanelEvent::Teardown { ack: None });
    }
}

/// Host-side handle to a running panel
#[derive(Clone)]
pub struct PanelHandle {
    inner: Arc<HandleInner>,
}

impl PanelHandle {
    /// Queue a settings edit. `false` once the panel has stopped.
    pub fn edit(&self, edit: SettingsEdit) -> bool {
        self.inner.events.send(PanelEvent::Edit(edit)).is_ok()
    }

    /// Queue a render request.
    ///
    /// A request the stopped panel can no longer take is acknowledged when
    /// it is dropped.
    pub fn render(&self, state: RenderState, done: RenderDone) {
        if self.inner.events.send(PanelEvent::Render { state, done }).is_err() {
            trace!("Panel stopped, render acknowledged without drawing");
        }
    }

    /// Stop the panel and wait until the stream is closed and the channel
    /// withdrawn.
    pub async fn teardown(&self) {
        let (ack, done) = oneshot::channel();
        if self
            .inner
            .events
            .send(PanelEvent::Teardown { ack: Some(ack) })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    pub fn snapshot(&self) -> Arc<PanelSnapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.inner.snapshot.load().config)
    }

    pub fn devices(&self) -> Vec<DeviceOption> {
        self.inner.snapshot.load().devices.clone()
    }

    /// Settings tree for the current configuration and device list
    pub fn settings_tree(&self) -> SettingsTree {
        let snapshot = self.inner.snapshot.load();
        build_settings_tree(&snapshot.config, &snapshot.devices)
    }
}

/// Start a panel on the current tokio runtime.
///
/// Loads the saved state, starts the one-shot device enumeration, opens the
/// initial stream and arms the sampling timer.
pub fn spawn_panel(host: PanelHost, options: PanelOptions) -> (PanelHandle, JoinHandle<()>) {
    let PanelHost {
        sources,
        capture,
        sink,
        store,
        preview,
    } = host;

    let saved = store.load_initial_state().unwrap_or_else(|e| {
        warn!("Could not load saved panel state, using defaults: {}", e);
        PartialConfig::default()
    });
    let config = Arc::new(Config::from_partial(saved));
    info!(?config, "Panel configuration loaded");

    let (events_tx, events_rx) = flume::unbounded();
    let snapshot = Arc::new(ArcSwap::from_pointee(PanelSnapshot {
        config: Arc::clone(&config),
        devices: Vec::new(),
        channel: ChannelState::Idle,
        latest_frame: None,
        frames_published: 0,
        running: true,
    }));

    let listing_tx = events_tx.clone();
    tokio::spawn(async move {
        let listing = sources.enumerate_video_sources().await;
        let _ = listing_tx.send_async(PanelEvent::DevicesListed(listing)).await;
    });

    let mut panel = Panel {
        config,
        devices: DeviceDirectory::new(),
        sampler: CaptureSampler::new(capture, events_tx.clone()),
        encoder: FrameEncoder::new(options.jpeg_quality),
        publisher: PublishManager::new(),
        handshake: RenderHandshake::new(preview),
        sink,
        store,
        latest: None,
        frames_published: 0,
        snapshot: Arc::clone(&snapshot),
    };
    panel.start();

    let task = tokio::spawn(panel.run(events_rx));
    let handle = PanelHandle {
        inner: Arc::new(HandleInner {
            events: events_tx,
            snapshot,
        }),
    };
    (handle, task)
}

enum Flow {
    Continue,
    Stop,
}

struct Panel {
    config: Arc<Config>,
    devices: DeviceDirectory,
    sampler: CaptureSampler,
    encoder: FrameEncoder,
    publisher: PublishManager,
    handshake: RenderHandshake,
    sink: Box<dyn PublishSink>,
    store: Box<dyn StateStore>,
    latest: Option<OutboundFrame>,
    frames_published: u64,
    snapshot: Arc<ArcSwap<PanelSnapshot>>,
}

impl Panel {
    fn start(&mut self) {
        self.sampler.start(&self.config);
        self.publisher.reconcile(&self.config, self.sink.as_mut());
        self.handshake.on_config_changed(&self.config);
        self.persist();
        self.publish_snapshot(true);
    }

    async fn run(mut self, events: flume::Receiver<PanelEvent>) {
        info!("Panel running");
        while let Ok(event) = events.recv_async().await {
            trace!(event = event.name(), "Panel event");
            if let Flow::Stop = self.handle(event) {
                break;
            }
        }

        // Queued events outlive the receiver while any handle is alive;
        // dropping them here releases their render acknowledgments.
        let leftover = events.drain().count();
        drop(events);
        if leftover > 0 {
            debug!(leftover, "Discarded events queued behind teardown");
        }
        info!("Panel stopped");
    }

    fn handle(&mut self, event: PanelEvent) -> Flow {
        match event {
            PanelEvent::Edit(edit) => self.on_edit(&edit),
            PanelEvent::DevicesListed(listing) => {
                self.devices.load(listing);
                self.devices.check_selection(&self.config.device_id);
                self.publish_snapshot(true);
            }
            PanelEvent::StreamOpened { generation, result } => {
                self.sampler.on_stream_opened(generation, result);
            }
            PanelEvent::Tick { generation } => {
                if self.sampler.is_current_tick(generation) {
                    self.on_tick();
                } else {
                    trace!(generation, "Ignoring tick from a cancelled timer");
                }
            }
            PanelEvent::Render { state, done } => self.handshake.render(state, done),
            PanelEvent::Teardown { ack } => {
                self.teardown();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn on_edit(&mut self, edit: &SettingsEdit) {
        let next = apply_edit(&self.config, edit);
        if next == *self.config {
            debug!(path = ?edit.path, "Edit left the configuration unchanged");
            return;
        }

        let old = std::mem::replace(&mut self.config, Arc::new(next));
        if old.device_id != self.config.device_id {
            info!(device = %self.config.device_id, "Capture device selected");
            self.devices.check_selection(&self.config.device_id);
        }

        self.sampler.on_config_changed(&old, &self.config);
        self.publisher.reconcile(&self.config, self.sink.as_mut());
        self.handshake.on_config_changed(&self.config);
        self.persist();
        self.publish_snapshot(true);
    }

    fn on_tick(&mut self) {
        let Some(raster) = self.sampler.sample() else {
            return;
        };
        let Some(message) = self.encoder.encode(raster, &self.config) else {
            return;
        };

        let frame = OutboundFrame {
            topic: self.config.pub_topic.clone(),
            message,
        };
        if self.config.publish_mode {
            let outcome = self
                .publisher
                .publish(&self.config, &frame, self.sink.as_mut());
            if outcome == PublishOutcome::Published {
                self.frames_published += 1;
            }
        }
        self.latest = Some(frame);
        self.publish_snapshot(true);
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.persist_state(&self.config) {
            warn!("Failed to persist panel state: {}", e);
        }
    }

    fn teardown(&mut self) {
        info!("Tearing down panel");
        self.sampler.shutdown();
        self.publisher.teardown(self.sink.as_mut());
        self.publish_snapshot(false);
    }

    fn publish_snapshot(&self, running: bool) {
        self.snapshot.store(Arc::new(PanelSnapshot {
            config: Arc::clone(&self.config),
            devices: self.devices.options().to_vec(),
            channel: self.publisher.state().clone(),
            latest_frame: self.latest.clone(),
            frames_published: self.frames_published,
            running,
        }));
    }
}
