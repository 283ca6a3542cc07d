//! Webcam publisher: samples a camera, encodes frames and publishes them

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use webcam_publisher::app_settings::{AppSettings, BackendKind};
use webcam_publisher::capture::TestPatternBackend;
use webcam_publisher::display::{LogPreview, RenderDone, RenderState};
use webcam_publisher::encode::{FrameMessage, MessageKind};
use webcam_publisher::host::{CaptureBackend, PanelHost, PublishSink, VideoSourceEnumerator};
use webcam_publisher::store::FileStateStore;
use webcam_publisher::{spawn_panel, PanelOptions};

/// Publish sink that reports channel activity through tracing
#[derive(Default)]
struct LogSink {
    published: u64,
}

impl PublishSink for LogSink {
    fn advertise(&mut self, topic: &str, kind: MessageKind) {
        info!(topic, schema = kind.schema_name(), "Channel advertised");
    }

    fn unadvertise(&mut self, topic: &str) {
        info!(topic, published = self.published, "Channel withdrawn");
    }

    fn publish(&mut self, topic: &str, message: &FrameMessage) {
        self.published += 1;
        debug!(
            topic,
            bytes = message.data().len(),
            seq = self.published,
            "Frame published"
        );
    }
}

type Backends = (Arc<dyn VideoSourceEnumerator>, Arc<dyn CaptureBackend>);

fn pattern_backends() -> Backends {
    let backend = Arc::new(TestPatternBackend::new());
    let sources: Arc<dyn VideoSourceEnumerator> = backend.clone();
    (sources, backend)
}

fn select_backends(kind: BackendKind) -> Backends {
    match kind {
        #[cfg(feature = "v4l2-backend")]
        BackendKind::V4l2 => {
            let backend = Arc::new(webcam_publisher::capture::V4l2Backend::new());
            let sources: Arc<dyn VideoSourceEnumerator> = backend.clone();
            (sources, backend)
        }
        #[cfg(not(feature = "v4l2-backend"))]
        BackendKind::V4l2 => {
            warn!("Built without V4L2 support, falling back to the test pattern");
            pattern_backends()
        }
        BackendKind::Pattern => pattern_backends(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let settings_file = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = AppSettings::load(settings_file.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Webcam publisher launching...");
    debug!(?settings, "Application settings");

    let render_period = Duration::try_from_secs_f64(1.0 / settings.render_rate)
        .map_err(|_| eyre!("render_rate must be positive, got {}", settings.render_rate))?;

    let (sources, capture) = select_backends(settings.backend);
    let host = PanelHost {
        sources,
        capture,
        sink: Box::new(LogSink::default()),
        store: Box::new(FileStateStore::new(&settings.state_file)),
        preview: Box::new(LogPreview),
    };
    let (panel, task) = spawn_panel(
        host,
        PanelOptions {
            jpeg_quality: settings.jpeg_quality,
        },
    );

    // Host render loop: one request in flight at a time
    let mut interval = tokio::time::interval(render_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
            _ = interval.tick() => {
                let (tx, rx) = oneshot::channel();
                panel.render(
                    RenderState { frame },
                    RenderDone::new(move || {
                        let _ = tx.send(());
                    }),
                );
                let _ = rx.await;
                frame += 1;
            }
        }
    }

    info!("Shutting down after {} renders", frame);
    panel.teardown().await;
    task.await?;

    info!("Webcam publisher stopped");
    Ok(())
}
