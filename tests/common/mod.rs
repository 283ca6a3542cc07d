//! Recording host doubles shared by the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use webcam_publisher::capture::TestPatternBackend;
use webcam_publisher::devices::DeviceOption;
use webcam_publisher::display::PreviewSurface;
use webcam_publisher::encode::{FrameMessage, MessageKind};
use webcam_publisher::host::{PanelHost, PublishSink, StateStore, VideoSourceEnumerator};
use webcam_publisher::{Config, PartialConfig, Result, WebcamError};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Advertise(String, MessageKind),
    Unadvertise(String),
    Publish(String, MessageKind),
}

#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<SinkCall>>>);

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.0.lock().unwrap().clone()
    }

    /// Advertise and unadvertise calls only
    pub fn lifecycle(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, SinkCall::Publish(..)))
            .collect()
    }

    pub fn published(&self) -> Vec<(String, MessageKind)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Publish(topic, kind) => Some((topic, kind)),
                _ => None,
            })
            .collect()
    }
}

impl PublishSink for RecordingSink {
    fn advertise(&mut self, topic: &str, kind: MessageKind) {
        self.0.lock().unwrap().push(SinkCall::Advertise(topic.to_string(), kind));
    }

    fn unadvertise(&mut self, topic: &str) {
        self.0.lock().unwrap().push(SinkCall::Unadvertise(topic.to_string()));
    }

    fn publish(&mut self, topic: &str, message: &FrameMessage) {
        assert!(message.is_valid(), "empty message reached the sink");
        self.0
            .lock()
            .unwrap()
            .push(SinkCall::Publish(topic.to_string(), message.kind()));
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    initial: PartialConfig,
    broken: bool,
    saved: Arc<Mutex<Vec<Config>>>,
}

impl MemoryStore {
    pub fn with_state(initial: PartialConfig) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<Config> {
        self.saved.lock().unwrap().clone()
    }
}

impl StateStore for MemoryStore {
    fn load_initial_state(&self) -> Result<PartialConfig> {
        if self.broken {
            return Err(WebcamError::Io(std::io::Error::other("corrupt state")));
        }
        Ok(self.initial.clone())
    }

    fn persist_state(&mut self, config: &Config) -> Result<()> {
        self.saved.lock().unwrap().push(config.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPreview(Arc<Mutex<Vec<(u32, u32)>>>);

impl RecordingPreview {
    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.0.lock().unwrap().clone()
    }
}

impl PreviewSurface for RecordingPreview {
    fn resize(&mut self, width: u32, height: u32) {
        self.0.lock().unwrap().push((width, height));
    }
}

pub struct FailingSources;

#[async_trait]
impl VideoSourceEnumerator for FailingSources {
    async fn enumerate_video_sources(&self) -> Result<Vec<DeviceOption>> {
        Err(WebcamError::Enumeration("permission denied".into()))
    }
}

pub struct Harness {
    pub sink: RecordingSink,
    pub store: MemoryStore,
    pub preview: RecordingPreview,
}

/// Host wired to `backend` plus recording doubles
pub fn host(backend: TestPatternBackend, store: MemoryStore) -> (PanelHost, Harness) {
    let backend = Arc::new(backend);
    let sources: Arc<dyn VideoSourceEnumerator> = backend.clone();
    host_with_sources(sources, backend, store)
}

pub fn host_with_sources(
    sources: Arc<dyn VideoSourceEnumerator>,
    backend: Arc<TestPatternBackend>,
    store: MemoryStore,
) -> (PanelHost, Harness) {
    let harness = Harness {
        sink: RecordingSink::default(),
        store,
        preview: RecordingPreview::default(),
    };
    let host = PanelHost {
        sources,
        capture: backend,
        sink: Box::new(harness.sink.clone()),
        store: Box::new(harness.store.clone()),
        preview: Box::new(harness.preview.clone()),
    };
    (host, harness)
}

/// Small publishing state so encoding stays cheap
pub fn publishing_state(topic: &str) -> PartialConfig {
    PartialConfig {
        width: Some(32),
        height: Some(24),
        publish_mode: Some(true),
        pub_topic: Some(topic.to_string()),
        ..PartialConfig::default()
    }
}

/// Let paused time run forward; every task runs to idle first.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
