//! Fixed-rate sampling of the bound capture stream
//!
//! The sampler owns two background tasks at most: the sampling timer and a
//! pending stream open. Both report back to the panel task through its event
//! queue and carry a generation number, so results from a cancelled timer or
//! a superseded open are recognised and ignored.
//!
//! Streams are closed on the blocking pool, since closing a device may wait
//! for its reader thread. A reopen of a device that admits a single stream
//! closes the bound stream first and the open waits until it is gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Result, WebcamError};
use crate::host::{CaptureBackend, CaptureStream};
use crate::pipeline::PanelEvent;
use crate::Config;

use super::frame::Raster;

/// Shortest sampling period the timer accepts
pub const MIN_SAMPLING_PERIOD: Duration = Duration::from_millis(1);

/// Parameters a capture stream is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Empty selects the backend's default source
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl StreamRequest {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_id: config.device_id.clone(),
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(WebcamError::InvalidRequest(format!(
                "geometry {}x{} has no area",
                self.width, self.height
            )));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(WebcamError::InvalidRequest(format!(
                "frame rate {} is not positive",
                self.frame_rate
            )));
        }
        Ok(())
    }
}

/// Sampling period for a publish rate in Hz; `None` when the rate is unusable.
pub fn sampling_period(rate: f64) -> Option<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    let period = Duration::try_from_secs_f64(1.0 / rate).ok()?;
    Some(period.max(MIN_SAMPLING_PERIOD))
}

struct BoundStream {
    request: StreamRequest,
    stream: Box<dyn CaptureStream>,
}

struct PendingOpen {
    generation: u64,
    request: StreamRequest,
    task: JoinHandle<()>,
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SamplingTimer {
    generation: u64,
    period: Duration,
    task: JoinHandle<()>,
}

impl Drop for SamplingTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps a capture stream bound and samples it on the publish cadence
pub struct CaptureSampler {
    backend: Arc<dyn CaptureBackend>,
    events: flume::Sender<PanelEvent>,
    stream: Option<BoundStream>,
    pending: Option<PendingOpen>,
    open_generation: u64,
    timer: Option<SamplingTimer>,
    timer_generation: u64,
    /// Flips to `true` once the last released stream is closed
    releasing: Option<watch::Receiver<bool>>,
    raster: Raster,
}

/// Close `stream` off the calling task.
fn release(stream: Box<dyn CaptureStream>) -> watch::Receiver<bool> {
    let (closed_tx, closed) = watch::channel(false);
    tokio::task::spawn_blocking(move || {
        drop(stream);
        let _ = closed_tx.send(true);
    });
    closed
}

impl CaptureSampler {
    pub fn new(backend: Arc<dyn CaptureBackend>, events: flume::Sender<PanelEvent>) -> Self {
        Self {
            backend,
            events,
            stream: None,
            pending: None,
            open_generation: 0,
            timer: None,
            timer_generation: 0,
            releasing: None,
            raster: Raster::new(),
        }
    }

    /// Request the initial stream and arm the timer.
    pub fn start(&mut self, config: &Config) {
        self.request_stream(StreamRequest::from_config(config));
        self.arm_timer(config.publish_rate);
    }

    /// React to a configuration change, touching only what actually changed.
    pub fn on_config_changed(&mut self, old: &Config, new: &Config) {
        let request = StreamRequest::from_config(new);
        if StreamRequest::from_config(old) != request {
            self.request_stream(request);
        }
        if old.publish_rate.to_bits() != new.publish_rate.to_bits() {
            self.arm_timer(new.publish_rate);
        }
    }

    fn request_stream(&mut self, request: StreamRequest) {
        if let Err(e) = request.validate() {
            warn!("Not reopening capture stream: {}", e);
            return;
        }

        // Supersede any open still in flight
        self.pending = None;
        self.open_generation += 1;
        let generation = self.open_generation;

        info!(
            device = %request.device_id,
            width = request.width,
            height = request.height,
            frame_rate = request.frame_rate,
            generation,
            "Opening capture stream"
        );

        let conflicting = self
            .stream
            .as_ref()
            .is_some_and(|bound| self.backend.conflicts_with_bound(&bound.request, &request));
        if conflicting {
            if let Some(bound) = self.stream.take() {
                info!(device = %bound.request.device_id, "Closing bound stream before reopening its device");
                self.releasing = Some(release(bound.stream));
            }
        }

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let task_request = request.clone();
        let released = self.releasing.clone();
        let task = tokio::spawn(async move {
            if let Some(mut closed) = released {
                // A dropped sender means the close finished or panicked
                let _ = closed.wait_for(|closed| *closed).await;
            }
            let result = backend.open_capture_stream(&task_request).await;
            let _ = events
                .send_async(PanelEvent::StreamOpened { generation, result })
                .await;
        });

        self.pending = Some(PendingOpen {
            generation,
            request,
            task,
        });
    }

    /// Bind a freshly opened stream, replacing (and closing) the old one.
    ///
    /// Failures and stale results leave the bound stream in place.
    pub fn on_stream_opened(&mut self, generation: u64, result: Result<Box<dyn CaptureStream>>) {
        let pending = match self.pending.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                self.pending = other;
                debug!(generation, "Discarding result of a superseded stream open");
                if let Ok(stream) = result {
                    release(stream);
                }
                return;
            }
        };

        match result {
            Ok(stream) => {
                info!(
                    device = %pending.request.device_id,
                    generation,
                    "Capture stream bound"
                );
                let previous = self.stream.replace(BoundStream {
                    request: pending.request.clone(),
                    stream,
                });
                if let Some(previous) = previous {
                    self.releasing = Some(release(previous.stream));
                }
            }
            Err(e) => {
                warn!("Failed to open capture stream, keeping the previous one: {}", e);
            }
        }
    }

    /// Cancel the running timer, then arm a new one for `rate` Hz.
    pub fn arm_timer(&mut self, rate: f64) {
        self.timer = None;

        let Some(period) = sampling_period(rate) else {
            warn!(rate, "Publish rate must be positive, sampling paused");
            return;
        };

        self.timer_generation += 1;
        let generation = self.timer_generation;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if events.send_async(PanelEvent::Tick { generation }).await.is_err() {
                    break;
                }
            }
        });

        debug!(?period, generation, "Sampling timer armed");
        self.timer = Some(SamplingTimer {
            generation,
            period,
            task,
        });
    }

    /// Whether a tick came from the timer that is currently armed
    pub fn is_current_tick(&self, generation: u64) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
    }

    /// Draw one snapshot from the bound stream.
    ///
    /// `None` when there is no stream, the stream has no area yet, or the
    /// snapshot failed.
    pub fn sample(&mut self) -> Option<&Raster> {
        let Some(bound) = self.stream.as_mut() else {
            metrics::counter!("webcam_ticks_skipped_total", "reason" => "no_stream").increment(1);
            return None;
        };

        let (width, height) = bound.stream.geometry();
        if width == 0 || height == 0 {
            debug!("Capture stream not ready, skipping tick");
            metrics::counter!("webcam_ticks_skipped_total", "reason" => "empty_frame").increment(1);
            return None;
        }

        self.raster.resize(width, height);
        if let Err(e) = bound.stream.snapshot(&mut self.raster) {
            debug!("Snapshot failed, skipping tick: {}", e);
            metrics::counter!("webcam_ticks_skipped_total", "reason" => "snapshot_error").increment(1);
            return None;
        }
        if self.raster.is_empty() {
            metrics::counter!("webcam_ticks_skipped_total", "reason" => "empty_frame").increment(1);
            return None;
        }

        Some(&self.raster)
    }

    /// Request the bound stream was opened with
    pub fn bound_request(&self) -> Option<&StreamRequest> {
        self.stream.as_ref().map(|bound| &bound.request)
    }

    pub fn has_pending_open(&self) -> bool {
        self.pending.is_some()
    }

    pub fn timer_period(&self) -> Option<Duration> {
        self.timer.as_ref().map(|timer| timer.period)
    }

    /// Stop the timer, abandon any pending open and close the stream.
    pub fn shutdown(&mut self) {
        self.timer = None;
        self.pending = None;
        if let Some(bound) = self.stream.take() {
            self.releasing = Some(release(bound.stream));
            info!("Capture stream closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestPatternBackend;

    fn sampler() -> (CaptureSampler, flume::Receiver<PanelEvent>) {
        let (tx, rx) = flume::unbounded();
        let backend = Arc::new(TestPatternBackend::new());
        (CaptureSampler::new(backend, tx), rx)
    }

    async fn next_open(rx: &flume::Receiver<PanelEvent>) -> (u64, Result<Box<dyn CaptureStream>>) {
        loop {
            match rx.recv_async().await.unwrap() {
                PanelEvent::StreamOpened { generation, result } => return (generation, result),
                _ => continue,
            }
        }
    }

    #[test]
    fn test_sampling_period_rejects_bad_rates() {
        assert_eq!(sampling_period(10.0), Some(Duration::from_millis(100)));
        assert_eq!(sampling_period(0.0), None);
        assert_eq!(sampling_period(-1.0), None);
        assert_eq!(sampling_period(f64::NAN), None);
        assert_eq!(sampling_period(f64::INFINITY), None);
        assert_eq!(sampling_period(1e12), Some(MIN_SAMPLING_PERIOD));
    }

    #[test]
    fn test_request_validation() {
        let mut request = StreamRequest::from_config(&Config::default());
        assert!(request.validate().is_ok());
        request.width = 0;
        assert!(request.validate().is_err());
        request.width = 10;
        request.frame_rate = 0.0;
        assert!(request.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_open_is_discarded() {
        let (mut sampler, rx) = sampler();
        sampler.start(&Config::default());
        let (first_gen, first) = next_open(&rx).await;

        let mut wider = Config::default();
        wider.width = 1024;
        sampler.on_config_changed(&Config::default(), &wider);

        // The first open completed before being superseded; its result is stale now
        sampler.on_stream_opened(first_gen, first);
        assert!(sampler.bound_request().is_none());
        assert!(sampler.has_pending_open());

        let (generation, result) = next_open(&rx).await;
        sampler.on_stream_opened(generation, result);
        assert_eq!(sampler.bound_request().map(|r| r.width), Some(1024));
        assert!(!sampler.has_pending_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_keeps_previous_stream() {
        let (mut sampler, rx) = sampler();
        sampler.start(&Config::default());
        let (generation, result) = next_open(&rx).await;
        sampler.on_stream_opened(generation, result);

        let mut other = Config::default();
        other.device_id = "missing".into();
        sampler.on_config_changed(&Config::default(), &other);
        let (generation, _) = next_open(&rx).await;
        sampler.on_stream_opened(
            generation,
            Err(WebcamError::device_unavailable("missing", "not found")),
        );

        assert_eq!(sampler.bound_request().map(|r| r.device_id.as_str()), Some(""));
        assert!(sampler.sample().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_device_closed_before_reopen() {
        let (tx, rx) = flume::unbounded();
        let backend = TestPatternBackend::new().with_exclusive_access();
        let mut sampler = CaptureSampler::new(Arc::new(backend.clone()), tx);
        sampler.start(&Config::default());
        let (generation, result) = next_open(&rx).await;
        sampler.on_stream_opened(generation, result);

        let mut wider = Config::default();
        wider.width = 1024;
        sampler.on_config_changed(&Config::default(), &wider);
        assert!(sampler.bound_request().is_none());

        let (generation, result) = next_open(&rx).await;
        assert!(result.is_ok());
        sampler.on_stream_opened(generation, result);
        assert_eq!(sampler.bound_request().map(|r| r.width), Some(1024));
        assert_eq!(backend.held_devices(), vec![String::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_geometry_does_not_reopen() {
        let (mut sampler, _rx) = sampler();
        let mut config = Config::default();
        config.height = 0;
        sampler.on_config_changed(&Config::default(), &config);
        assert!(!sampler.has_pending_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_rearms_timer() {
        let (mut sampler, rx) = sampler();
        sampler.start(&Config::default());
        assert_eq!(sampler.timer_period(), Some(Duration::from_millis(100)));
        assert!(sampler.is_current_tick(1));

        let mut faster = Config::default();
        faster.publish_rate = 20.0;
        sampler.on_config_changed(&Config::default(), &faster);
        assert_eq!(sampler.timer_period(), Some(Duration::from_millis(50)));
        assert!(!sampler.is_current_tick(1));
        assert!(sampler.is_current_tick(2));

        let tick = loop {
            if let PanelEvent::Tick { generation } = rx.recv_async().await.unwrap() {
                break generation;
            }
        };
        assert_eq!(tick, 2);

        let mut stopped = faster.clone();
        stopped.publish_rate = 0.0;
        sampler.on_config_changed(&faster, &stopped);
        assert_eq!(sampler.timer_period(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stream_means_no_sample() {
        let (mut sampler, _rx) = sampler();
        assert!(sampler.sample().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let (mut sampler, rx) = sampler();
        sampler.start(&Config::default());
        let (generation, result) = next_open(&rx).await;
        sampler.on_stream_opened(generation, result);

        sampler.shutdown();
        assert!(sampler.bound_request().is_none());
        assert_eq!(sampler.timer_period(), None);
        assert!(sampler.sample().is_none());
    }
}
