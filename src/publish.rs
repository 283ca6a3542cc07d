//! Publish channel lifecycle and the outbound publish gate
//!
//! At most one channel is advertised at any instant. Whenever the advertised
//! channel has to change, the old one is unadvertised before the new one is
//! advertised.

use std::fmt;

use tracing::{debug, info, warn};

use crate::encode::{MessageKind, OutboundFrame};
use crate::host::PublishSink;
use crate::Config;

/// What is currently advertised on the host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Advertised { topic: String, kind: MessageKind },
}

/// Why the gate refused a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Publishing is disabled or nothing is advertised
    NotAdvertised,
    /// Advertisement does not match the live configuration
    ConfigMismatch,
    /// Frame was sampled for another channel or encoding
    StaleFrame,
    /// Frame payload is empty or inconsistent
    EmptyPayload,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NotAdvertised => "not_advertised",
            DropReason::ConfigMismatch => "config_mismatch",
            DropReason::StaleFrame => "stale_frame",
            DropReason::EmptyPayload => "empty_payload",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Dropped(DropReason),
}

/// Channel the configuration asks for, if any
fn desired_channel(config: &Config) -> Option<(&str, MessageKind)> {
    if !config.publish_mode || config.pub_topic.is_empty() {
        return None;
    }
    Some((config.pub_topic.as_str(), MessageKind::for_mode(config.compressed)))
}

#[derive(Debug, Default)]
pub struct PublishManager {
    state: ChannelState,
    topic_missing: bool,
}

impl PublishManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Bring the advertisement in line with `config`.
    ///
    /// Changes unrelated to publishing leave the advertisement alone.
    pub fn reconcile(&mut self, config: &Config, sink: &mut dyn PublishSink) {
        self.note_missing_topic(config);
        let desired = desired_channel(config);

        if let ChannelState::Advertised { topic, kind } = &self.state {
            if desired == Some((topic.as_str(), *kind)) {
                return;
            }
        } else if desired.is_none() {
            return;
        }

        self.withdraw(sink);

        if let Some((topic, kind)) = desired {
            info!(topic, schema = kind.schema_name(), "Advertising channel");
            sink.advertise(topic, kind);
            self.state = ChannelState::Advertised {
                topic: topic.to_string(),
                kind,
            };
        }
    }

    /// Warn once when publishing is switched on without a topic.
    ///
    /// Returns whether a warning was emitted.
    fn note_missing_topic(&mut self, config: &Config) -> bool {
        let missing = config.publish_mode && config.pub_topic.is_empty();
        let entered = missing && !self.topic_missing;
        if entered {
            warn!("Publishing is enabled but the topic is empty, nothing advertised");
        }
        self.topic_missing = missing;
        entered
    }

    fn withdraw(&mut self, sink: &mut dyn PublishSink) {
        if let ChannelState::Advertised { topic, .. } = std::mem::take(&mut self.state) {
            info!(topic = %topic, "Unadvertising channel");
            sink.unadvertise(&topic);
        }
    }

    /// Decide whether `frame` may go out under the live `config`.
    pub fn check(&self, config: &Config, frame: &OutboundFrame) -> std::result::Result<(), DropReason> {
        let ChannelState::Advertised { topic, kind } = &self.state else {
            return Err(DropReason::NotAdvertised);
        };
        if !config.publish_mode {
            return Err(DropReason::NotAdvertised);
        }
        if *topic != config.pub_topic || *kind != MessageKind::for_mode(config.compressed) {
            return Err(DropReason::ConfigMismatch);
        }
        if frame.topic != *topic || frame.message.kind() != *kind {
            return Err(DropReason::StaleFrame);
        }
        if !frame.message.is_valid() {
            return Err(DropReason::EmptyPayload);
        }
        Ok(())
    }

    /// Forward `frame` to the sink if the gate allows it.
    pub fn publish(
        &self,
        config: &Config,
        frame: &OutboundFrame,
        sink: &mut dyn PublishSink,
    ) -> PublishOutcome {
        match self.check(config, frame) {
            Ok(()) => {
                sink.publish(&frame.topic, &frame.message);
                metrics::counter!("webcam_frames_published_total").increment(1);
                PublishOutcome::Published
            }
            Err(reason) => {
                debug!(topic = %frame.topic, %reason, "Frame not published");
                metrics::counter!("webcam_frames_dropped_total", "reason" => reason.as_str())
                    .increment(1);
                PublishOutcome::Dropped(reason)
            }
        }
    }

    /// Withdraw any advertisement; called when the panel goes away.
    pub fn teardown(&mut self, sink: &mut dyn PublishSink) {
        self.withdraw(sink);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::capture::Timestamp;
    use crate::encode::{CompressedFrameMessage, FrameMessage, RawFrameMessage};
    use crate::settings::{apply_edit, ConfigField, SettingsEdit};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Advertise(String, MessageKind),
        Unadvertise(String),
        Publish(String),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl PublishSink for Recorder {
        fn advertise(&mut self, topic: &str, kind: MessageKind) {
            self.calls.push(Call::Advertise(topic.into(), kind));
        }
        fn unadvertise(&mut self, topic: &str) {
            self.calls.push(Call::Unadvertise(topic.into()));
        }
        fn publish(&mut self, topic: &str, _message: &FrameMessage) {
            self.calls.push(Call::Publish(topic.into()));
        }
    }

    fn publishing(topic: &str, compressed: bool) -> Config {
        Config {
            publish_mode: true,
            pub_topic: topic.into(),
            compressed,
            ..Config::default()
        }
    }

    fn jpeg_frame(topic: &str) -> OutboundFrame {
        OutboundFrame {
            topic: topic.into(),
            message: FrameMessage::Compressed(
                CompressedFrameMessage::new(Timestamp::default(), String::new(), Bytes::from_static(&[1, 2]))
                    .unwrap(),
            ),
        }
    }

    fn raw_frame(topic: &str) -> OutboundFrame {
        OutboundFrame {
            topic: topic.into(),
            message: FrameMessage::Raw(
                RawFrameMessage::new(Timestamp::default(), String::new(), 1, 1, 4, Bytes::from_static(&[0; 4]))
                    .unwrap(),
            ),
        }
    }

    #[test]
    fn test_enable_advertises_once() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let config = publishing("/image", true);
        manager.reconcile(&config, &mut sink);
        manager.reconcile(&config, &mut sink);
        assert_eq!(
            sink.calls,
            vec![Call::Advertise("/image".into(), MessageKind::CompressedImage)]
        );
    }

    #[test]
    fn test_rename_unadvertises_before_advertising() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        manager.reconcile(&publishing("/a", true), &mut sink);
        manager.reconcile(&publishing("/b", true), &mut sink);
        assert_eq!(
            sink.calls,
            vec![
                Call::Advertise("/a".into(), MessageKind::CompressedImage),
                Call::Unadvertise("/a".into()),
                Call::Advertise("/b".into(), MessageKind::CompressedImage),
            ]
        );
    }

    #[test]
    fn test_encoding_switch_readvertises_same_topic() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        manager.reconcile(&publishing("/a", true), &mut sink);
        manager.reconcile(&publishing("/a", false), &mut sink);
        assert_eq!(sink.calls[1], Call::Unadvertise("/a".into()));
        assert_eq!(sink.calls[2], Call::Advertise("/a".into(), MessageKind::Image));
    }

    #[test]
    fn test_disable_unadvertises() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        manager.reconcile(&publishing("/a", true), &mut sink);
        manager.reconcile(&Config::default(), &mut sink);
        assert_eq!(sink.calls.last(), Some(&Call::Unadvertise("/a".into())));
        assert_eq!(manager.state(), &ChannelState::Idle);
    }

    #[test]
    fn test_unrelated_changes_are_noops() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let config = publishing("/a", true);
        manager.reconcile(&config, &mut sink);
        let wider = Config { width: 1920, frame_rate: 60.0, ..config };
        manager.reconcile(&wider, &mut sink);
        assert_eq!(sink.calls.len(), 1);
    }

    #[test]
    fn test_empty_topic_is_not_advertised() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        manager.reconcile(&publishing("/a", true), &mut sink);
        manager.reconcile(&publishing("", true), &mut sink);
        assert_eq!(sink.calls.last(), Some(&Call::Unadvertise("/a".into())));
        assert_eq!(manager.state(), &ChannelState::Idle);
    }

    #[test]
    fn test_missing_topic_warns_on_transition_only() {
        let mut manager = PublishManager::new();
        let blank = publishing("", true);
        assert!(manager.note_missing_topic(&blank));

        let resized = Config {
            width: 1024,
            ..blank.clone()
        };
        assert!(!manager.note_missing_topic(&resized));
        assert!(!manager.note_missing_topic(&blank));

        assert!(!manager.note_missing_topic(&publishing("/cam", true)));
        assert!(manager.note_missing_topic(&blank));

        let off = Config {
            publish_mode: false,
            ..blank.clone()
        };
        assert!(!manager.note_missing_topic(&off));
        assert!(manager.note_missing_topic(&blank));
    }

    #[test]
    fn test_edit_trace_never_has_two_advertised_channels() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let trace = [
            SettingsEdit::for_field(ConfigField::PublishMode, true),
            SettingsEdit::for_field(ConfigField::PubTopic, "/one"),
            SettingsEdit::for_field(ConfigField::Width, 640u32),
            SettingsEdit::for_field(ConfigField::Compressed, false),
            SettingsEdit::for_field(ConfigField::PubTopic, "/two"),
            SettingsEdit::for_field(ConfigField::PublishMode, false),
            SettingsEdit::for_field(ConfigField::PubTopic, "/three"),
            SettingsEdit::for_field(ConfigField::PublishMode, true),
            SettingsEdit::for_field(ConfigField::PubTopic, ""),
            SettingsEdit::for_field(ConfigField::PubTopic, "/four"),
        ];

        let mut config = Config::default();
        for edit in &trace {
            config = apply_edit(&config, edit);
            manager.reconcile(&config, &mut sink);
        }
        manager.teardown(&mut sink);

        let mut advertised: Vec<String> = Vec::new();
        for call in &sink.calls {
            match call {
                Call::Advertise(topic, _) => {
                    assert!(advertised.is_empty(), "advertised {topic} while {advertised:?} live");
                    advertised.push(topic.clone());
                }
                Call::Unadvertise(topic) => {
                    assert_eq!(advertised.pop().as_ref(), Some(topic));
                }
                Call::Publish(_) => unreachable!(),
            }
        }
        assert!(advertised.is_empty());
    }

    #[test]
    fn test_gate_requires_publish_mode() {
        let manager = PublishManager::new();
        let mut sink = Recorder::default();
        let outcome = manager.publish(&Config::default(), &jpeg_frame("/image"), &mut sink);
        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::NotAdvertised));
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_gate_drops_frame_sampled_for_old_topic() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let old = publishing("/old", true);
        manager.reconcile(&old, &mut sink);
        let held = jpeg_frame("/old");

        let new = publishing("/new", true);
        manager.reconcile(&new, &mut sink);
        let outcome = manager.publish(&new, &held, &mut sink);

        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::StaleFrame));
        assert!(!sink.calls.iter().any(|c| matches!(c, Call::Publish(_))));
    }

    #[test]
    fn test_gate_drops_when_live_config_moved_on() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        manager.reconcile(&publishing("/a", true), &mut sink);
        // Config changed but reconcile has not run yet
        let outcome = manager.publish(&publishing("/b", true), &jpeg_frame("/a"), &mut sink);
        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::ConfigMismatch));
    }

    #[test]
    fn test_gate_drops_wrong_kind() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let config = publishing("/a", true);
        manager.reconcile(&config, &mut sink);
        let outcome = manager.publish(&config, &raw_frame("/a"), &mut sink);
        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::StaleFrame));
    }

    #[test]
    fn test_gate_publishes_matching_frame() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let config = publishing("/a", false);
        manager.reconcile(&config, &mut sink);
        assert_eq!(manager.publish(&config, &raw_frame("/a"), &mut sink), PublishOutcome::Published);
        assert_eq!(sink.calls.last(), Some(&Call::Publish("/a".into())));
    }

    #[test]
    fn test_teardown_unadvertises_exactly_once() {
        let mut manager = PublishManager::new();
        let mut sink = Recorder::default();
        let config = publishing("/a", true);
        manager.reconcile(&config, &mut sink);
        manager.teardown(&mut sink);
        manager.teardown(&mut sink);
        let unadvertised = sink.calls.iter().filter(|c| matches!(c, Call::Unadvertise(_))).count();
        assert_eq!(unadvertised, 1);
        assert_eq!(
            manager.publish(&config, &jpeg_frame("/a"), &mut sink),
            PublishOutcome::Dropped(DropReason::NotAdvertised)
        );
    }
}
