pub mod app_settings;
pub mod capture;
pub mod devices;
pub mod display;
pub mod encode;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod publish;
pub mod settings;
pub mod store;

use serde::{Deserialize, Serialize};

pub use error::{Result, WebcamError};
pub use pipeline::{spawn_panel, PanelHandle, PanelOptions, PanelSnapshot};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_FRAME_RATE: f64 = 20.0;
pub const DEFAULT_PUBLISH_RATE: f64 = 10.0;
pub const DEFAULT_PUB_TOPIC: &str = "/image";

/// Panel configuration
///
/// Never mutated in place: every edit produces a new value
/// (see [`settings::apply_edit`]) and every component re-derives its
/// behavior from the latest one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Capture source id; empty selects the default source
    #[serde(alias = "deviceName")]
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    /// Requested capture cadence in Hz
    pub frame_rate: f64,
    /// Outbound sampling cadence in Hz
    #[serde(alias = "pubRate")]
    pub publish_rate: f64,
    pub compressed: bool,
    pub publish_mode: bool,
    pub pub_topic: String,
    pub publish_frame_id: String,
}

/// Restored panel state; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialConfig {
    #[serde(alias = "deviceName")]
    pub device_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    #[serde(alias = "pubRate")]
    pub publish_rate: Option<f64>,
    pub compressed: Option<bool>,
    pub publish_mode: Option<bool>,
    pub pub_topic: Option<String>,
    pub publish_frame_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            publish_rate: DEFAULT_PUBLISH_RATE,
            compressed: true,
            publish_mode: false,
            pub_topic: DEFAULT_PUB_TOPIC.to_string(),
            publish_frame_id: String::new(),
        }
    }
}

impl Config {
    /// Merge a restored state with the defaults, field by field.
    pub fn from_partial(partial: PartialConfig) -> Self {
        let defaults = Self::default();
        Self {
            device_id: partial.device_id.unwrap_or(defaults.device_id),
            width: partial.width.unwrap_or(defaults.width),
            height: partial.height.unwrap_or(defaults.height),
            frame_rate: partial.frame_rate.unwrap_or(defaults.frame_rate),
            publish_rate: partial.publish_rate.unwrap_or(defaults.publish_rate),
            compressed: partial.compressed.unwrap_or(defaults.compressed),
            publish_mode: partial.publish_mode.unwrap_or(defaults.publish_mode),
            pub_topic: partial.pub_topic.unwrap_or(defaults.pub_topic),
            publish_frame_id: partial.publish_frame_id.unwrap_or(defaults.publish_frame_id),
        }
    }
}
