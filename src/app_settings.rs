//! Settings of the webcam-publisher binary
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `webcam.toml` (or an explicit file), then `WEBCAM_*` environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::error::Result;

/// Capture backend the binary wires into the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    V4l2,
    Pattern,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// Where the panel configuration is persisted
    pub state_file: PathBuf,
    /// `tracing_subscriber` env filter directive
    pub log_filter: String,
    pub jpeg_quality: u8,
    pub backend: BackendKind,
    /// Host render ticks per second
    pub render_rate: f64,
}

impl AppSettings {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let default_backend = if cfg!(feature = "v4l2-backend") { "v4l2" } else { "pattern" };

        let source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("webcam").required(false),
        };

        let settings = config::Config::builder()
            .set_default("state_file", "webcam-panel.toml")?
            .set_default("log_filter", "webcam_publisher=info")?
            .set_default("jpeg_quality", DEFAULT_JPEG_QUALITY as i64)?
            .set_default("backend", default_backend)?
            .set_default("render_rate", 60.0)?
            .add_source(source)
            .add_source(config::Environment::with_prefix("WEBCAM"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
