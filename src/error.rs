//! Error types for the webcam publisher core

use thiserror::Error;

/// Result type alias using WebcamError
pub type Result<T> = std::result::Result<T, WebcamError>;

/// Every failure the core can observe.
///
/// None of these are fatal: the panel logs them and degrades to
/// "no output this tick".
#[derive(Debug, Error)]
pub enum WebcamError {
    /// Stream open failed (permission denied, device removed, bad id)
    #[error("Video device unavailable [{device}]: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// Listing capture sources failed
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    /// Capture request that cannot be sent to a backend
    #[error("Invalid capture request: {0}")]
    InvalidRequest(String),

    /// Captured frame could not be converted to a raster
    #[error("Frame decode error: {0}")]
    Decode(String),

    /// Compressed encoding failed
    #[error("Encoding error: {0}")]
    Encode(#[from] image::ImageError),

    /// Loading persisted or application configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be parsed
    #[error("State parse error: {0}")]
    StateParse(#[from] toml::de::Error),

    /// Persisted state could not be serialized
    #[error("State serialization error: {0}")]
    StateSerialize(#[from] toml::ser::Error),
}

impl WebcamError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}
