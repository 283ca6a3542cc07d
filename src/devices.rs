//! Directory of selectable capture sources

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// One selectable capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    /// Human readable name shown in the device select
    pub label: String,
    /// Stable identifier stored in `Config::device_id`
    pub id: String,
}

impl DeviceOption {
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
        }
    }
}

/// Capture sources found by the one-shot startup enumeration.
///
/// A failed enumeration leaves the directory empty; nothing retries it.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    options: Vec<DeviceOption>,
    listed: bool,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in the result of an enumeration.
    pub fn load(&mut self, listing: Result<Vec<DeviceOption>>) {
        self.listed = true;
        match listing {
            Ok(options) => {
                info!("Found {} video source(s)", options.len());
                self.options = options;
            }
            Err(e) => {
                warn!("Video source enumeration failed, only the default source is selectable: {}", e);
                self.options.clear();
            }
        }
    }

    pub fn options(&self) -> &[DeviceOption] {
        &self.options
    }

    /// Whether an enumeration result has been received
    pub fn is_listed(&self) -> bool {
        self.listed
    }

    /// Empty ids always resolve to the default source.
    pub fn is_selectable(&self, id: &str) -> bool {
        id.is_empty() || self.options.iter().any(|option| option.id == id)
    }

    /// Log selections the directory cannot vouch for.
    pub fn check_selection(&self, id: &str) {
        if self.listed && !self.options.is_empty() && !self.is_selectable(id) {
            warn!(device = %id, "Selected device is not in the video source list");
        }
    }
}
