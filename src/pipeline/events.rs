use tokio::sync::oneshot;

use crate::devices::DeviceOption;
use crate::display::{RenderDone, RenderState};
use crate::error::Result;
use crate::host::CaptureStream;
use crate::settings::SettingsEdit;

/// Everything the panel task reacts to, in arrival order
pub enum PanelEvent {
    /// Settings edit from the host UI
    Edit(SettingsEdit),
    /// Result of the startup enumeration
    DevicesListed(Result<Vec<DeviceOption>>),
    /// Result of a stream open started by the sampler
    StreamOpened {
        generation: u64,
        result: Result<Box<dyn CaptureStream>>,
    },
    /// Sampling timer fired
    Tick { generation: u64 },
    Render { state: RenderState, done: RenderDone },
    /// Stop the panel; `ack` fires once everything is released
    Teardown { ack: Option<oneshot::Sender<()>> },
}

impl PanelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Edit(_) => "edit",
            Self::DevicesListed(_) => "devices_listed",
            Self::StreamOpened { .. } => "stream_opened",
            Self::Tick { .. } => "tick",
            Self::Render { .. } => "render",
            Self::Teardown { .. } => "teardown",
        }
    }
}
