mod events;
mod panel;

pub use events::PanelEvent;
pub use panel::{spawn_panel, PanelHandle, PanelOptions, PanelSnapshot};
