pub mod handshake;

pub use handshake::{LogPreview, PreviewSurface, RenderDone, RenderHandshake, RenderState};
