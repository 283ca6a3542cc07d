pub mod decoder;
pub mod frame;
pub mod pattern;
pub mod sampler;
#[cfg(feature = "v4l2-backend")]
pub mod v4l2;

pub use frame::{Frame, PixelFormat, Raster, Timestamp};
pub use pattern::TestPatternBackend;
pub use sampler::{sampling_period, CaptureSampler, StreamRequest};
#[cfg(feature = "v4l2-backend")]
pub use v4l2::V4l2Backend;
