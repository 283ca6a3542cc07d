//! Outbound message shapes

use bytes::Bytes;
use serde::Serialize;

use crate::capture::Timestamp;

pub const RAW_ENCODING: &str = "rgba8";
pub const COMPRESSED_FORMAT: &str = "jpeg";

/// Message kind declared when advertising a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    Image,
    CompressedImage,
}

impl MessageKind {
    pub fn for_mode(compressed: bool) -> Self {
        if compressed {
            MessageKind::CompressedImage
        } else {
            MessageKind::Image
        }
    }

    /// Schema name handed to the host on advertise
    pub fn schema_name(&self) -> &'static str {
        match self {
            MessageKind::Image => "sensor_msgs/Image",
            MessageKind::CompressedImage => "sensor_msgs/CompressedImage",
        }
    }
}

/// Dense `rgba8` image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFrameMessage {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub encoding: &'static str,
    /// Row stride in bytes
    pub step: u32,
    pub data: Bytes,
}

impl RawFrameMessage {
    /// `None` unless the geometry has area and `data` is exactly `step * height`.
    pub fn new(
        timestamp: Timestamp,
        frame_id: String,
        width: u32,
        height: u32,
        step: u32,
        data: Bytes,
    ) -> Option<Self> {
        let message = Self {
            timestamp,
            frame_id,
            width,
            height,
            encoding: RAW_ENCODING,
            step,
            data,
        };
        message.is_valid().then_some(message)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && !self.data.is_empty()
            && self.data.len() == self.step as usize * self.height as usize
    }
}

/// Single compressed image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressedFrameMessage {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub format: &'static str,
    pub data: Bytes,
}

impl CompressedFrameMessage {
    pub fn new(timestamp: Timestamp, frame_id: String, data: Bytes) -> Option<Self> {
        let message = Self {
            timestamp,
            frame_id,
            format: COMPRESSED_FORMAT,
            data,
        };
        message.is_valid().then_some(message)
    }

    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }
}

/// Whatever the encoder produced for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrameMessage {
    Raw(RawFrameMessage),
    Compressed(CompressedFrameMessage),
}

impl FrameMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            FrameMessage::Raw(_) => MessageKind::Image,
            FrameMessage::Compressed(_) => MessageKind::CompressedImage,
        }
    }

    /// Holds a payload that may be published
    pub fn is_valid(&self) -> bool {
        match self {
            FrameMessage::Raw(raw) => raw.is_valid(),
            FrameMessage::Compressed(compressed) => compressed.is_valid(),
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            FrameMessage::Raw(raw) => &raw.data,
            FrameMessage::Compressed(compressed) => &compressed.data,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            FrameMessage::Raw(raw) => raw.timestamp,
            FrameMessage::Compressed(compressed) => compressed.timestamp,
        }
    }
}

/// An encoded frame together with the channel it was sampled for
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub topic: String,
    pub message: FrameMessage,
}
