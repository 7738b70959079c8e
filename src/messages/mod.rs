//! Message payloads handed to the transport
//!
//! Every buffer of a frame maps to one message on a fixed topic:
//!
//! | Buffer | Topic | Message | Frame id |
//! |---|---|---|---|
//! | `RADIAL_DISTANCE_IMAGE` | `distance` | [`Image`] | optical |
//! | `NORM_AMPLITUDE_IMAGE` | `amplitude` | [`Image`] | optical |
//! | `AMPLITUDE_IMAGE` | `raw_amplitude` | [`Image`] | optical |
//! | `XYZ` | `cloud` | [`PointCloud`] | camera |
//! | `CONFIDENCE_IMAGE` | `confidence` | [`Image`] | optical |
//! | `EXTRINSIC_CALIB` | `extrinsics` | [`Extrinsics`] | camera |
//! | `JPEG_IMAGE` | `rgb` | [`CompressedImage`] | optical |
//!
//! Wire encoding is left to the transport; payloads share pixel data with the
//! source frame where the layout allows it.

mod convert;

pub use convert::{FrameIds, frame_to_messages};

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::types::BufferId;

/// Publication topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Distance,
    Amplitude,
    RawAmplitude,
    Cloud,
    Confidence,
    Extrinsics,
    Rgb,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Distance,
        Topic::Amplitude,
        Topic::RawAmplitude,
        Topic::Cloud,
        Topic::Confidence,
        Topic::Extrinsics,
        Topic::Rgb,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Topic::Distance => "distance",
            Topic::Amplitude => "amplitude",
            Topic::RawAmplitude => "raw_amplitude",
            Topic::Cloud => "cloud",
            Topic::Confidence => "confidence",
            Topic::Extrinsics => "extrinsics",
            Topic::Rgb => "rgb",
        }
    }

    /// Topic a buffer is published on.
    pub const fn for_buffer(id: BufferId) -> Topic {
        match id {
            BufferId::RadialDistanceImage => Topic::Distance,
            BufferId::NormAmplitudeImage => Topic::Amplitude,
            BufferId::AmplitudeImage => Topic::RawAmplitude,
            BufferId::Xyz => Topic::Cloud,
            BufferId::ConfidenceImage => Topic::Confidence,
            BufferId::ExtrinsicCalib => Topic::Extrinsics,
            BufferId::JpegImage => Topic::Rgb,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stamp and coordinate frame of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub stamp: SystemTime,
    pub frame_id: String,
}

/// Uncompressed image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    /// Pixel encoding such as `32FC1`
    pub encoding: String,
    /// Row length in bytes
    pub step: u32,
    pub data: Arc<[u8]>,
}

/// Datatype tag of a point field.
pub const FLOAT32: u8 = 7;

/// Layout of one field inside a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

/// Organized point cloud of `x`, `y`, `z` in metres, 32-bit float each.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub point_step: u32,
    pub row_step: u32,
    pub is_dense: bool,
    pub data: Arc<[u8]>,
}

impl PointCloud {
    /// Decode the points as `[x, y, z]` triples.
    pub fn points(&self) -> Vec<[f32; 3]> {
        self.data
            .chunks_exact(12)
            .map(|p| {
                let v = |o: usize| f32::from_le_bytes([p[o], p[o + 1], p[o + 2], p[o + 3]]);
                [v(0), v(4), v(8)]
            })
            .collect()
    }
}

/// Pose of the optical frame relative to the camera housing.
#[derive(Debug, Clone, PartialEq)]
pub struct Extrinsics {
    pub header: Header,
    pub tx: f32,
    pub ty: f32,
    pub tz: f32,
    pub rot_x: f32,
    pub rot_y: f32,
    pub rot_z: f32,
}

/// Compressed image such as the JPEG stream of a color imager.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub header: Header,
    pub format: String,
    pub data: Arc<[u8]>,
}

/// A message bound to its topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Distance(Image),
    Amplitude(Image),
    RawAmplitude(Image),
    Cloud(PointCloud),
    Confidence(Image),
    Extrinsics(Extrinsics),
    Rgb(CompressedImage),
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::Distance(_) => Topic::Distance,
            Message::Amplitude(_) => Topic::Amplitude,
            Message::RawAmplitude(_) => Topic::RawAmplitude,
            Message::Cloud(_) => Topic::Cloud,
            Message::Confidence(_) => Topic::Confidence,
            Message::Extrinsics(_) => Topic::Extrinsics,
            Message::Rgb(_) => Topic::Rgb,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Distance(m)
            | Message::Amplitude(m)
            | Message::RawAmplitude(m)
            | Message::Confidence(m) => &m.header,
            Message::Cloud(m) => &m.header,
            Message::Extrinsics(m) => &m.header,
            Message::Rgb(m) => &m.header,
        }
    }
}
