//! Logical buffer identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor-neutral identifier for one logical data product of a frame.
///
/// The declaration order is the canonical buffer order used when buffers are
/// indexed or iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferId {
    /// Radial distance per pixel
    RadialDistanceImage,
    /// Amplitude normalized by exposure time
    NormAmplitudeImage,
    /// Raw amplitude
    AmplitudeImage,
    /// Cartesian coordinates, three channels per pixel
    Xyz,
    /// Per-pixel confidence flags
    ConfidenceImage,
    /// Extrinsic calibration of the optical frame (tx, ty, tz, rot_x, rot_y, rot_z)
    ExtrinsicCalib,
    /// JPEG-encoded color image from a 2D imager
    JpegImage,
}

impl BufferId {
    /// Every known buffer id in canonical order.
    pub const ALL: [BufferId; 7] = [
        BufferId::RadialDistanceImage,
        BufferId::NormAmplitudeImage,
        BufferId::AmplitudeImage,
        BufferId::Xyz,
        BufferId::ConfidenceImage,
        BufferId::ExtrinsicCalib,
        BufferId::JpegImage,
    ];

    /// Ids requested alongside any non-empty schema selection.
    pub const ANCILLARY: [BufferId; 3] =
        [BufferId::ConfidenceImage, BufferId::ExtrinsicCalib, BufferId::JpegImage];

    /// SDK-style name of this buffer.
    pub const fn name(&self) -> &'static str {
        match self {
            BufferId::RadialDistanceImage => "RADIAL_DISTANCE_IMAGE",
            BufferId::NormAmplitudeImage => "NORM_AMPLITUDE_IMAGE",
            BufferId::AmplitudeImage => "AMPLITUDE_IMAGE",
            BufferId::Xyz => "XYZ",
            BufferId::ConfidenceImage => "CONFIDENCE_IMAGE",
            BufferId::ExtrinsicCalib => "EXTRINSIC_CALIB",
            BufferId::JpegImage => "JPEG_IMAGE",
        }
    }

    /// Whether this id is requested implicitly rather than through the schema mask.
    pub fn is_ancillary(&self) -> bool {
        Self::ANCILLARY.contains(self)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
