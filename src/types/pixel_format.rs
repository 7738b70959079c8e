//! Pixel storage formats

use serde::{Deserialize, Serialize};

/// Element type of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit unsigned
    U8,
    /// 16-bit unsigned, little-endian
    U16,
    /// 16-bit signed, little-endian
    I16,
    /// 32-bit float, little-endian
    F32,
}

impl PixelFormat {
    /// Returns the size in bytes of one channel value.
    pub const fn size(&self) -> usize {
        match self {
            PixelFormat::U8 => 1,
            PixelFormat::U16 | PixelFormat::I16 => 2,
            PixelFormat::F32 => 4,
        }
    }

    /// Image encoding string for `channels` values per pixel (`"32FC1"` and friends).
    pub fn encoding(&self, channels: u32) -> String {
        let depth = match self {
            PixelFormat::U8 => "8U",
            PixelFormat::U16 => "16U",
            PixelFormat::I16 => "16S",
            PixelFormat::F32 => "32F",
        };
        format!("{}C{}", depth, channels)
    }
}
