//! Decoded frame types

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use super::{BufferId, PixelFormat};
use crate::DeviceError;

/// One logical data product of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Values per pixel
    pub channels: u32,
    /// Element type of each value
    pub format: PixelFormat,
    /// Row-major, little-endian pixel data (zero-copy via Arc)
    pub data: Arc<[u8]>,
}

impl Buffer {
    /// Create a buffer, checking that `data` holds exactly the described pixels.
    pub fn new(
        width: u32,
        height: u32,
        channels: u32,
        format: PixelFormat,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Self, DeviceError> {
        let data = data.into();
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .and_then(|n| n.checked_mul(format.size()))
            .ok_or_else(|| {
                DeviceError::decode(format!(
                    "buffer of {}x{}x{} {:?} is larger than addressable memory",
                    width, height, channels, format
                ))
            })?;
        if data.len() != expected {
            return Err(DeviceError::decode(format!(
                "buffer of {}x{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                channels,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self { width, height, channels, format, data })
    }

    /// Build an `F32` buffer from channel values.
    pub fn from_f32(
        width: u32,
        height: u32,
        channels: u32,
        values: &[f32],
    ) -> Result<Self, DeviceError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(width, height, channels, PixelFormat::F32, bytes)
    }

    /// Wrap an opaque byte blob (e.g. a JPEG stream) as a one-row `U8` buffer.
    pub fn blob(bytes: impl Into<Arc<[u8]>>) -> Self {
        let data = bytes.into();
        Self { width: data.len() as u32, height: 1, channels: 1, format: PixelFormat::U8, data }
    }

    /// Number of bytes per image row.
    pub fn row_stride(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.channels as usize)
            .saturating_mul(self.format.size())
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Decode every channel value as `f32`.
    pub fn values_f32(&self) -> Vec<f32> {
        let data = self.data.as_ref();
        match self.format {
            PixelFormat::U8 => data.iter().map(|b| *b as f32).collect(),
            PixelFormat::U16 => {
                data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]) as f32).collect()
            }
            PixelFormat::I16 => {
                data.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]) as f32).collect()
            }
            PixelFormat::F32 => {
                data.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
            }
        }
    }
}

/// A decoded frame as delivered by a frame grabber.
///
/// Buffers are keyed by id; iteration follows canonical [`BufferId`] order.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Acquisition time stamped by the device
    pub timestamp: SystemTime,

    /// Monotonic frame counter of the grabber
    pub frame_count: u64,

    buffers: BTreeMap<BufferId, Buffer>,
}

impl Frame {
    /// Create an empty frame.
    pub fn new(timestamp: SystemTime, frame_count: u64) -> Self {
        Self { timestamp, frame_count, buffers: BTreeMap::new() }
    }

    /// Builder-style insert.
    pub fn with_buffer(mut self, id: BufferId, buffer: Buffer) -> Self {
        self.insert(id, buffer);
        self
    }

    /// Insert or replace a buffer.
    pub fn insert(&mut self, id: BufferId, buffer: Buffer) {
        self.buffers.insert(id, buffer);
    }

    /// Get a buffer by id.
    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    /// Check if a buffer is present.
    pub fn has_buffer(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    /// Ids of the present buffers.
    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.keys().copied()
    }

    /// Number of buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
