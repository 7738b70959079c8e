//! Frame to message conversion

use std::sync::Arc;

use super::{
    CompressedImage, Extrinsics, FLOAT32, Header, Image, Message, PointCloud, PointField,
};
use crate::DeviceError;
use crate::params::RuntimeParameters;
use crate::types::{Buffer, BufferId, Frame, PixelFormat};

/// Bytes per point: x, y, z as `f32`.
const POINT_STEP: u32 = 12;

/// Coordinate frame ids stamped on published messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameIds {
    /// Camera housing frame, used for the point cloud and extrinsics
    pub camera: String,
    /// Optical frame, used for images
    pub optical: String,
}

impl FrameIds {
    pub fn from_parameters(params: &RuntimeParameters) -> Self {
        Self { camera: params.camera_frame.clone(), optical: params.optical_frame.clone() }
    }
}

/// Convert every buffer present in `frame` to its message.
///
/// Buffers the frame does not carry are skipped. A buffer whose layout does
/// not match its id is a decode failure and fails the whole frame.
pub fn frame_to_messages(frame: &Frame, ids: &FrameIds) -> Result<Vec<Message>, DeviceError> {
    let optical = Header { stamp: frame.timestamp, frame_id: ids.optical.clone() };
    let camera = Header { stamp: frame.timestamp, frame_id: ids.camera.clone() };

    let mut messages = Vec::with_capacity(frame.buffer_count());
    for id in frame.buffer_ids() {
        let Some(buffer) = frame.buffer(id) else { continue };
        let message = match id {
            BufferId::RadialDistanceImage => Message::Distance(image(&optical, id, buffer)?),
            BufferId::NormAmplitudeImage => Message::Amplitude(image(&optical, id, buffer)?),
            BufferId::AmplitudeImage => Message::RawAmplitude(image(&optical, id, buffer)?),
            BufferId::ConfidenceImage => Message::Confidence(image(&optical, id, buffer)?),
            BufferId::Xyz => Message::Cloud(cloud(&camera, buffer)?),
            BufferId::ExtrinsicCalib => Message::Extrinsics(extrinsics(&camera, buffer)?),
            BufferId::JpegImage => Message::Rgb(CompressedImage {
                header: optical.clone(),
                format: "jpeg".to_string(),
                data: Arc::clone(&buffer.data),
            }),
        };
        messages.push(message);
    }
    Ok(messages)
}

fn image(header: &Header, id: BufferId, buffer: &Buffer) -> Result<Image, DeviceError> {
    if buffer.channels != 1 {
        return Err(DeviceError::decode(format!(
            "{} must have one channel, got {}",
            id, buffer.channels
        )));
    }
    let step = u32::try_from(buffer.row_stride())
        .map_err(|_| DeviceError::decode(format!("{} rows are too wide", id)))?;
    Ok(Image {
        header: header.clone(),
        height: buffer.height,
        width: buffer.width,
        encoding: buffer.format.encoding(buffer.channels),
        step,
        data: Arc::clone(&buffer.data),
    })
}

fn cloud(header: &Header, buffer: &Buffer) -> Result<PointCloud, DeviceError> {
    if buffer.channels != 3 {
        return Err(DeviceError::decode(format!(
            "{} must have three channels, got {}",
            BufferId::Xyz,
            buffer.channels
        )));
    }

    let row_step = buffer
        .width
        .checked_mul(POINT_STEP)
        .ok_or_else(|| DeviceError::decode(format!("{} rows are too wide", BufferId::Xyz)))?;

    let data: Arc<[u8]> = match buffer.format {
        // Already little-endian f32 metres
        PixelFormat::F32 => Arc::clone(&buffer.data),
        // Millimetres
        PixelFormat::I16 => buffer
            .values_f32()
            .into_iter()
            .flat_map(|mm| (mm / 1000.0).to_le_bytes())
            .collect::<Vec<u8>>()
            .into(),
        other => {
            return Err(DeviceError::decode(format!(
                "{} cannot be stored as {:?}",
                BufferId::Xyz,
                other
            )));
        }
    };

    let fields = ["x", "y", "z"]
        .iter()
        .enumerate()
        .map(|(i, name)| PointField {
            name: name.to_string(),
            offset: i as u32 * 4,
            datatype: FLOAT32,
            count: 1,
        })
        .collect();

    Ok(PointCloud {
        header: header.clone(),
        height: buffer.height,
        width: buffer.width,
        fields,
        point_step: POINT_STEP,
        row_step,
        is_dense: false,
        data,
    })
}

fn extrinsics(header: &Header, buffer: &Buffer) -> Result<Extrinsics, DeviceError> {
    let values = buffer.values_f32();
    let [tx, ty, tz, rot_x, rot_y, rot_z] = match values.get(..6) {
        Some(&[tx, ty, tz, rx, ry, rz]) => [tx, ty, tz, rx, ry, rz],
        _ => {
            return Err(DeviceError::decode(format!(
                "{} needs 6 values, got {}",
                BufferId::ExtrinsicCalib,
                values.len()
            )));
        }
    };
    Ok(Extrinsics { header: header.clone(), tx, ty, tz, rot_x, rot_y, rot_z })
}
