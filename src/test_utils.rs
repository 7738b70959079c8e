//! Test utilities shared by unit tests and benchmarks
//!
//! Builders for synthetic frames and for nodes wired to a simulated camera.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;
use std::time::SystemTime;

use crate::DeviceError;
use crate::device::{CameraIdentity, Connector, Device, FrameGrabber};
use crate::devices::SimulatedCamera;
use crate::node::CameraNode;
use crate::params::Parameter;
use crate::transport::ChannelTransport;
use crate::types::{Buffer, BufferId, BufferList, Frame, PixelFormat};

/// Build a frame carrying every buffer a full schema mask plus a color imager
/// would deliver, at the given resolution.
pub fn sample_frame(width: u32, height: u32) -> Frame {
    let pixels = (width * height) as usize;
    let ramp: Vec<f32> = (0..pixels).map(|i| (i % 1000) as f32 / 1000.0).collect();
    let xyz: Vec<u8> = (0..pixels)
        .flat_map(|i| {
            let x = (i as u32 % width) as i16;
            let y = (i as u32 / width) as i16;
            [x, y, 1000i16]
        })
        .flat_map(|v| v.to_le_bytes())
        .collect();

    let build = || -> Result<Frame, crate::DeviceError> {
        Ok(Frame::new(SystemTime::now(), 1)
            .with_buffer(BufferId::RadialDistanceImage, Buffer::from_f32(width, height, 1, &ramp)?)
            .with_buffer(BufferId::NormAmplitudeImage, Buffer::from_f32(width, height, 1, &ramp)?)
            .with_buffer(
                BufferId::AmplitudeImage,
                Buffer::new(width, height, 1, PixelFormat::U16, vec![0u8; pixels * 2])?,
            )
            .with_buffer(BufferId::Xyz, Buffer::new(width, height, 3, PixelFormat::I16, xyz)?)
            .with_buffer(
                BufferId::ConfidenceImage,
                Buffer::new(width, height, 1, PixelFormat::U8, vec![0u8; pixels])?,
            )
            .with_buffer(BufferId::ExtrinsicCalib, Buffer::from_f32(6, 1, 1, &[0.0; 6])?)
            .with_buffer(BufferId::JpegImage, Buffer::blob(vec![0xff, 0xd8, 0xff, 0xd9])))
    };
    build().unwrap_or_else(|e| panic!("sample frame layout is consistent: {}", e))
}

/// A node named `camera` wired to `camera` and a fresh transport.
pub fn simulated_node(
    camera: &SimulatedCamera,
    overrides: &[Parameter],
) -> (CameraNode, Arc<ChannelTransport>) {
    let transport = Arc::new(ChannelTransport::default());
    let node = CameraNode::new("camera", overrides, Arc::new(camera.clone()), transport.clone())
        .unwrap_or_else(|e| panic!("node construction failed: {}", e));
    (node, transport)
}

/// Connector over a simulated camera whose frame grabbers panic once they
/// have delivered `frames` frames.
#[derive(Clone)]
pub struct CrashingCamera {
    pub camera: SimulatedCamera,
    pub frames: u64,
}

#[async_trait::async_trait]
impl Connector for CrashingCamera {
    async fn connect(&self, identity: &CameraIdentity) -> Result<Box<dyn Device>, DeviceError> {
        let device = self.camera.connect(identity).await?;
        Ok(Box::new(CrashingDevice { device, frames: self.frames }))
    }
}

struct CrashingDevice {
    device: Box<dyn Device>,
    frames: u64,
}

#[async_trait::async_trait]
impl Device for CrashingDevice {
    async fn sync_clock(&mut self, now: SystemTime) -> Result<(), DeviceError> {
        self.device.sync_clock(now).await
    }

    async fn frame_grabber(
        &mut self,
        pcic_port: u16,
        buffers: &BufferList,
    ) -> Result<Box<dyn FrameGrabber>, DeviceError> {
        let grabber = self.device.frame_grabber(pcic_port, buffers).await?;
        Ok(Box::new(CrashingGrabber { grabber, remaining: self.frames }))
    }

    async fn dump(&mut self) -> Result<String, DeviceError> {
        self.device.dump().await
    }

    async fn configure(&mut self, config: &str) -> Result<(), DeviceError> {
        self.device.configure(config).await
    }

    async fn soft_on(&mut self) -> Result<(), DeviceError> {
        self.device.soft_on().await
    }

    async fn soft_off(&mut self) -> Result<(), DeviceError> {
        self.device.soft_off().await
    }

    async fn disconnect(&mut self) {
        self.device.disconnect().await
    }
}

struct CrashingGrabber {
    grabber: Box<dyn FrameGrabber>,
    remaining: u64,
}

#[async_trait::async_trait]
impl FrameGrabber for CrashingGrabber {
    async fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.remaining == 0 {
            panic!("frame grabber crashed");
        }
        self.remaining -= 1;
        self.grabber.next_frame().await
    }

    async fn stop(&mut self) {
        self.grabber.stop().await
    }
}
