//! Device session: one open camera connection with its frame grabber

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use crate::DeviceError;
use crate::device::{CameraIdentity, Connector, Device, FrameGrabber};
use crate::params::RuntimeParameters;
use crate::types::{BufferList, Frame};

/// How a session is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Bound on a single frame wait
    pub timeout: Duration,
    /// Push the system time to the device after connecting
    pub sync_clocks: bool,
    /// Streaming port for the frame grabber
    pub pcic_port: u16,
    /// Buffers the frame grabber delivers
    pub buffers: BufferList,
}

impl SessionOptions {
    /// Options derived from the node's parameters.
    pub fn from_parameters(params: &RuntimeParameters) -> Self {
        Self {
            timeout: params.timeout(),
            sync_clocks: params.sync_clocks,
            pcic_port: params.pcic_port,
            buffers: BufferList::for_acquisition(params.schema_mask),
        }
    }
}

/// An open device connection, its frame grabber and the last received frame.
///
/// Owned by exactly one holder. [`Session::close`] must be called to release
/// the device; it is safe to call on a partially opened or closed session.
pub struct Session {
    identity: CameraIdentity,
    device: Option<Box<dyn Device>>,
    grabber: Option<Box<dyn FrameGrabber>>,
    last_frame: Option<Arc<Frame>>,
    frames_received: u64,
    buffers: BufferList,
    timeout: Duration,
}

impl Session {
    /// Connect and start streaming.
    ///
    /// Whatever was set up before a failure is released before the error is
    /// returned.
    pub async fn open(
        connector: &dyn Connector,
        identity: CameraIdentity,
        options: SessionOptions,
    ) -> Result<Self, DeviceError> {
        debug!(camera = %identity, buffers = %options.buffers, "Opening session");
        let device = connector.connect(&identity).await?;

        let mut session = Session {
            identity,
            device: Some(device),
            grabber: None,
            last_frame: None,
            frames_received: 0,
            buffers: options.buffers.clone(),
            timeout: options.timeout,
        };

        match session.start(&options).await {
            Ok(()) => {
                info!(camera = %session.identity, buffers = %session.buffers, "Session open");
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn start(&mut self, options: &SessionOptions) -> Result<(), DeviceError> {
        let device = self.device_mut()?;
        if options.sync_clocks {
            device.sync_clock(SystemTime::now()).await?;
            debug!("Device clock synchronized");
        }
        let grabber = device.frame_grabber(options.pcic_port, &options.buffers).await?;
        self.grabber = Some(grabber);
        Ok(())
    }

    /// Stop the grabber, disconnect and drop the frame buffer. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut grabber) = self.grabber.take() {
            grabber.stop().await;
        }
        if let Some(mut device) = self.device.take() {
            device.disconnect().await;
            info!(camera = %self.identity, frames = self.frames_received, "Session closed");
        }
        self.last_frame = None;
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    /// Buffers the grabber was asked for.
    pub fn buffers(&self) -> &BufferList {
        &self.buffers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Most recently received frame.
    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.last_frame.clone()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Wait up to the session timeout for one frame.
    pub async fn next_frame(&mut self) -> Result<Arc<Frame>, DeviceError> {
        let timeout = self.timeout;
        let grabber = self.grabber.as_mut().ok_or(DeviceError::Closed)?;
        let frame = tokio::time::timeout(timeout, grabber.next_frame())
            .await
            .map_err(|_| DeviceError::Timeout { duration: timeout })??;

        let frame = Arc::new(frame);
        self.last_frame = Some(Arc::clone(&frame));
        self.frames_received += 1;
        Ok(frame)
    }

    pub async fn soft_on(&mut self) -> Result<(), DeviceError> {
        self.device_mut()?.soft_on().await
    }

    pub async fn soft_off(&mut self) -> Result<(), DeviceError> {
        self.device_mut()?.soft_off().await
    }

    /// Device configuration as JSON.
    pub async fn dump(&mut self) -> Result<String, DeviceError> {
        self.device_mut()?.dump().await
    }

    /// Apply a JSON configuration blob atomically.
    pub async fn apply_config(&mut self, config: &str) -> Result<(), DeviceError> {
        self.device_mut()?.configure(config).await
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn Device>, DeviceError> {
        self.device.as_mut().ok_or(DeviceError::Closed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("open", &self.is_open())
            .field("buffers", &self.buffers)
            .field("frames_received", &self.frames_received)
            .finish()
    }
}
