//! Device traits for camera backends

use std::fmt;
use std::time::SystemTime;

use crate::DeviceError;
use crate::types::{BufferList, Frame};

/// Address and credential of one camera.
///
/// Immutable for the lifetime of a session; changing any field means a new
/// session has to be opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraIdentity {
    /// Host name or IP address
    pub address: String,
    /// Control (XML-RPC) port
    pub port: u16,
    /// Password for configuration access, empty if none
    pub password: String,
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Factory for device connections.
///
/// Backends abstract over a camera SDK (or a simulation). The node holds one
/// connector for its whole life and asks it for a fresh [`Device`] every time a
/// session is opened.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish the control connection.
    ///
    /// Returns:
    /// - `Err(DeviceError::ConnectFailed)` if the camera cannot be reached
    /// - `Err(DeviceError::ConfigRejected)` if the credential is refused
    async fn connect(&self, identity: &CameraIdentity) -> Result<Box<dyn Device>, DeviceError>;
}

/// An open control connection to one camera.
///
/// Not assumed to be thread-safe: the node serializes every call through its
/// session lock.
#[async_trait::async_trait]
pub trait Device: Send + 'static {
    /// Set the device clock to `now`.
    async fn sync_clock(&mut self, now: SystemTime) -> Result<(), DeviceError>;

    /// Start a frame grabber on the streaming port delivering `buffers`.
    ///
    /// Returns `Err(DeviceError::ConfigRejected)` if the device cannot deliver
    /// the requested buffers.
    async fn frame_grabber(
        &mut self,
        pcic_port: u16,
        buffers: &BufferList,
    ) -> Result<Box<dyn FrameGrabber>, DeviceError>;

    /// Current device configuration as a JSON document.
    async fn dump(&mut self) -> Result<String, DeviceError>;

    /// Apply a JSON configuration document. Either the whole document is
    /// applied or nothing is.
    async fn configure(&mut self, config: &str) -> Result<(), DeviceError>;

    /// Put the device into streaming mode.
    async fn soft_on(&mut self) -> Result<(), DeviceError>;

    /// Take the device out of streaming mode, keeping the connection.
    async fn soft_off(&mut self) -> Result<(), DeviceError>;

    /// Release the connection. Must be safe to call more than once.
    ///
    /// A node dropped outside a tokio runtime cannot call this, so backends
    /// holding external resources should also release them on `Drop`.
    async fn disconnect(&mut self);
}

/// A stream of decoded frames.
#[async_trait::async_trait]
pub trait FrameGrabber: Send + 'static {
    /// Wait for the next frame.
    ///
    /// May wait indefinitely; callers bound the wait with their own timeout and
    /// may drop the future at any await point.
    async fn next_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Stop streaming. Must be safe to call more than once.
    async fn stop(&mut self);
}
