//! Lifecycle-managed acquisition for 3D time-of-flight cameras.
//!
//! tofcam bridges a time-of-flight camera to a publish/subscribe middleware.
//! A [`CameraNode`] owns one camera connection and a background acquisition
//! loop and moves between unconfigured, configured and streaming states under
//! external command, with live reconfiguration and without leaking device
//! resources on any path.
//!
//! # Features
//!
//! - **Lifecycle**: configure, activate, deactivate, cleanup, shutdown, with
//!   asynchronous failure handling into an error state and recovery
//! - **Schema translation**: legacy schema bitmasks to logical buffer lists
//! - **Reconfiguration**: live parameters apply immediately, connection
//!   parameters recreate the session in place
//! - **Endpoints**: dump, config, softon and softoff against the open session
//! - **Pluggable seams**: [`device::Connector`] for camera backends and
//!   [`transport::Transport`] for the middleware
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tofcam::devices::SimulatedCamera;
//! use tofcam::messages::Topic;
//! use tofcam::params::Parameter;
//! use tofcam::transport::ChannelTransport;
//! use tofcam::CameraNode;
//!
//! #[tokio::main]
//! async fn main() -> tofcam::Result<()> {
//!     let transport = Arc::new(ChannelTransport::default());
//!     let node = CameraNode::new(
//!         "camera",
//!         &[Parameter::new("schema_mask", 8i64)],
//!         Arc::new(SimulatedCamera::default()),
//!         transport.clone(),
//!     )?;
//!
//!     let mut clouds = Box::pin(transport.subscribe_topic(Topic::Cloud));
//!     node.configure().await?;
//!     node.activate().await?;
//!
//!     if let Some(cloud) = clouds.next().await {
//!         println!("cloud in {}", cloud.header().frame_id);
//!     }
//!     node.shutdown().await?;
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Configuration
pub mod params;

// Device layer
pub mod device;
pub mod devices;
pub mod session;

// Acquisition and publishing
pub mod acquisition;
pub mod messages;
pub mod stream;
pub mod transport;

// Lifecycle control
pub mod node;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use device::{CameraIdentity, Connector, Device, FrameGrabber};
pub use node::{CameraNode, SetParametersResult, State, Transition};
pub use params::{Parameter, ParameterValue, RuntimeParameters};
pub use transport::{ChannelTransport, Transport};
