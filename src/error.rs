//! Error types for the camera node.
//!
//! Two layers of errors exist:
//!
//! - [`DeviceError`] is what the device layer (connector, device, frame grabber)
//!   reports. Each variant carries a numeric [`DeviceError::code`] that endpoint
//!   responses surface to callers.
//! - [`NodeError`] is what the node reports to whoever drives it. Its variants
//!   follow how a fault is delivered:
//!
//! | Variant | Raised by | Delivery |
//! |---|---|---|
//! | `Config` | bad parameter value | synchronous, state unchanged |
//! | `Connect` | device unreachable or rejecting during configure | failed transition |
//! | `Stream` | sustained timeouts or decode failure while active | asynchronous, drives the error transition |
//! | `NoSession` | endpoint called without a session | failure response, state unchanged |
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use tofcam::NodeError;
//!
//! let error = NodeError::config("pcic_port", "must be in 1..=65535");
//! if !error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::node::{State, Transition};

/// Result type alias for node operations.
pub type Result<T, E = NodeError> = std::result::Result<T, E>;

/// Errors reported by the device layer.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Failed to connect to camera at {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Camera rejected configuration: {reason}")]
    ConfigRejected { reason: String },

    #[error("No frame received within {duration:?}")]
    Timeout { duration: Duration },

    #[error("Failed to decode frame: {details}")]
    Decode { details: String },

    #[error("Device command '{command}' failed ({code}): {reason}")]
    Command { command: String, code: i32, reason: String },

    #[error("Device session is closed")]
    Closed,
}

impl DeviceError {
    /// Returns whether the acquisition loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::ConnectFailed { .. } => true,
            DeviceError::Timeout { .. } => true,
            DeviceError::ConfigRejected { .. } => false,
            DeviceError::Decode { .. } => false,
            DeviceError::Command { .. } => false,
            DeviceError::Closed => false,
        }
    }

    /// Numeric code reported in endpoint responses. Never 0 or -1, which are
    /// reserved for success and "no session".
    pub fn code(&self) -> i32 {
        match self {
            DeviceError::ConnectFailed { .. } => -100,
            DeviceError::ConfigRejected { .. } => -101,
            DeviceError::Timeout { .. } => -102,
            DeviceError::Decode { .. } => -103,
            DeviceError::Command { code, .. } if *code != 0 && *code != -1 => *code,
            DeviceError::Command { .. } => -104,
            DeviceError::Closed => -105,
        }
    }

    /// Helper constructor for connection failures.
    pub fn connect_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::ConnectFailed { address: address.into(), reason: reason.into() }
    }

    /// Helper constructor for rejected configuration.
    pub fn config_rejected(reason: impl Into<String>) -> Self {
        DeviceError::ConfigRejected { reason: reason.into() }
    }

    /// Helper constructor for decode failures.
    pub fn decode(details: impl Into<String>) -> Self {
        DeviceError::Decode { details: details.into() }
    }
}

/// Main error type for node operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NodeError {
    #[error("Invalid parameter '{name}': {reason}")]
    Config { name: String, reason: String },

    #[error("Failed to open camera session")]
    Connect {
        #[source]
        source: DeviceError,
    },

    #[error("Acquisition failed: {reason}")]
    Stream {
        reason: String,
        #[source]
        source: Option<DeviceError>,
    },

    #[error("No camera session is open")]
    NoSession,

    #[error("Transition '{transition}' is not valid from state {state}")]
    InvalidTransition { transition: Transition, state: State },

    #[error("Parameter file {path}: {details}")]
    ParameterFile { path: PathBuf, details: String },
}

impl NodeError {
    /// Returns whether retrying the failed operation can succeed without
    /// changing its inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Config { .. } => false,
            NodeError::Connect { source } => source.is_retryable(),
            NodeError::Stream { .. } => true,
            NodeError::NoSession => true,
            NodeError::InvalidTransition { .. } => false,
            NodeError::ParameterFile { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            NodeError::Config { .. } => vec![
                "Check the parameter type and range",
                "List current values with the node's parameter accessor",
            ],
            NodeError::Connect { .. } => vec![
                "Verify the camera address and control port",
                "Check network connectivity to the camera",
                "Verify the password and the requested schema mask",
                "Configure again once the fault is removed",
            ],
            NodeError::Stream { .. } => vec![
                "Check the camera is powered and streaming (softon)",
                "Increase timeout_tolerance_secs on lossy links",
                "Configure again to recover from the error state",
            ],
            NodeError::NoSession => {
                vec!["Configure the node before calling device endpoints"]
            }
            NodeError::InvalidTransition { .. } => vec![
                "Check the current state before requesting a transition",
                "Follow configure, activate, deactivate, cleanup order",
            ],
            NodeError::ParameterFile { .. } => vec![
                "Check the file exists and is valid YAML",
                "Place values under <node>.ros__parameters",
            ],
        }
    }

    /// Helper constructor for parameter errors.
    pub fn config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError::Config { name: name.into(), reason: reason.into() }
    }

    /// Helper constructor for acquisition failures.
    pub fn stream(reason: impl Into<String>, source: Option<DeviceError>) -> Self {
        NodeError::Stream { reason: reason.into(), source }
    }

    /// Helper constructor for parameter file errors.
    pub fn parameter_file(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        NodeError::ParameterFile { path: path.into(), details: details.into() }
    }
}
