//! Request/response endpoints for device commands
//!
//! Endpoints run against the open session under the session lock only. They
//! never change the lifecycle state and report failures in the response
//! `status` instead of returning an error.

use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tokio::sync::{MappedMutexGuard, MutexGuard};
use tracing::{debug, warn};

use super::CameraNode;
use crate::DeviceError;
use crate::session::Session;

/// Status of a successful request.
pub const STATUS_OK: i32 = 0;
/// Status of a request made without an open session.
pub const STATUS_NO_SESSION: i32 = -1;

const NO_SESSION_MSG: &str = "No camera session is open; configure the node first";

/// Response of the dump endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpResponse {
    pub status: i32,
    /// Device configuration as JSON, empty on failure
    pub config: String,
}

/// Request of the config endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// JSON configuration to apply
    pub json: String,
}

impl ConfigRequest {
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }
}

/// Response of the config, softon and softoff endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: i32,
    pub msg: String,
}

pub type ConfigResponse = CommandResponse;
pub type SoftonResponse = CommandResponse;
pub type SoftoffResponse = CommandResponse;

impl CommandResponse {
    fn ok() -> Self {
        Self { status: STATUS_OK, msg: "OK".to_string() }
    }

    fn no_session() -> Self {
        Self { status: STATUS_NO_SESSION, msg: NO_SESSION_MSG.to_string() }
    }

    fn from_result(command: &str, result: Result<(), DeviceError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => {
                warn!(command, code = e.code(), "Device command failed: {}", e);
                Self { status: e.code(), msg: e.to_string() }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl CameraNode {
    /// Read the device configuration.
    pub async fn dump(&self) -> DumpResponse {
        let Some(mut session) = self.lock_session("dump").await else {
            return DumpResponse { status: STATUS_NO_SESSION, config: String::new() };
        };
        match session.dump().await {
            Ok(config) => DumpResponse { status: STATUS_OK, config },
            Err(e) => {
                warn!(node = %self.name(), code = e.code(), "Dump failed: {}", e);
                DumpResponse { status: e.code(), config: String::new() }
            }
        }
    }

    /// Apply a JSON configuration to the device.
    pub async fn config(&self, request: ConfigRequest) -> ConfigResponse {
        let Some(mut session) = self.lock_session("config").await else {
            return CommandResponse::no_session();
        };
        CommandResponse::from_result("config", session.apply_config(&request.json).await)
    }

    /// Put the device into streaming mode.
    pub async fn softon(&self) -> SoftonResponse {
        let Some(mut session) = self.lock_session("softon").await else {
            return CommandResponse::no_session();
        };
        CommandResponse::from_result("softon", session.soft_on().await)
    }

    /// Take the device out of streaming mode.
    pub async fn softoff(&self) -> SoftoffResponse {
        let Some(mut session) = self.lock_session("softoff").await else {
            return CommandResponse::no_session();
        };
        CommandResponse::from_result("softoff", session.soft_off().await)
    }

    /// Lock the open session, or return `None` without waiting on any lock
    /// when there is no session.
    async fn lock_session(&self, command: &str) -> Option<MappedMutexGuard<'_, Session>> {
        if !self.inner.session_open.load(Ordering::SeqCst) {
            debug!(node = %self.name(), command, "Rejected, no session");
            return None;
        }

        let slot = self.inner.slot.lock().await;
        match MutexGuard::try_map(slot, |slot| slot.session.as_mut()) {
            Ok(session) => {
                debug!(node = %self.name(), command, "Running device command");
                Some(session)
            }
            Err(_) => {
                debug!(node = %self.name(), command, "Rejected, session closed meanwhile");
                None
            }
        }
    }
}
