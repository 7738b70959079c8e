//! Runtime parameters of the camera node.
//!
//! Parameters arrive as a flat name → value set (constructor overrides, a
//! parameter file, or live change requests) and are only ever merged into
//! [`RuntimeParameters`] through [`reconcile`], which validates each value and
//! decides whether the change needs a new device session.
//!
//! | Name | Type | Default | Applied |
//! |---|---|---|---|
//! | `ip` | string | `192.168.0.69` | restart |
//! | `xmlrpc_port` | integer | `80` | restart |
//! | `password` | string | `""` | restart |
//! | `schema_mask` | integer | `0xf` | restart |
//! | `timeout_millis` | integer | `500` | restart |
//! | `timeout_tolerance_secs` | double | `5.0` | restart |
//! | `frame_latency_thresh` | double | `1.0` | live |
//! | `sync_clocks` | bool | `false` | live (next session) |
//! | `pcic_port` | integer | `50010` | restart |
//! | `camera_frame` | string | `<node>_link` | live |
//! | `optical_frame` | string | `<node>_optical_link` | live |

mod file;
mod reconcile;

pub use file::{load_parameter_file, parse_parameter_yaml};
pub use reconcile::{Reconciliation, Rejection, reconcile};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::device::CameraIdentity;
use crate::types::SchemaMask;

/// A dynamically typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

impl ParameterValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Integer(_) => "integer",
            ParameterValue::Double(_) => "double",
            ParameterValue::String(_) => "string",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Integer(v) => write!(f, "{}", v),
            ParameterValue::Double(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Integer(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Double(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::String(v)
    }
}

/// A named parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ParameterValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// How a parameter change takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Applied immediately, no transition needed
    Live,
    /// Needs the session to be torn down and recreated
    Restart,
}

/// The known parameter fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Ip,
    XmlrpcPort,
    Password,
    SchemaMask,
    TimeoutMillis,
    TimeoutToleranceSecs,
    FrameLatencyThresh,
    SyncClocks,
    PcicPort,
    CameraFrame,
    OpticalFrame,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Ip,
        Field::XmlrpcPort,
        Field::Password,
        Field::SchemaMask,
        Field::TimeoutMillis,
        Field::TimeoutToleranceSecs,
        Field::FrameLatencyThresh,
        Field::SyncClocks,
        Field::PcicPort,
        Field::CameraFrame,
        Field::OpticalFrame,
    ];

    /// Parameter name as exposed on the configuration surface.
    pub const fn name(&self) -> &'static str {
        match self {
            Field::Ip => "ip",
            Field::XmlrpcPort => "xmlrpc_port",
            Field::Password => "password",
            Field::SchemaMask => "schema_mask",
            Field::TimeoutMillis => "timeout_millis",
            Field::TimeoutToleranceSecs => "timeout_tolerance_secs",
            Field::FrameLatencyThresh => "frame_latency_thresh",
            Field::SyncClocks => "sync_clocks",
            Field::PcicPort => "pcic_port",
            Field::CameraFrame => "camera_frame",
            Field::OpticalFrame => "optical_frame",
        }
    }

    /// Look up a field by name. `tf.`-prefixed frame names are accepted as aliases.
    pub fn from_name(name: &str) -> Option<Field> {
        match name {
            "tf.camera_frame" => return Some(Field::CameraFrame),
            "tf.optical_frame" => return Some(Field::OpticalFrame),
            _ => {}
        }
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    pub const fn apply_mode(&self) -> ApplyMode {
        match self {
            Field::FrameLatencyThresh
            | Field::SyncClocks
            | Field::CameraFrame
            | Field::OpticalFrame => ApplyMode::Live,
            Field::Ip
            | Field::XmlrpcPort
            | Field::Password
            | Field::SchemaMask
            | Field::TimeoutMillis
            | Field::TimeoutToleranceSecs
            | Field::PcicPort => ApplyMode::Restart,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated parameter values the node runs with.
///
/// Read by the device session and the acquisition loop under the session lock.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParameters {
    pub ip: String,
    pub xmlrpc_port: u16,
    pub password: String,
    pub schema_mask: SchemaMask,
    pub timeout_millis: u32,
    pub timeout_tolerance_secs: f64,
    pub frame_latency_thresh: f64,
    pub sync_clocks: bool,
    pub pcic_port: u16,
    pub camera_frame: String,
    pub optical_frame: String,
}

impl RuntimeParameters {
    /// Defaults for a node called `node_name`; frame ids derive from the name.
    pub fn for_node(node_name: &str) -> Self {
        let base = node_name.trim_start_matches('/');
        Self {
            ip: "192.168.0.69".to_string(),
            xmlrpc_port: 80,
            password: String::new(),
            schema_mask: SchemaMask::DEFAULT,
            timeout_millis: 500,
            timeout_tolerance_secs: 5.0,
            frame_latency_thresh: 1.0,
            sync_clocks: false,
            pcic_port: 50010,
            camera_frame: format!("{}_link", base),
            optical_frame: format!("{}_optical_link", base),
        }
    }

    /// Identity of the camera these parameters point at.
    pub fn identity(&self) -> CameraIdentity {
        CameraIdentity {
            address: self.ip.clone(),
            port: self.xmlrpc_port,
            password: self.password.clone(),
        }
    }

    /// Bound on a single frame wait.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis as u64)
    }

    /// Longest gap without a good frame before the stream counts as failed.
    pub fn timeout_tolerance(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_tolerance_secs)
    }

    /// Frame age above which a staleness warning is emitted.
    pub fn frame_latency_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.frame_latency_thresh)
    }

    /// Current value of a field.
    pub fn get(&self, field: Field) -> ParameterValue {
        match field {
            Field::Ip => self.ip.clone().into(),
            Field::XmlrpcPort => (self.xmlrpc_port as i64).into(),
            Field::Password => self.password.clone().into(),
            Field::SchemaMask => (self.schema_mask.value() as i64).into(),
            Field::TimeoutMillis => (self.timeout_millis as i64).into(),
            Field::TimeoutToleranceSecs => self.timeout_tolerance_secs.into(),
            Field::FrameLatencyThresh => self.frame_latency_thresh.into(),
            Field::SyncClocks => self.sync_clocks.into(),
            Field::PcicPort => (self.pcic_port as i64).into(),
            Field::CameraFrame => self.camera_frame.clone().into(),
            Field::OpticalFrame => self.optical_frame.clone().into(),
        }
    }

    /// All fields as a flat parameter list.
    pub fn to_parameters(&self) -> Vec<Parameter> {
        Field::ALL
            .into_iter()
            .map(|field| Parameter { name: field.name().to_string(), value: self.get(field) })
            .collect()
    }
}
