//! Validation and classification of parameter change requests

use std::fmt;

use super::{ApplyMode, Field, Parameter, ParameterValue, RuntimeParameters};
use crate::NodeError;
use crate::types::SchemaMask;

/// Upper bound for durations given in seconds (one year).
const MAX_SECONDS: f64 = 31_536_000.0;

/// A requested value that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Outcome of reconciling a change request against the current parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Current parameters with every accepted value applied
    pub accepted: RuntimeParameters,
    /// Whether an accepted restart-required field changed value
    pub requires_restart: bool,
    /// Fields whose value actually changed
    pub changed: Vec<Field>,
    /// Entries that failed validation
    pub rejected: Vec<Rejection>,
}

impl Reconciliation {
    /// Whether every requested entry was accepted.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Human-readable summary of the rejections.
    pub fn rejection_summary(&self) -> String {
        self.rejected.iter().map(Rejection::to_string).collect::<Vec<_>>().join("; ")
    }

    /// Accepted parameters if nothing was rejected, otherwise the first rejection.
    pub fn into_result(self) -> crate::Result<RuntimeParameters> {
        match self.rejected.into_iter().next() {
            Some(rejection) => Err(NodeError::config(rejection.name, rejection.reason)),
            None => Ok(self.accepted),
        }
    }
}

/// Validate `requested` against static constraints and merge the valid entries
/// into a copy of `current`.
///
/// Invalid entries are collected in [`Reconciliation::rejected`]; valid entries in
/// the same request are still applied. Later entries for the same name win.
pub fn reconcile(current: &RuntimeParameters, requested: &[Parameter]) -> Reconciliation {
    let mut accepted = current.clone();
    let mut rejected = Vec::new();

    for parameter in requested {
        let Some(field) = Field::from_name(&parameter.name) else {
            rejected.push(Rejection {
                name: parameter.name.clone(),
                reason: "unknown parameter".to_string(),
            });
            continue;
        };

        if let Err(reason) = apply(&mut accepted, field, &parameter.value) {
            rejected.push(Rejection { name: parameter.name.clone(), reason });
        }
    }

    let changed: Vec<Field> =
        Field::ALL.into_iter().filter(|f| current.get(*f) != accepted.get(*f)).collect();
    let requires_restart = changed.iter().any(|f| f.apply_mode() == ApplyMode::Restart);

    Reconciliation { accepted, requires_restart, changed, rejected }
}

fn apply(
    params: &mut RuntimeParameters,
    field: Field,
    value: &ParameterValue,
) -> Result<(), String> {
    match field {
        Field::Ip => params.ip = non_empty_string(value)?,
        Field::XmlrpcPort => params.xmlrpc_port = port(value)?,
        Field::Password => params.password = string(value)?,
        Field::SchemaMask => {
            let mask = integer_in(value, 0, u16::MAX as i64)?;
            params.schema_mask = SchemaMask::new(mask as u16);
        }
        Field::TimeoutMillis => {
            params.timeout_millis = integer_in(value, 1, u32::MAX as i64)? as u32;
        }
        Field::TimeoutToleranceSecs => params.timeout_tolerance_secs = positive_seconds(value)?,
        Field::FrameLatencyThresh => params.frame_latency_thresh = positive_seconds(value)?,
        Field::SyncClocks => match value {
            ParameterValue::Bool(v) => params.sync_clocks = *v,
            other => return Err(type_mismatch("bool", other)),
        },
        Field::PcicPort => params.pcic_port = port(value)?,
        Field::CameraFrame => params.camera_frame = non_empty_string(value)?,
        Field::OpticalFrame => params.optical_frame = non_empty_string(value)?,
    }
    Ok(())
}

fn type_mismatch(expected: &str, value: &ParameterValue) -> String {
    format!("expected {}, got {}", expected, value.type_name())
}

fn string(value: &ParameterValue) -> Result<String, String> {
    match value {
        ParameterValue::String(s) => Ok(s.clone()),
        other => Err(type_mismatch("string", other)),
    }
}

fn non_empty_string(value: &ParameterValue) -> Result<String, String> {
    let s = string(value)?;
    if s.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(s.trim().to_string())
}

fn integer_in(value: &ParameterValue, min: i64, max: i64) -> Result<i64, String> {
    match value {
        ParameterValue::Integer(v) if (min..=max).contains(v) => Ok(*v),
        ParameterValue::Integer(v) => Err(format!("{} is outside {}..={}", v, min, max)),
        other => Err(type_mismatch("integer", other)),
    }
}

fn port(value: &ParameterValue) -> Result<u16, String> {
    integer_in(value, 1, u16::MAX as i64).map(|v| v as u16)
}

fn positive_seconds(value: &ParameterValue) -> Result<f64, String> {
    let secs = match value {
        ParameterValue::Double(v) => *v,
        ParameterValue::Integer(v) => *v as f64,
        other => return Err(type_mismatch("double", other)),
    };
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_SECONDS {
        return Err(format!("{} is outside (0, {}] seconds", secs, MAX_SECONDS));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn defaults() -> RuntimeParameters {
        RuntimeParameters::for_node("camera")
    }

    #[test]
    fn live_fields_do_not_require_restart() {
        let result = reconcile(
            &defaults(),
            &[
                Parameter::new("frame_latency_thresh", 0.25),
                Parameter::new("camera_frame", "base_camera"),
                Parameter::new("sync_clocks", true),
            ],
        );
        assert!(result.is_clean());
        assert!(!result.requires_restart);
        assert_eq!(result.accepted.frame_latency_thresh, 0.25);
        assert_eq!(result.accepted.camera_frame, "base_camera");
        assert!(result.accepted.sync_clocks);
        assert_eq!(result.changed.len(), 3);
    }

    #[test]
    fn restart_fields_require_restart() {
        for parameter in [
            Parameter::new("ip", "10.0.0.7"),
            Parameter::new("xmlrpc_port", 8080i64),
            Parameter::new("password", "hunter2"),
            Parameter::new("schema_mask", 1i64),
            Parameter::new("timeout_millis", 100i64),
            Parameter::new("timeout_tolerance_secs", 2.5),
            Parameter::new("pcic_port", 50011i64),
        ] {
            let result = reconcile(&defaults(), std::slice::from_ref(&parameter));
            assert!(result.is_clean(), "{} should be accepted", parameter.name);
            assert!(result.requires_restart, "{} should require restart", parameter.name);
        }
    }

    #[test]
    fn unchanged_restart_field_does_not_require_restart() {
        let result = reconcile(&defaults(), &[Parameter::new("ip", "192.168.0.69")]);
        assert!(result.is_clean());
        assert!(!result.requires_restart);
        assert!(result.changed.is_empty());
    }

    #[test]
    fn accepted_and_rejected_entries_coexist() {
        let result = reconcile(
            &defaults(),
            &[
                Parameter::new("pcic_port", 70000i64),
                Parameter::new("optical_frame", "lens"),
                Parameter::new("ip", ""),
                Parameter::new("exposure_time", 1000i64),
            ],
        );
        assert_eq!(result.rejected.len(), 3);
        assert_eq!(result.accepted.optical_frame, "lens");
        assert_eq!(result.accepted.pcic_port, 50010);
        assert_eq!(result.accepted.ip, "192.168.0.69");
        assert!(!result.requires_restart);
        assert!(result.rejection_summary().contains("pcic_port"));
        assert!(result.rejection_summary().contains("unknown parameter"));
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let result = reconcile(
            &defaults(),
            &[Parameter::new("sync_clocks", 1i64), Parameter::new("schema_mask", "15")],
        );
        assert_eq!(result.rejected.len(), 2);
        assert!(result.rejected[0].reason.contains("expected bool"));
    }

    #[test]
    fn seconds_accept_integers_but_not_zero() {
        let result = reconcile(&defaults(), &[Parameter::new("timeout_tolerance_secs", 3i64)]);
        assert_eq!(result.accepted.timeout_tolerance_secs, 3.0);

        let result = reconcile(&defaults(), &[Parameter::new("frame_latency_thresh", 0.0)]);
        assert_eq!(result.rejected.len(), 1);
        let result = reconcile(&defaults(), &[Parameter::new("frame_latency_thresh", f64::NAN)]);
        assert_eq!(result.rejected.len(), 1);
    }

    #[test]
    fn into_result_surfaces_first_rejection() {
        let err = reconcile(&defaults(), &[Parameter::new("timeout_millis", 0i64)])
            .into_result()
            .unwrap_err();
        assert!(matches!(err, NodeError::Config { ref name, .. } if name == "timeout_millis"));
    }

    proptest! {
        #[test]
        fn prop_ports_validate_range(port in any::<i64>()) {
            let result = reconcile(&defaults(), &[Parameter::new("pcic_port", port)]);
            let valid = (1..=65535).contains(&port);
            prop_assert_eq!(result.is_clean(), valid);
            if valid {
                prop_assert_eq!(result.accepted.pcic_port as i64, port);
            } else {
                prop_assert_eq!(result.accepted.pcic_port, 50010);
            }
        }

        #[test]
        fn prop_schema_mask_changes_require_restart(mask in 0i64..=65535) {
            let result = reconcile(&defaults(), &[Parameter::new("schema_mask", mask)]);
            prop_assert!(result.is_clean());
            prop_assert_eq!(result.requires_restart, mask != 0xf);
        }

        #[test]
        fn prop_live_changes_never_restart(thresh in 0.001f64..100.0, frame in "[a-z_]{1,12}") {
            let result = reconcile(
                &defaults(),
                &[
                    Parameter::new("frame_latency_thresh", thresh),
                    Parameter::new("camera_frame", frame),
                ],
            );
            prop_assert!(result.is_clean());
            prop_assert!(!result.requires_restart);
        }
    }
}
