//! ROS 2 style parameter files
//!
//! ```yaml
//! camera:
//!   ros__parameters:
//!     ip: 192.168.0.69
//!     schema_mask: 15
//!     tf:
//!       camera_frame: camera_link
//! ```
//!
//! A file may hold several node sections. The `/**` wildcard section applies to
//! every node and is read first, so a section named after the node (with or
//! without a leading `/`) overrides it. Nested maps are flattened with `.`.

use serde_yaml_ng::{Mapping, Value};
use std::path::Path;
use tracing::debug;

use super::{Parameter, ParameterValue};
use crate::{NodeError, Result};

const PARAMETERS_KEY: &str = "ros__parameters";
const WILDCARD: &str = "/**";

/// Read the parameters addressed to `node_name` from a YAML file.
pub fn load_parameter_file<P: AsRef<Path>>(path: P, node_name: &str) -> Result<Vec<Parameter>> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| NodeError::parameter_file(path, e.to_string()))?;
    let parameters = parse_sections(&yaml, node_name)
        .map_err(|details| NodeError::parameter_file(path, details))?;
    debug!(path = %path.display(), count = parameters.len(), "Loaded parameter file");
    Ok(parameters)
}

/// Parse the parameters addressed to `node_name` from YAML text.
pub fn parse_parameter_yaml(yaml: &str, node_name: &str) -> Result<Vec<Parameter>> {
    parse_sections(yaml, node_name)
        .map_err(|details| NodeError::parameter_file("<inline>", details))
}

fn parse_sections(yaml: &str, node_name: &str) -> std::result::Result<Vec<Parameter>, String> {
    let root: Value = serde_yaml_ng::from_str(yaml).map_err(|e| e.to_string())?;
    let root = match root {
        Value::Mapping(map) => map,
        Value::Null => return Ok(Vec::new()),
        _ => return Err("top level must be a map of node sections".to_string()),
    };

    let bare = node_name.trim_start_matches('/');
    let slashed = format!("/{}", bare);

    let mut parameters = Vec::new();
    for section in [WILDCARD, bare, slashed.as_str()] {
        let Some(node) = root.get(section) else { continue };
        let Some(values) = node.get(PARAMETERS_KEY) else {
            return Err(format!("section '{}' has no {} map", section, PARAMETERS_KEY));
        };
        match values {
            Value::Mapping(map) => flatten("", map, &mut parameters)?,
            Value::Null => {}
            _ => return Err(format!("{} of '{}' must be a map", PARAMETERS_KEY, section)),
        }
    }
    Ok(parameters)
}

fn flatten(
    prefix: &str,
    map: &Mapping,
    out: &mut Vec<Parameter>,
) -> std::result::Result<(), String> {
    for (key, value) in map {
        let key = match key {
            Value::String(s) => s.clone(),
            other => return Err(format!("parameter names must be strings, got {:?}", other)),
        };
        let name = if prefix.is_empty() { key } else { format!("{}.{}", prefix, key) };

        let value = match value {
            Value::Mapping(nested) => {
                flatten(&name, nested, out)?;
                continue;
            }
            Value::Bool(b) => ParameterValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParameterValue::Integer(i),
                None => match n.as_f64() {
                    Some(f) => ParameterValue::Double(f),
                    None => return Err(format!("'{}' is not a representable number", name)),
                },
            },
            Value::String(s) => ParameterValue::String(s.clone()),
            _ => return Err(format!("'{}' has an unsupported value type", name)),
        };
        out.push(Parameter { name, value });
    }
    Ok(())
}
