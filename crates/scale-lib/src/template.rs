//! VM template loading and constraint binding
//!
//! The binder is a pure transform over the parsed manifest: it never mutates
//! its input and only overwrites the fields a constraint names, so two
//! disjoint constraint sets can be applied in either order.

use crate::settings::VmConstraints;
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Parse the base VM manifest.
pub fn load_template(path: &Path) -> Result<Value, TemplateError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| TemplateError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Bind a concrete VM manifest from the base template.
///
/// Sets the metadata name and merges only the constraints that are present;
/// everything else keeps its template default.
pub fn bind(template: &Value, name: &str, constraints: &VmConstraints) -> Value {
    let mut manifest = template.clone();
    set_path(
        &mut manifest,
        &["metadata", "name"],
        Value::String(name.to_string()),
    );
    if let Some(node) = &constraints.node_selector {
        set_path(
            &mut manifest,
            &["spec", "template", "spec", "nodeSelector"],
            json!({ "kubernetes.io/hostname": node }),
        );
    }
    if let Some(running) = constraints.running_state {
        set_path(&mut manifest, &["spec", "running"], Value::Bool(running));
    }
    if let Some(cpu) = &constraints.cpu {
        set_path(&mut manifest, &["spec", "domain", "cpu"], cpu.clone());
    }
    if let Some(memory) = &constraints.memory {
        set_path(
            &mut manifest,
            &["spec", "resources", "requests", "memory"],
            Value::String(memory.clone()),
        );
    }
    manifest
}

/// Overwrite the value at a key path, creating intermediate objects as needed.
fn set_path(value: &mut Value, path: &[&str], leaf: Value) {
    match path.split_first() {
        None => *value = leaf,
        Some((head, rest)) => {
            if !value.is_object() {
                *value = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = value {
                let slot = map.entry(head.to_string()).or_insert(Value::Null);
                set_path(slot, rest, leaf);
            }
        }
    }
}
