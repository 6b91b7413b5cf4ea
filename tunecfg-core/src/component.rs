//! `_component_` groups.
//!
//! A component group names the object the training harness instantiates
//! (`torchtune.models.qwen2.qwen2_0_5b`) and carries its keyword arguments.
//! Component paths are opaque here; only their syntax is checked.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

use crate::error::ComponentError;
use crate::tree::{self, KeyPath};

/// Key naming the component in a group.
pub const COMPONENT_KEY: &str = "_component_";

static COMPONENT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$").expect("valid regex")
});

/// Whether `path` is a dotted import path with at least two segments.
pub fn is_valid_component_path(path: &str) -> bool {
    COMPONENT_PATH.is_match(path)
}

/// A component reference and its keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRef {
    #[serde(rename = "_component_")]
    pub path: String,
    #[serde(flatten)]
    pub args: Mapping,
}

impl ComponentRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Mapping::new(),
        }
    }

    /// Build from a group node, reporting `key` in errors.
    pub fn from_value(key: &str, value: &Value) -> Result<Self, ComponentError> {
        let group = value.as_mapping().ok_or_else(|| ComponentError::Missing {
            key: key.to_string(),
        })?;
        let path = group
            .get(COMPONENT_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ComponentError::Missing {
                key: key.to_string(),
            })?;
        let args = group
            .iter()
            .filter(|(k, _)| k.as_str() != Some(COMPONENT_KEY))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            path: path.to_string(),
            args,
        })
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Last segment of the path, e.g. `AdamW` for `torch.optim.AdamW`.
    pub fn short_name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn check_path(&self, key: &str) -> Result<(), ComponentError> {
        if is_valid_component_path(&self.path) {
            Ok(())
        } else {
            Err(ComponentError::InvalidPath {
                key: key.to_string(),
                path: self.path.clone(),
            })
        }
    }
}

/// A component group found somewhere in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSite {
    pub key: String,
    pub component: String,
}

/// List every component group in document order.
pub fn collect_components(root: &Value) -> Vec<ComponentSite> {
    let mut out = Vec::new();
    collect_into(root, &KeyPath::root(), &mut out);
    out
}

fn collect_into(node: &Value, at: &KeyPath, out: &mut Vec<ComponentSite>) {
    match node {
        Value::Mapping(map) => {
            if let Some(component) = map.get(COMPONENT_KEY) {
                out.push(ComponentSite {
                    key: at.to_string(),
                    component: tree::render_scalar(component).unwrap_or_default(),
                });
            }
            for (k, v) in map {
                collect_into(v, &at.child(tree::key_segment(k)), out);
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                collect_into(v, &at.child(i.to_string()), out);
            }
        }
        _ => {}
    }
}
