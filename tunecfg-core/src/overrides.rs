//! Command-line style overrides.
//!
//! `key.path=value` sets a value (parsed as a YAML flow scalar), `~key.path`
//! deletes a key. Assigning a plain string to a component group rewrites the
//! group's `_component_` instead of replacing the whole group, so
//! `optimizer=torch.optim.SGD` keeps the other optimizer arguments.

use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;

use crate::component::COMPONENT_KEY;
use crate::error::{OverrideError, PathError};
use crate::tree::{self, KeyPath};

/// A single parsed override.
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    Set { key: KeyPath, value: Value, raw: String },
    Delete { key: KeyPath, raw: String },
}

impl Override {
    pub fn parse(raw: &str) -> Result<Self, OverrideError> {
        let malformed = |reason: String| OverrideError::Malformed {
            raw: raw.to_string(),
            reason,
        };
        let trimmed = raw.trim();

        if let Some(key) = trimmed.strip_prefix('~') {
            if key.contains('=') {
                return Err(malformed("a deletion cannot carry a value".to_string()));
            }
            let key = KeyPath::parse(key.trim()).map_err(|e| malformed(e.to_string()))?;
            return Ok(Self::Delete {
                key,
                raw: raw.to_string(),
            });
        }

        let (key, value) = trimmed
            .split_once('=')
            .ok_or_else(|| malformed("expected 'key=value' or '~key'".to_string()))?;
        let key = KeyPath::parse(key.trim()).map_err(|e| malformed(e.to_string()))?;
        Ok(Self::Set {
            key,
            value: parse_value(value.trim()),
            raw: raw.to_string(),
        })
    }

    pub fn key(&self) -> &KeyPath {
        match self {
            Self::Set { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Set { raw, .. } | Self::Delete { raw, .. } => raw,
        }
    }

    /// Apply this override to `root`.
    pub fn apply(&self, root: &mut Value) -> Result<(), OverrideError> {
        match self {
            Self::Delete { key, raw } => match tree::remove(root, key) {
                Ok(_) => Ok(()),
                Err(PathError::NotFound { .. }) | Err(PathError::IndexOutOfBounds { .. }) => {
                    Err(OverrideError::DeleteMissing {
                        key: key.to_string(),
                    })
                }
                Err(source) => Err(OverrideError::Apply {
                    raw: raw.clone(),
                    source,
                }),
            },
            Self::Set { key, value, raw } => {
                let target = if is_component_swap(root, key, value) {
                    key.child(COMPONENT_KEY)
                } else {
                    key.clone()
                };
                tree::set(root, &target, value.clone()).map_err(|source| OverrideError::Apply {
                    raw: raw.clone(),
                    source,
                })
            }
        }
    }
}

impl FromStr for Override {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

fn is_component_swap(root: &Value, key: &KeyPath, value: &Value) -> bool {
    let Value::String(_) = value else {
        return false;
    };
    tree::select(root, key)
        .and_then(Value::as_mapping)
        .is_some_and(|group| group.contains_key(COMPONENT_KEY))
}

/// Parse an override value. Anything YAML can read as a flow scalar or flow
/// collection keeps its type; everything else, block syntax included, is
/// taken as a string.
pub fn parse_value(text: &str) -> Value {
    if text.is_empty() {
        return Value::String(String::new());
    }
    if text.contains("${") {
        return Value::String(text.to_string());
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Mapping(_)) if !text.trim_start().starts_with('{') => {
            Value::String(text.to_string())
        }
        Ok(Value::Sequence(_)) if !text.trim_start().starts_with('[') => {
            Value::String(text.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(text.to_string()),
    }
}

/// Parse a list of raw overrides, stopping at the first malformed entry.
pub fn parse_all<S: AsRef<str>>(raws: &[S]) -> Result<Vec<Override>, OverrideError> {
    raws.iter().map(|raw| Override::parse(raw.as_ref())).collect()
}

/// Apply overrides in order; later overrides win.
pub fn apply_all(root: &mut Value, overrides: &[Override]) -> Result<(), OverrideError> {
    for item in overrides {
        tracing::debug!(override_ = %item, "Applying override");
        item.apply(root)?;
    }
    Ok(())
}
