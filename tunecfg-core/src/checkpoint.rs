//! Checkpointer sections.
//!
//! `checkpoint_files` is either an explicit list or a formatted spec:
//!
//! ```yaml
//! checkpoint_files:
//!   filename_format: model-{}-of-{}.safetensors
//!   max_filename: "00004"
//! ```
//!
//! which expands to `model-00001-of-00004.safetensors` through
//! `model-00004-of-00004.safetensors`.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::PathBuf;

use crate::component::ComponentRef;
use crate::error::ComponentError;

/// Upper bound on the shard count a formatted spec may expand to.
pub const MAX_SHARDS: usize = 10_000;

/// Formatted checkpoint file spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedCheckpointFiles {
    pub filename_format: String,
    pub max_filename: String,
}

impl FormattedCheckpointFiles {
    /// Expand to concrete file names.
    pub fn expand(&self, key: &str) -> Result<Vec<String>, ComponentError> {
        let invalid = |reason: String| ComponentError::CheckpointFiles {
            key: key.to_string(),
            reason,
        };

        let placeholders = self.filename_format.matches("{}").count();
        if placeholders != 2 {
            return Err(invalid(format!(
                "filename_format '{}' must contain exactly two '{{}}' placeholders, found {}",
                self.filename_format, placeholders
            )));
        }
        if self.max_filename.is_empty() || !self.max_filename.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(format!(
                "max_filename '{}' must be a positive integer string",
                self.max_filename
            )));
        }
        let count: usize = self
            .max_filename
            .parse()
            .map_err(|_| invalid(format!("max_filename '{}' is out of range", self.max_filename)))?;
        if count == 0 {
            return Err(invalid("max_filename must be at least 1".to_string()));
        }
        if count > MAX_SHARDS {
            return Err(invalid(format!(
                "max_filename {} exceeds the limit of {} shards",
                count, MAX_SHARDS
            )));
        }

        let width = self.max_filename.len();
        Ok((1..=count)
            .map(|i| {
                self.filename_format
                    .replacen("{}", &format!("{:0width$}", i, width = width), 1)
                    .replacen("{}", &self.max_filename, 1)
            })
            .collect())
    }
}

/// The two accepted shapes of `checkpoint_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckpointFiles {
    List(Vec<String>),
    Formatted(FormattedCheckpointFiles),
}

impl CheckpointFiles {
    pub fn expand(&self, key: &str) -> Result<Vec<String>, ComponentError> {
        match self {
            Self::List(files) if files.is_empty() => Err(ComponentError::CheckpointFiles {
                key: key.to_string(),
                reason: "checkpoint_files is empty".to_string(),
            }),
            Self::List(files) => Ok(files.clone()),
            Self::Formatted(spec) => spec.expand(key),
        }
    }
}

/// Typed view over a checkpointer group.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointerConfig {
    pub component: ComponentRef,
    pub checkpoint_dir: Option<PathBuf>,
    pub checkpoint_files: Option<CheckpointFiles>,
    pub output_dir: Option<PathBuf>,
    pub model_type: Option<String>,
    pub recipe_checkpoint: Option<PathBuf>,
    pub adapter_checkpoint: Option<PathBuf>,
}

fn path_arg(component: &ComponentRef, name: &str) -> Option<PathBuf> {
    component.arg(name).and_then(Value::as_str).map(PathBuf::from)
}

impl CheckpointerConfig {
    pub fn from_value(key: &str, value: &Value) -> Result<Self, ComponentError> {
        let component = ComponentRef::from_value(key, value)?;
        let checkpoint_files = match component.arg("checkpoint_files") {
            None | Some(Value::Null) => None,
            Some(files) => Some(serde_yaml::from_value(files.clone()).map_err(|e| {
                ComponentError::CheckpointFiles {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        Ok(Self {
            checkpoint_dir: path_arg(&component, "checkpoint_dir"),
            output_dir: path_arg(&component, "output_dir"),
            model_type: component
                .arg("model_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            recipe_checkpoint: path_arg(&component, "recipe_checkpoint"),
            adapter_checkpoint: path_arg(&component, "adapter_checkpoint"),
            checkpoint_files,
            component,
        })
    }

    /// Concrete checkpoint file names, if any were configured.
    pub fn files(&self, key: &str) -> Result<Vec<String>, ComponentError> {
        match &self.checkpoint_files {
            Some(files) => files.expand(key),
            None => Ok(Vec::new()),
        }
    }

    /// Full paths of the checkpoint files under `checkpoint_dir`.
    pub fn file_paths(&self, key: &str) -> Result<Vec<PathBuf>, ComponentError> {
        let dir = self.checkpoint_dir.clone().unwrap_or_default();
        Ok(self.files(key)?.into_iter().map(|f| dir.join(f)).collect())
    }
}
