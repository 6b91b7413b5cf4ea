//! Reading recipe documents from disk.
//!
//! `load_recipe` runs the full pipeline: parse, apply overrides, resolve
//! interpolations and build the typed view.

use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::interpolate::{self, InterpolationOptions};
use crate::overrides::{self, Override};
use crate::recipe::{RecipeConfig, RecipeKind};
use crate::tree;

/// Options for [`load_recipe`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Force a recipe kind instead of detecting it.
    pub kind: Option<RecipeKind>,
    pub interpolation: InterpolationOptions,
}

/// A recipe document after overrides and interpolation.
#[derive(Debug, Clone)]
pub struct LoadedRecipe {
    pub path: PathBuf,
    /// The document after overrides, before interpolation.
    pub raw: Value,
    pub resolved: Value,
    pub config: RecipeConfig,
    pub kind: RecipeKind,
}

impl LoadedRecipe {
    /// SHA-256 of the canonical JSON form of the resolved tree.
    ///
    /// Mapping keys are sorted first, so two documents that differ only in
    /// key order share a fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = canonical_json(&self.resolved)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.resolved).map_err(|e| {
            ConfigError::Invalid {
                key: "<root>".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.resolved)?)
    }

    /// Look up a dotted key in the resolved tree.
    pub fn get(&self, key: &str) -> Option<&Value> {
        tree::select_str(&self.resolved, key)
    }
}

fn canonical_json(value: &Value) -> Result<String> {
    // serde_json::Value keeps object keys sorted without `preserve_order`.
    let json: serde_json::Value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&json)?)
}

/// Read and parse a document without touching it further.
pub fn read_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let text = std::fs::read_to_string(path)?;
    parse_document(&text, path)
}

/// Parse document text; `path` is only used in error messages.
pub fn parse_document(text: &str, path: &Path) -> Result<Value> {
    let value: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match value {
        Value::Mapping(_) => Ok(value),
        // An empty file parses as null.
        Value::Null => Ok(Value::Mapping(Default::default())),
        other => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
            found: tree::type_name(&other).to_string(),
        }
        .into()),
    }
}

/// Read `path` and apply `raw_overrides` (in order), without resolving.
pub fn load_raw<S: AsRef<str>>(path: &Path, raw_overrides: &[S]) -> Result<Value> {
    let mut root = read_document(path)?;
    let parsed: Vec<Override> = overrides::parse_all(raw_overrides)?;
    overrides::apply_all(&mut root, &parsed)?;
    Ok(root)
}

/// Load, override, resolve and type a recipe.
pub fn load_recipe<S: AsRef<str>>(
    path: &Path,
    raw_overrides: &[S],
    options: &LoadOptions,
) -> Result<LoadedRecipe> {
    let raw = load_raw(path, raw_overrides)?;
    from_tree(path, raw, options)
}

/// Finish loading from an already-overridden tree.
pub fn from_tree(path: &Path, raw: Value, options: &LoadOptions) -> Result<LoadedRecipe> {
    let resolved = interpolate::resolve(&raw, &options.interpolation)?;
    let kind = options
        .kind
        .unwrap_or_else(|| RecipeKind::detect(&resolved));
    let config = RecipeConfig::from_value(&resolved)?;

    tracing::info!(
        path = %path.display(),
        kind = %kind,
        keys = tree::flatten(&resolved).len(),
        "Recipe loaded"
    );

    Ok(LoadedRecipe {
        path: path.to_path_buf(),
        raw,
        resolved,
        config,
        kind,
    })
}
