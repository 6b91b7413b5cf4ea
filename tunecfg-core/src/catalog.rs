//! Recipe catalog: listing and copying recipe files.

use serde::Serialize;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::component::COMPONENT_KEY;
use crate::error::{ConfigError, Result};
use crate::loader;
use crate::recipe::RecipeKind;

/// One recipe file found on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Path relative to the search root, without extension (`qwen2/0.5B_full`).
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecipeKind>,
    /// `_component_` of the policy model (PPO) or model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Why the file could not be read, if it couldn't.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_recipe_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn model_component(root: &Value) -> Option<String> {
    root.get("policy_model")
        .or_else(|| root.get("model"))
        .and_then(|m| m.get(COMPONENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn describe(root: &Path, path: &Path) -> CatalogEntry {
    let name = entry_name(root, path);
    match loader::read_document(path) {
        Ok(doc) => CatalogEntry {
            name,
            path: path.to_path_buf(),
            kind: Some(RecipeKind::detect(&doc)),
            model: model_component(&doc),
            error: None,
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable recipe");
            CatalogEntry {
                name,
                path: path.to_path_buf(),
                kind: None,
                model: None,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Walk `dirs` for `.yaml`/`.yml` files. Missing directories are skipped.
pub fn discover(dirs: &[PathBuf]) -> Vec<CatalogEntry> {
    let mut entries = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "Recipe directory does not exist");
            continue;
        }
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_recipe_file(entry.path()) {
                entries.push(describe(dir, entry.path()));
            }
        }
    }
    entries
}

/// Copy a recipe verbatim. A directory `dest` receives the source file name.
///
/// Returns the path written.
pub fn copy_recipe(src: &Path, dest: &Path, force: bool) -> Result<PathBuf> {
    if !src.is_file() {
        return Err(ConfigError::FileNotFound {
            path: src.to_path_buf(),
        }
        .into());
    }

    let target = if dest.is_dir() {
        match src.file_name() {
            Some(name) => dest.join(name),
            None => dest.to_path_buf(),
        }
    } else {
        dest.to_path_buf()
    };

    if target.exists() && !force {
        return Err(ConfigError::AlreadyExists { path: target }.into());
    }
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::copy(src, &target)?;
    tracing::info!(src = %src.display(), dest = %target.display(), "Recipe copied");
    Ok(target)
}
