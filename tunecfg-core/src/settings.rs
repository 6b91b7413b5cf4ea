//! Settings for the tool itself (not for recipes).
//!
//! Layered with figment: defaults, then the user config file, then the
//! workspace `.tunecfg/config.toml`, then `TUNECFG_*` environment variables,
//! then explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::interpolate::InterpolationOptions;
use crate::recipe::RecipeKind;

/// Workspace-relative settings directory.
pub const WORKSPACE_DIR: &str = ".tunecfg";
pub const SETTINGS_FILE: &str = "config.toml";

/// How resolved documents are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid {
                key: "output_format".to_string(),
                message: format!("unknown output format '{}' (expected yaml or json)", other),
            }),
        }
    }
}

/// Tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunecfgSettings {
    /// Directories searched by `ls`.
    #[serde(default = "default_recipe_dirs")]
    pub recipe_dirs: Vec<PathBuf>,
    /// Treat validation warnings as errors.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Allow `${oc.env:...}` lookups.
    #[serde(default = "default_allow_env")]
    pub allow_env: bool,
    /// Recipe kind used instead of auto-detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_kind: Option<RecipeKind>,
}

fn default_recipe_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("recipes/configs")]
}

fn default_allow_env() -> bool {
    true
}

impl Default for TunecfgSettings {
    fn default() -> Self {
        Self {
            recipe_dirs: default_recipe_dirs(),
            strict: false,
            output_format: OutputFormat::default(),
            allow_env: default_allow_env(),
            default_kind: None,
        }
    }
}

impl TunecfgSettings {
    pub fn interpolation(&self) -> InterpolationOptions {
        InterpolationOptions {
            allow_env: self.allow_env,
            ..Default::default()
        }
    }

    /// Recipe directories made absolute against `workspace`.
    pub fn resolved_recipe_dirs(&self, workspace: &Path) -> Vec<PathBuf> {
        self.recipe_dirs
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    workspace.join(dir)
                }
            })
            .collect()
    }

    /// Problems that deserialization alone cannot catch.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.recipe_dirs.is_empty() {
            warnings.push("recipe_dirs is empty; `ls` will find nothing".to_string());
        }
        if self.recipe_dirs.iter().any(|d| d.as_os_str().is_empty()) {
            warnings.push("recipe_dirs contains an empty path".to_string());
        }
        warnings
    }
}

fn user_settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "tunecfg", "tunecfg")
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}

/// `<workspace>/.tunecfg/config.toml`.
pub fn workspace_settings_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(SETTINGS_FILE)
}

/// Load settings from every layer.
///
/// `explicit_file` (TOML, or JSON by extension) is merged after the
/// workspace file and before the environment.
pub fn load_settings(
    workspace: Option<&Path>,
    explicit_file: Option<&Path>,
    overrides: Option<&TunecfgSettings>,
) -> Result<TunecfgSettings, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TunecfgSettings::default()));

    if let Some(user_file) = user_settings_path() {
        if user_file.exists() {
            figment = figment.merge(Toml::file(&user_file));
        }
    }

    if let Some(ws) = workspace {
        let ws_file = workspace_settings_path(ws);
        if ws_file.exists() {
            figment = figment.merge(Toml::file(&ws_file));
        }
    }

    if let Some(file) = explicit_file {
        let is_json = file.extension().is_some_and(|ext| ext == "json");
        figment = if is_json {
            figment.merge(Json::file(file))
        } else {
            figment.merge(Toml::file(file))
        };
    }

    // TUNECFG_STRICT=true, TUNECFG_OUTPUT_FORMAT=json, ...
    figment = figment.merge(Env::prefixed("TUNECFG_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let settings: TunecfgSettings = figment.extract().map_err(Box::new)?;
    tracing::debug!(
        recipe_dirs = settings.recipe_dirs.len(),
        strict = settings.strict,
        "Settings loaded"
    );
    Ok(settings)
}

/// Whether a user-level or workspace-level settings file exists.
pub fn settings_exist(workspace: Option<&Path>) -> bool {
    if user_settings_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_settings_path(ws).exists())
}
