//! # tunecfg Core
//!
//! Core library for working with fine-tuning recipe configs.
//! Provides the document tree, command-line overrides, `${...}` interpolation,
//! the typed recipe view, validation, run planning and the recipe catalog.

pub mod catalog;
pub mod checkpoint;
pub mod component;
pub mod diff;
pub mod error;
pub mod interpolate;
pub mod loader;
pub mod overrides;
pub mod plan;
pub mod precision;
pub mod profiler;
pub mod recipe;
pub mod settings;
pub mod tree;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use catalog::{CatalogEntry, copy_recipe, discover};
pub use checkpoint::{CheckpointFiles, CheckpointerConfig, FormattedCheckpointFiles};
pub use component::{COMPONENT_KEY, ComponentRef, ComponentSite, collect_components};
pub use diff::{Change, ConfigDiff, diff};
pub use error::{Result, TuneError};
pub use interpolate::{InterpolationOptions, resolve};
pub use loader::{LoadOptions, LoadedRecipe, load_raw, load_recipe};
pub use overrides::Override;
pub use plan::{PlanDetail, PlanInputs, RunPlan};
pub use precision::{DeviceSpec, Dtype, LogLevel};
pub use profiler::{ProfilerOutcome, ProfilerSettings};
pub use recipe::{RecipeConfig, RecipeKind};
pub use settings::{OutputFormat, TunecfgSettings, load_settings};
pub use tree::KeyPath;
pub use validate::{Diagnostic, Severity, ValidationOptions, ValidationReport, validate_tree};
