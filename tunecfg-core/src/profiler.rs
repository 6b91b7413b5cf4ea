//! Profiler section normalisation.
//!
//! A missing section means profiling is off. Only the torch profiler entry
//! point is accepted as `_component_`; everything else gets a default.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::component::COMPONENT_KEY;
use crate::error::ProfilerError;
use crate::tree;

/// The only supported profiler component.
pub const TORCH_PROFILER_COMPONENT: &str = "torchtune.training.setup_torch_profiler";

const DEFAULT_WAIT_STEPS: u64 = 5;
const DEFAULT_WARMUP_STEPS: u64 = 3;
const DEFAULT_ACTIVE_STEPS: u64 = 2;
const DEFAULT_NUM_CYCLES: u64 = 1;

/// Fully-defaulted profiler settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilerSettings {
    #[serde(rename = "_component_")]
    pub component: String,
    pub enabled: bool,
    pub cpu: bool,
    pub cuda: bool,
    pub xpu: bool,
    pub profile_memory: bool,
    pub with_stack: bool,
    pub record_shapes: bool,
    pub with_flops: bool,
    pub wait_steps: u64,
    pub warmup_steps: u64,
    pub active_steps: u64,
    pub num_cycles: u64,
    pub output_dir: PathBuf,
}

impl ProfilerSettings {
    pub fn disabled(output_dir: Option<&str>) -> Self {
        Self {
            component: TORCH_PROFILER_COMPONENT.to_string(),
            enabled: false,
            cpu: true,
            cuda: true,
            xpu: false,
            profile_memory: false,
            with_stack: false,
            record_shapes: true,
            with_flops: false,
            wait_steps: DEFAULT_WAIT_STEPS,
            warmup_steps: DEFAULT_WARMUP_STEPS,
            active_steps: DEFAULT_ACTIVE_STEPS,
            num_cycles: DEFAULT_NUM_CYCLES,
            output_dir: default_output_dir(output_dir),
        }
    }

    /// Steps covered by one profiling cycle.
    pub fn cycle_length(&self) -> u64 {
        self.wait_steps + self.warmup_steps + self.active_steps
    }
}

fn default_output_dir(output_dir: Option<&str>) -> PathBuf {
    match output_dir {
        Some(dir) => PathBuf::from(dir).join("profiling_outputs"),
        None => PathBuf::from("profiler_output"),
    }
}

/// Normalised settings plus notes about adjustments that were made.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerOutcome {
    pub settings: ProfilerSettings,
    pub notes: Vec<String>,
}

fn read_bool(section: &Mapping, field: &str, default: bool) -> Result<bool, ProfilerError> {
    match section.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ProfilerError::InvalidField {
            field: field.to_string(),
            reason: format!("expected bool, found {}", tree::type_name(other)),
        }),
    }
}

fn read_steps(section: &Mapping, field: &str, default: u64) -> Result<u64, ProfilerError> {
    match section.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| ProfilerError::InvalidField {
            field: field.to_string(),
            reason: format!(
                "expected a non-negative integer, found {}",
                tree::render_scalar(value).unwrap_or_else(|| tree::type_name(value).to_string())
            ),
        }),
    }
}

/// Normalise a (resolved) `profiler` section.
pub fn normalize(
    section: Option<&Value>,
    output_dir: Option<&str>,
) -> Result<ProfilerOutcome, ProfilerError> {
    let mut notes = Vec::new();
    let section = match section {
        None | Some(Value::Null) => {
            return Ok(ProfilerOutcome {
                settings: ProfilerSettings::disabled(output_dir),
                notes,
            });
        }
        Some(Value::Mapping(map)) => map,
        Some(other) => {
            return Err(ProfilerError::InvalidField {
                field: "profiler".to_string(),
                reason: format!("expected a mapping, found {}", tree::type_name(other)),
            });
        }
    };

    let component = match section.get(COMPONENT_KEY) {
        None | Some(Value::Null) => TORCH_PROFILER_COMPONENT.to_string(),
        Some(Value::String(found)) if found == TORCH_PROFILER_COMPONENT => found.clone(),
        Some(other) => {
            return Err(ProfilerError::UnsupportedComponent {
                expected: TORCH_PROFILER_COMPONENT.to_string(),
                found: tree::render_scalar(other).unwrap_or_default(),
            });
        }
    };

    let defaults = ProfilerSettings::disabled(output_dir);
    let mut settings = ProfilerSettings {
        component,
        enabled: read_bool(section, "enabled", defaults.enabled)?,
        cpu: read_bool(section, "cpu", defaults.cpu)?,
        cuda: read_bool(section, "cuda", defaults.cuda)?,
        xpu: read_bool(section, "xpu", defaults.xpu)?,
        profile_memory: read_bool(section, "profile_memory", defaults.profile_memory)?,
        with_stack: read_bool(section, "with_stack", defaults.with_stack)?,
        record_shapes: read_bool(section, "record_shapes", defaults.record_shapes)?,
        with_flops: read_bool(section, "with_flops", defaults.with_flops)?,
        wait_steps: read_steps(section, "wait_steps", defaults.wait_steps)?,
        warmup_steps: read_steps(section, "warmup_steps", defaults.warmup_steps)?,
        active_steps: read_steps(section, "active_steps", defaults.active_steps)?,
        num_cycles: read_steps(section, "num_cycles", defaults.num_cycles)?,
        output_dir: match section.get("output_dir").and_then(Value::as_str) {
            Some(dir) => PathBuf::from(dir),
            None => defaults.output_dir,
        },
    };

    if !settings.enabled {
        return Ok(ProfilerOutcome { settings, notes });
    }

    let schedule_keys = ["wait_steps", "warmup_steps", "active_steps", "num_cycles"];
    if !schedule_keys.iter().any(|k| section.contains_key(*k)) {
        notes.push(format!(
            "No profiler schedule found, using defaults: wait_steps={}, warmup_steps={}, active_steps={}, num_cycles={}",
            settings.wait_steps, settings.warmup_steps, settings.active_steps, settings.num_cycles
        ));
    }
    if settings.active_steps == 0 {
        return Err(ProfilerError::InvalidField {
            field: "active_steps".to_string(),
            reason: "must be greater than zero when profiling is enabled".to_string(),
        });
    }
    if !settings.cpu && !settings.cuda && !settings.xpu {
        notes.push("No profiler activities were enabled, defaulting to cpu and cuda".to_string());
        settings.cpu = true;
        settings.cuda = true;
    }
    if settings.profile_memory && !(settings.with_stack && settings.record_shapes) {
        notes.push(
            "`profile_memory` requires `with_stack` and `record_shapes`, these will be enabled"
                .to_string(),
        );
        settings.with_stack = true;
        settings.record_shapes = true;
    }

    Ok(ProfilerOutcome { settings, notes })
}
