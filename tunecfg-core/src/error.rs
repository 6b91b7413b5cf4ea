//! Error types for tunecfg.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering loading, key paths, overrides, interpolation, components,
//! precision, profiler settings and run planning.

use std::path::PathBuf;

/// Top-level error type for the tunecfg core library.
#[derive(Debug, thiserror::Error)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Key path error: {0}")]
    Path(#[from] PathError),

    #[error("Override error: {0}")]
    Override(#[from] OverrideError),

    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),

    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Precision error: {0}")]
    Precision(#[from] PrecisionError),

    #[error("Profiler error: {0}")]
    Profiler(#[from] ProfilerError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Validation failed with {errors} error(s)")]
    ValidationFailed { errors: usize },

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from reading and parsing recipe documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Top level of {path} must be a mapping, found {found}")]
    NotAMapping { path: PathBuf, found: String },

    #[error("Invalid configuration at '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Recipe file already exists: {path}")]
    AlreadyExists { path: PathBuf },
}

/// Errors from dotted key path handling.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Invalid key path '{path}': {reason}")]
    Malformed { path: String, reason: String },

    #[error("Key not found: {path}")]
    NotFound { path: String },

    #[error("Cannot descend into {found} at '{path}'")]
    NotAContainer { path: String, found: String },

    #[error("Index {index} out of bounds at '{path}' (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

/// Errors from command-line style overrides.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("Malformed override '{raw}': {reason}")]
    Malformed { raw: String, reason: String },

    #[error("Cannot delete '{key}': key does not exist")]
    DeleteMissing { key: String },

    #[error("Failed to apply override '{raw}': {source}")]
    Apply {
        raw: String,
        #[source]
        source: PathError,
    },
}

/// Errors from `${...}` interpolation.
#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("Interpolation '${{{reference}}}' at '{at}' refers to missing key '{target}'")]
    MissingKey {
        reference: String,
        at: String,
        target: String,
    },

    #[error("Interpolation cycle detected: {chain}")]
    Cycle { chain: String },

    #[error("Unknown resolver '{name}' at '{at}'")]
    UnknownResolver { name: String, at: String },

    #[error("Environment variable '{var}' is not set (at '{at}')")]
    EnvVarMissing { var: String, at: String },

    #[error("Environment interpolation is disabled (at '{at}')")]
    EnvDisabled { at: String },

    #[error("Malformed interpolation in '{text}' at '{at}': {reason}")]
    Syntax {
        text: String,
        at: String,
        reason: String,
    },

    #[error("Cannot embed {found} from '{target}' inside a string at '{at}'")]
    NonScalarEmbed {
        target: String,
        at: String,
        found: String,
    },

    #[error("Relative reference '{reference}' at '{at}' climbs above the document root")]
    AboveRoot { reference: String, at: String },
}

/// Errors from `_component_` groups.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("Component group at '{key}' has no `_component_` entry")]
    Missing { key: String },

    #[error("Invalid component path '{path}' at '{key}'")]
    InvalidPath { key: String, path: String },

    #[error("Invalid checkpoint files at '{key}': {reason}")]
    CheckpointFiles { key: String, reason: String },
}

/// Errors from dtype, device and log level parsing.
#[derive(Debug, thiserror::Error)]
pub enum PrecisionError {
    #[error("Unsupported dtype '{value}'. Valid values: fp16, bf16, fp32, fp64")]
    UnknownDtype { value: String },

    #[error("Unsupported device '{value}'")]
    UnknownDevice { value: String },

    #[error("Unsupported log level '{value}'")]
    UnknownLogLevel { value: String },
}

/// Errors from profiler section normalisation.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    #[error(
        "Only torch profiler supported currently: component must be `{expected}`, found `{found}`"
    )]
    UnsupportedComponent { expected: String, found: String },

    #[error("Invalid profiler setting '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

/// Errors from deriving a run plan out of recipe hyperparameters.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("{numerator_field} ({numerator}) must be exactly divisible by {denominator_field} ({denominator})")]
    NotDivisible {
        numerator_field: String,
        numerator: u64,
        denominator_field: String,
        denominator: u64,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error(
        "Gradient accumulation is not supported with optimizer in bwd. Please set gradient_accumulation_steps=1, or optimizer_in_bwd=False"
    )]
    AccumulationWithOptimizerInBackward,

    #[error("num_steps {num_steps} must be greater than the batch size {batch_size}")]
    TooFewSteps { num_steps: u64, batch_size: u64 },

    #[error("No optimizer steps per epoch: {reason}")]
    EmptyEpoch { reason: String },

    #[error("{field} is too large to compute")]
    Overflow { field: String },
}

/// A type alias for results using the top-level `TuneError`.
pub type Result<T> = std::result::Result<T, TuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = TuneError::Config(ConfigError::FileNotFound {
            path: PathBuf::from("/tmp/missing.yaml"),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Configuration file not found: /tmp/missing.yaml"
        );
    }

    #[test]
    fn test_error_display_interpolation() {
        let err = TuneError::Interpolation(InterpolationError::MissingKey {
            reference: "output_dir".into(),
            at: "checkpointer.output_dir".into(),
            target: "output_dir".into(),
        });
        assert_eq!(
            err.to_string(),
            "Interpolation error: Interpolation '${output_dir}' at 'checkpointer.output_dir' refers to missing key 'output_dir'"
        );
    }

    #[test]
    fn test_error_display_plan() {
        let err = PlanError::NotDivisible {
            numerator_field: "batch_size".into(),
            numerator: 64,
            denominator_field: "forward_batch_size".into(),
            denominator: 12,
        };
        assert_eq!(
            err.to_string(),
            "batch_size (64) must be exactly divisible by forward_batch_size (12)"
        );
    }

    #[test]
    fn test_error_display_profiler() {
        let err = ProfilerError::UnsupportedComponent {
            expected: "torchtune.training.setup_torch_profiler".into(),
            found: "my.profiler".into(),
        };
        assert!(err.to_string().contains("my.profiler"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TuneError = io_err.into();
        assert!(matches!(err, TuneError::Io(_)));
    }

    #[test]
    fn test_error_from_path() {
        let err: TuneError = PathError::NotFound {
            path: "model.lora_rank".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Key path error: Key not found: model.lora_rank");
    }
}
