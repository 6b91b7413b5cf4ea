//! Recipe validation.
//!
//! Validation collects every problem it can find into a [`ValidationReport`]
//! instead of stopping at the first one. It runs on the tree after overrides
//! but before interpolation so broken references can be reported per key.

use serde::Serialize;
use serde_yaml::Value;
use std::fmt;

use crate::component::{self, COMPONENT_KEY, ComponentRef};
use crate::error::{PlanError, TuneError};
use crate::interpolate::{self, InterpolationOptions};
use crate::plan::{self, PlanInputs};
use crate::precision::{DeviceSpec, Dtype, LogLevel};
use crate::profiler;
use crate::recipe::{RecipeConfig, RecipeKind};
use crate::tree;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One finding, attached to a key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub key: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.key, self.message)
    }
}

/// All findings for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecipeKind>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, key, message);
    }

    pub fn warning(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, key, message);
    }

    fn push(&mut self, severity: Severity, key: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            key: key.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Whether any diagnostic is attached to `key`.
    pub fn mentions(&self, key: &str) -> bool {
        self.diagnostics.iter().any(|d| d.key == key)
    }

    /// Turn every warning into an error.
    pub fn promote_warnings(&mut self) {
        for diagnostic in &mut self.diagnostics {
            diagnostic.severity = Severity::Error;
        }
    }

    pub fn into_result(self) -> Result<Self, TuneError> {
        match self.error_count() {
            0 => Ok(self),
            errors => Err(TuneError::ValidationFailed { errors }),
        }
    }
}

/// Knobs for [`validate_tree`].
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Force a recipe kind instead of detecting it.
    pub kind: Option<RecipeKind>,
    /// Treat warnings as errors.
    pub strict: bool,
    pub interpolation: InterpolationOptions,
}

const FINETUNE_REQUIRED: &[&str] = &[
    "output_dir",
    "model",
    "tokenizer",
    "checkpointer",
    "dataset",
    "optimizer",
    "loss",
    "batch_size",
    "epochs",
];

const PPO_REQUIRED: &[&str] = &[
    "output_dir",
    "policy_model",
    "reward_and_value_model",
    "tokenizer",
    "checkpointer",
    "ref_policy_checkpointer",
    "value_checkpointer",
    "reward_checkpointer",
    "dataset",
    "optimizer",
    "loss",
    "num_steps",
    "batch_size",
    "forward_batch_size",
    "ppo_epochs",
    "ppo_batch_size",
    "gradient_accumulation_steps",
    "kl_coeff",
    "gamma",
    "lmbda",
    "whiten_rewards",
    "temperature",
    "top_k",
    "max_generated_tokens",
    "min_response_length",
    "penalise_no_eos",
    "reward_penalty",
    "enable_kv_cache",
];

/// Required keys that may legitimately be null.
const NULLABLE: &[&str] = &["top_k"];

const COMPONENT_GROUPS: &[&str] = &[
    "model",
    "tokenizer",
    "checkpointer",
    "optimizer",
    "lr_scheduler",
    "loss",
    "metric_logger",
    "policy_model",
    "reward_and_value_model",
    "ref_policy_checkpointer",
    "value_checkpointer",
    "reward_checkpointer",
];

const UINT_KEYS: &[&str] = &[
    "batch_size",
    "epochs",
    "max_steps_per_epoch",
    "gradient_accumulation_steps",
    "seed",
    "log_every_n_steps",
    "num_steps",
    "forward_batch_size",
    "ppo_epochs",
    "ppo_batch_size",
    "top_k",
    "max_generated_tokens",
    "min_response_length",
];

const BOOL_KEYS: &[&str] = &[
    "shuffle",
    "compile",
    "enable_activation_checkpointing",
    "optimizer_in_bwd",
    "resume_from_checkpoint",
    "log_peak_memory_stats",
    "whiten_rewards",
    "penalise_no_eos",
    "enable_kv_cache",
];

const FLOAT_KEYS: &[&str] = &["kl_coeff", "gamma", "lmbda", "temperature", "reward_penalty"];

/// Required keys for a recipe kind.
pub fn required_keys(kind: RecipeKind) -> &'static [&'static str] {
    match kind {
        RecipeKind::Full | RecipeKind::Lora => FINETUNE_REQUIRED,
        RecipeKind::Ppo => PPO_REQUIRED,
    }
}

/// Validate a document (after overrides, before interpolation).
pub fn validate_tree(raw: &Value, options: &ValidationOptions) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !raw.is_mapping() {
        report.error(
            "<root>",
            format!("top level must be a mapping, found {}", tree::type_name(raw)),
        );
        return finish(report, options);
    }

    for (at, err) in interpolate::unresolved(raw, &options.interpolation) {
        report.error(at.to_string(), err.to_string());
    }
    let resolved = interpolate::resolve(raw, &options.interpolation).unwrap_or_else(|_| raw.clone());

    for key in interpolate::missing_values(&resolved) {
        report.error(key, "mandatory value is missing (`???`)");
    }

    let kind = options.kind.unwrap_or_else(|| RecipeKind::detect(&resolved));
    report.kind = Some(kind);

    check_required(&resolved, kind, &mut report);
    check_component_groups(&resolved, &mut report);
    let typed_ok = check_scalar_types(&resolved, &mut report);
    check_environment(&resolved, &mut report);

    match profiler::normalize(
        resolved.get("profiler"),
        resolved.get("output_dir").and_then(Value::as_str),
    ) {
        Ok(outcome) => {
            for note in outcome.notes {
                report.warning("profiler", note);
            }
        }
        Err(err) => report.error("profiler", err.to_string()),
    }

    if typed_ok {
        match RecipeConfig::from_value(&typed_view(&resolved, &report)) {
            Ok(recipe) => check_recipe(&recipe, kind, &mut report),
            Err(err) => report.error("<root>", err.to_string()),
        }
    }

    finish(report, options)
}

/// The resolved tree minus environment keys and component groups that already
/// failed their own checks, so the typed view can still be built.
fn typed_view(resolved: &Value, report: &ValidationReport) -> Value {
    let mut view = resolved.clone();
    if let Value::Mapping(map) = &mut view {
        for key in ENVIRONMENT_KEYS.iter().chain(COMPONENT_GROUPS) {
            if report.errors().any(|d| d.key == *key) {
                map.remove(*key);
            }
        }
    }
    view
}

fn finish(mut report: ValidationReport, options: &ValidationOptions) -> ValidationReport {
    if options.strict {
        report.promote_warnings();
    }
    tracing::debug!(
        errors = report.error_count(),
        diagnostics = report.diagnostics.len(),
        "Validation finished"
    );
    report
}

fn check_required(root: &Value, kind: RecipeKind, report: &mut ValidationReport) {
    for key in required_keys(kind) {
        match root.get(*key) {
            None => report.error(*key, format!("required key for a {} recipe is missing", kind)),
            Some(Value::Null) if !NULLABLE.contains(key) => {
                report.error(*key, "required key must not be null")
            }
            Some(_) => {}
        }
    }
}

fn check_component(key: &str, value: &Value, report: &mut ValidationReport) {
    match ComponentRef::from_value(key, value) {
        Ok(component) => {
            if let Err(err) = component.check_path(key) {
                report.error(key, err.to_string());
            }
        }
        Err(err) => report.error(key, err.to_string()),
    }
}

fn check_component_groups(root: &Value, report: &mut ValidationReport) {
    for key in COMPONENT_GROUPS {
        match root.get(*key) {
            None | Some(Value::Null) => {}
            Some(value) => check_component(key, value, report),
        }
    }

    match root.get("dataset") {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(items)) => {
            if items.is_empty() {
                report.error("dataset", "dataset list is empty");
            }
            for (i, item) in items.iter().enumerate() {
                check_component(&format!("dataset.{}", i), item, report);
            }
        }
        Some(value) => check_component("dataset", value, report),
    }

    // Nested groups (e.g. a dataset's message transform) only get a syntax check.
    for site in component::collect_components(root) {
        if is_top_level_group(&site.key) {
            continue;
        }
        if !component::is_valid_component_path(&site.component) {
            report.error(
                site.key.clone(),
                format!("invalid `{}` path '{}'", COMPONENT_KEY, site.component),
            );
        }
    }
}

/// `model` or `dataset.0`: already checked as a group.
fn is_top_level_group(key: &str) -> bool {
    match key.split_once('.') {
        None => true,
        Some(("dataset", index)) => index.bytes().all(|b| b.is_ascii_digit()),
        Some(_) => false,
    }
}

fn expect_type(
    root: &Value,
    keys: &[&str],
    ok: fn(&Value) -> bool,
    what: &str,
    report: &mut ValidationReport,
) {
    for key in keys {
        match root.get(*key) {
            None | Some(Value::Null) => {}
            Some(value) if ok(value) => {}
            Some(value) => report.error(
                *key,
                format!("expected {}, found {}", what, tree::type_name(value)),
            ),
        }
    }
}

fn check_scalar_types(root: &Value, report: &mut ValidationReport) -> bool {
    let before = report.error_count();
    expect_type(root, UINT_KEYS, |v| v.as_u64().is_some(), "a non-negative integer", report);
    expect_type(root, BOOL_KEYS, Value::is_bool, "a bool", report);
    expect_type(root, FLOAT_KEYS, |v| v.as_f64().is_some(), "a number", report);
    expect_type(root, &["output_dir"], Value::is_string, "a string", report);
    report.error_count() == before
}

const ENVIRONMENT_KEYS: &[&str] = &["dtype", "device", "log_level"];

fn check_environment(root: &Value, report: &mut ValidationReport) {
    let dtype = match root.get("dtype") {
        None | Some(Value::Null) => Some(Dtype::default()),
        Some(Value::String(s)) => match s.parse::<Dtype>() {
            Ok(dtype) => Some(dtype),
            Err(err) => {
                report.error("dtype", err.to_string());
                None
            }
        },
        Some(other) => {
            report.error("dtype", format!("expected a string, found {}", tree::type_name(other)));
            None
        }
    };
    if dtype == Some(Dtype::Fp16) {
        report.error(
            "dtype",
            "full fp16 training is not supported with this recipe. Please use bf16 or fp32 instead.",
        );
    }

    let device = match root.get("device") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match s.parse::<DeviceSpec>() {
            Ok(device) => Some(device),
            Err(err) => {
                report.error("device", err.to_string());
                None
            }
        },
        Some(other) => {
            report.error("device", format!("expected a string, found {}", tree::type_name(other)));
            None
        }
    };

    let peak_memory = root
        .get("log_peak_memory_stats")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some(device) = device {
        if peak_memory && !device.is_cuda() {
            report.warning(
                "log_peak_memory_stats",
                format!(
                    "log_peak_memory_stats was set to True, however, training does not use cuda ({}). It will be disabled.",
                    device
                ),
            );
        }
    }

    if let Some(level) = root.get("log_level").filter(|v| !v.is_null()) {
        let parsed = level
            .as_str()
            .map(|s| s.parse::<LogLevel>().map(|_| ()).map_err(|e| e.to_string()))
            .unwrap_or_else(|| Err(format!("expected a string, found {}", tree::type_name(level))));
        if let Err(message) = parsed {
            report.error("log_level", message);
        }
    }
}

fn check_recipe(recipe: &RecipeConfig, kind: RecipeKind, report: &mut ValidationReport) {
    match recipe.checkpointers() {
        Ok(checkpointers) => {
            for (key, ckpt) in &checkpointers {
                if let Err(err) = ckpt.files(key) {
                    report.error(*key, err.to_string());
                }
            }
            if kind == RecipeKind::Ppo && !recipe.resuming() {
                check_policy_matches_reference(&checkpointers, report);
            }
        }
        Err(err) => report.error("checkpointer", err.to_string()),
    }

    if kind == RecipeKind::Lora {
        check_lora(recipe, report);
    }

    if let Some(logger) = &recipe.metric_logger {
        let needs_dir = matches!(logger.short_name(), "DiskLogger" | "TensorBoardLogger");
        if needs_dir && logger.arg("log_dir").is_none_or(Value::is_null) {
            report.error(
                "metric_logger.log_dir",
                format!("{} requires a log_dir", logger.short_name()),
            );
        }
    }

    if kind == RecipeKind::Ppo {
        check_ppo_hyperparameters(recipe, report);
    }

    match plan::derive(recipe, kind, PlanInputs::default()) {
        Ok(plan) => {
            for warning in plan.warnings {
                report.warning("<plan>", warning);
            }
        }
        Err(PlanError::MissingField { .. }) => {}
        Err(err) => report.error(plan_error_key(&err), err.to_string()),
    }
}

fn plan_error_key(err: &PlanError) -> String {
    match err {
        PlanError::MissingField { field }
        | PlanError::Zero { field }
        | PlanError::Overflow { field } => field.clone(),
        PlanError::NotDivisible {
            numerator_field, ..
        } => numerator_field.clone(),
        PlanError::AccumulationWithOptimizerInBackward => "gradient_accumulation_steps".to_string(),
        PlanError::TooFewSteps { .. } => "num_steps".to_string(),
        PlanError::EmptyEpoch { .. } => "batch_size".to_string(),
    }
}

fn check_policy_matches_reference(
    checkpointers: &[(&'static str, crate::checkpoint::CheckpointerConfig)],
    report: &mut ValidationReport,
) {
    let find = |name: &str| checkpointers.iter().find(|(k, _)| *k == name).map(|(_, c)| c);
    let (Some(policy), Some(reference)) = (find("checkpointer"), find("ref_policy_checkpointer"))
    else {
        return;
    };

    if policy.checkpoint_dir != reference.checkpoint_dir {
        report.error(
            "ref_policy_checkpointer.checkpoint_dir",
            format!(
                "Policy and reference policy should be loaded from the same checkpoint directories at the start of training. Found: {} and {}",
                display_path(&policy.checkpoint_dir),
                display_path(&reference.checkpoint_dir)
            ),
        );
    }
    let policy_files = policy.files("checkpointer").unwrap_or_default();
    let reference_files = reference.files("ref_policy_checkpointer").unwrap_or_default();
    if policy_files != reference_files {
        report.error(
            "ref_policy_checkpointer.checkpoint_files",
            format!(
                "Policy and reference policy should be loaded from the same checkpoint files at the start of training. Found: {:?} and {:?}",
                policy_files, reference_files
            ),
        );
    }
}

fn display_path(path: &Option<std::path::PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string())
}

fn check_lora(recipe: &RecipeConfig, report: &mut ValidationReport) {
    let Some(model) = &recipe.model else {
        return;
    };
    for field in ["lora_rank", "lora_alpha"] {
        let positive = model
            .arg(field)
            .and_then(Value::as_f64)
            .is_some_and(|v| v > 0.0);
        if !positive {
            report.error(format!("model.{}", field), "must be a positive number");
        }
    }
}

fn check_ppo_hyperparameters(recipe: &RecipeConfig, report: &mut ValidationReport) {
    for (key, value) in [("gamma", recipe.gamma), ("lmbda", recipe.lmbda)] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                report.warning(key, format!("{} is usually within [0, 1], found {}", key, v));
            }
        }
    }
    if let Some(temperature) = recipe.temperature {
        if temperature <= 0.0 {
            report.error("temperature", "temperature must be positive");
        }
    }
    match &recipe.stop_token_ids {
        None => report.warning(
            "stop_token_ids",
            "No stop_token_ids provided; the tokenizer's stop tokens will be used during generation",
        ),
        Some(ids) if ids.is_empty() => report.warning(
            "stop_token_ids",
            "stop_token_ids is empty; generation only stops at max_generated_tokens",
        ),
        Some(_) => {}
    }
}
