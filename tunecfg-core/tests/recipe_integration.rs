//! End-to-end tests over the recipe configs shipped in `recipes/configs`.

use pretty_assertions::assert_eq;
use serde_yaml::Value;
use std::path::PathBuf;

use tunecfg_core::error::PlanError;
use tunecfg_core::loader::{self, LoadOptions, LoadedRecipe};
use tunecfg_core::plan::{self, PlanDetail, PlanInputs};
use tunecfg_core::validate::{ValidationOptions, validate_tree};
use tunecfg_core::{RecipeKind, catalog, diff, profiler};

fn recipes_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("recipes")
        .join("configs")
}

fn ppo_path() -> PathBuf {
    recipes_dir().join("mistral/7B_full_ppo_low_memory.yaml")
}

fn qwen_path() -> PathBuf {
    recipes_dir().join("qwen2/0.5B_full_single_device.yaml")
}

fn load(path: &PathBuf, overrides: &[&str]) -> LoadedRecipe {
    loader::load_recipe(path, overrides, &LoadOptions::default()).unwrap()
}

fn validate(path: &PathBuf, overrides: &[&str]) -> tunecfg_core::ValidationReport {
    let raw = loader::load_raw(path, overrides).unwrap();
    validate_tree(&raw, &ValidationOptions::default())
}

// --- Sample documents ---

#[test]
fn test_samples_validate_cleanly() {
    for path in [ppo_path(), qwen_path()] {
        let report = validate(&path, &[]);
        assert!(
            report.is_ok(),
            "{}: {:?}",
            path.display(),
            report.diagnostics
        );
    }
}

#[test]
fn test_ppo_sample_resolves() {
    let recipe = load(&ppo_path(), &[]);
    assert_eq!(recipe.kind, RecipeKind::Ppo);
    assert_eq!(
        recipe.get("checkpointer.output_dir"),
        Some(&Value::from("/tmp/torchtune/mistral_7B/full_ppo_low_memory/policy"))
    );
    assert_eq!(
        recipe.get("metric_logger.log_dir"),
        Some(&Value::from("/tmp/torchtune/mistral_7B/full_ppo_low_memory/logs"))
    );
    assert_eq!(recipe.config.top_k, None);
    assert_eq!(recipe.config.stop_token_ids, Some(vec![2, 28723]));
    assert_eq!(recipe.config.reward_penalty, Some(-3.0));

    let checkpointers = recipe.config.checkpointers().unwrap();
    assert_eq!(checkpointers.len(), 4);
    let (_, value) = &checkpointers[2];
    assert_eq!(
        value.file_paths("value_checkpointer").unwrap()[0],
        PathBuf::from("/tmp/RM-Mistral-7B/model-00001-of-00003.safetensors")
    );
}

#[test]
fn test_qwen_sample_resolves() {
    let recipe = load(&qwen_path(), &[]);
    assert_eq!(recipe.kind, RecipeKind::Full);
    assert_eq!(
        recipe.get("checkpointer.output_dir"),
        Some(&Value::from("/tmp/torchtune/qwen2_0_5B/full_single_device"))
    );
    assert_eq!(recipe.config.primary_model().unwrap().short_name(), "qwen2_0_5b");
    assert_eq!(recipe.config.gradient_accumulation(), 8);
    assert!(recipe.config.extra.contains_key("enable_activation_offloading"));
}

#[test]
fn test_profiler_section_normalizes() {
    let recipe = load(&qwen_path(), &[]);
    let outcome = profiler::normalize(
        recipe.resolved.get("profiler"),
        recipe.config.output_dir.as_deref(),
    )
    .unwrap();
    assert!(!outcome.settings.enabled);
    assert_eq!(
        outcome.settings.output_dir,
        PathBuf::from("/tmp/torchtune/qwen2_0_5B/full_single_device/profiling_outputs")
    );
}

// --- Run plans ---

#[test]
fn test_ppo_plan() {
    let recipe = load(&ppo_path(), &[]);
    let inputs = PlanInputs {
        dataset_size: Some(1000),
        steps_run: 0,
    };
    let plan = plan::derive(&recipe.config, recipe.kind, inputs).unwrap();
    let PlanDetail::Ppo(ppo) = plan.detail else {
        panic!("expected a PPO plan");
    };
    assert_eq!(ppo.total_steps, 156);
    assert_eq!(ppo.steps_per_trajectory, 4);
    assert_eq!(ppo.lr_schedule_steps, 624);
    assert_eq!(ppo.ppo_backward_batch_size, 32);
    assert_eq!(ppo.batches_per_epoch, Some(15));
    assert_eq!(ppo.total_epochs, Some(11));
    // 156 steps over 15 batches per epoch does not divide evenly.
    assert_eq!(plan.warnings.len(), 1);
}

#[test]
fn test_ppo_plan_rejects_indivisible_forward_batch() {
    let recipe = load(&ppo_path(), &["forward_batch_size=24"]);
    let err = plan::derive(&recipe.config, recipe.kind, PlanInputs::default()).unwrap_err();
    assert!(matches!(err, PlanError::NotDivisible { .. }));
    assert_eq!(
        err.to_string(),
        "batch_size (64) must be exactly divisible by forward_batch_size (24)"
    );
}

// --- Validation through overrides ---

#[test]
fn test_reference_policy_must_match_policy() {
    let report = validate(&ppo_path(), &["ref_policy_checkpointer.checkpoint_dir=/other"]);
    assert!(!report.is_ok());
    assert!(report.mentions("ref_policy_checkpointer.checkpoint_dir"));

    let report = validate(
        &ppo_path(),
        &[
            "ref_policy_checkpointer.checkpoint_dir=/other",
            "resume_from_checkpoint=True",
        ],
    );
    assert!(report.is_ok(), "{:?}", report.diagnostics);
}

#[test]
fn test_accumulation_conflicts_with_optimizer_in_backward() {
    let report = validate(&ppo_path(), &["gradient_accumulation_steps=2"]);
    assert!(report.errors().any(|d| d.key == "gradient_accumulation_steps"));
}

#[test]
fn test_missing_stop_tokens_warns() {
    let report = validate(&ppo_path(), &["~stop_token_ids"]);
    assert!(report.is_ok());
    assert!(report.warnings().any(|d| d.key == "stop_token_ids"));
}

#[test]
fn test_empty_stop_tokens_warns() {
    let report = validate(&ppo_path(), &["stop_token_ids=[]"]);
    assert!(report.is_ok(), "{:?}", report.diagnostics);
    assert!(report.warnings().any(|d| d.key == "stop_token_ids"));
}

#[test]
fn test_non_positive_temperature_is_an_error() {
    for value in ["temperature=0.0", "temperature=-0.5"] {
        let report = validate(&ppo_path(), &[value]);
        assert!(report.errors().any(|d| d.key == "temperature"), "{}", value);
    }
    let report = validate(&ppo_path(), &["temperature=0.1"]);
    assert!(!report.mentions("temperature"));
}

#[test]
fn test_discount_factors_outside_unit_range_warn() {
    let report = validate(&ppo_path(), &["gamma=1.5", "lmbda=-0.1"]);
    assert!(report.is_ok(), "{:?}", report.diagnostics);
    assert!(report.warnings().any(|d| d.key == "gamma"));
    assert!(report.warnings().any(|d| d.key == "lmbda"));

    let report = validate(&ppo_path(), &["gamma=1.0", "lmbda=0.0"]);
    assert!(!report.mentions("gamma"));
    assert!(!report.mentions("lmbda"));
}

#[test]
fn test_fp16_does_not_hide_plan_errors() {
    let report = validate(&ppo_path(), &["dtype=fp16", "gradient_accumulation_steps=2"]);
    assert!(report.errors().any(|d| d.key == "dtype"));
    assert!(report.errors().any(|d| d.key == "gradient_accumulation_steps"));
}

#[test]
fn test_fp16_rejected() {
    let report = validate(&qwen_path(), &["dtype=fp16"]);
    assert!(report.errors().any(|d| d.key == "dtype"));
}

#[test]
fn test_deleting_referenced_key_breaks_references() {
    let report = validate(&qwen_path(), &["~output_dir"]);
    assert!(report.mentions("output_dir"));
    assert!(report.mentions("checkpointer.output_dir"));
    assert!(report.mentions("metric_logger.log_dir"));
}

#[test]
fn test_component_swap_keeps_arguments() {
    let recipe = load(&qwen_path(), &["optimizer=torch.optim.SGD"]);
    let optimizer = recipe.config.optimizer.unwrap();
    assert_eq!(optimizer.path, "torch.optim.SGD");
    assert_eq!(optimizer.arg("lr").and_then(Value::as_f64), Some(2e-5));
}

// --- Catalog, diff, fingerprint ---

#[test]
fn test_catalog_lists_samples() {
    let entries = catalog::discover(&[recipes_dir()]);
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "mistral/7B_full_ppo_low_memory",
            "qwen2/0.5B_full_single_device"
        ]
    );
    assert_eq!(entries[0].kind, Some(RecipeKind::Ppo));
    assert_eq!(
        entries[1].model.as_deref(),
        Some("torchtune.models.qwen2.qwen2_0_5b")
    );
}

#[test]
fn test_diff_between_overrides() {
    let base = load(&qwen_path(), &[]);
    let tweaked = load(&qwen_path(), &["batch_size=4", "~seed", "optimizer.weight_decay=0.01"]);
    let d = diff(&base.resolved, &tweaked.resolved);
    assert_eq!(d.changed.len(), 1);
    assert_eq!(d.changed[0].key, "batch_size");
    assert_eq!(d.removed[0].0, "seed");
    assert_eq!(d.added[0].0, "optimizer.weight_decay");
}

#[test]
fn test_fingerprint_tracks_resolved_values() {
    let base = load(&qwen_path(), &[]).fingerprint().unwrap();
    let same = load(&qwen_path(), &["batch_size=2"]).fingerprint().unwrap();
    let moved = load(&qwen_path(), &["output_dir=/data/run"]).fingerprint().unwrap();
    assert_eq!(base, same);
    assert_ne!(base, moved);
}
