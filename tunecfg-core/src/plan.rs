//! Run plans derived from recipe hyperparameters.
//!
//! These are the batch and step counts the training harness computes from a
//! config before it starts: PPO trajectory/minibatch sizes and LR schedule
//! length, or epoch/step counts for supervised fine-tuning.

use serde::Serialize;

use crate::error::PlanError;
use crate::recipe::{RecipeConfig, RecipeKind};

/// Facts about the run that are not part of the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanInputs {
    /// Number of samples in the dataset, when known.
    pub dataset_size: Option<u64>,
    /// Steps already completed, when resuming.
    pub steps_run: u64,
}

/// PPO batch and step arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PpoPlan {
    pub batch_size: u64,
    pub forward_batch_size: u64,
    pub ppo_batch_size: u64,
    pub ppo_backward_batch_size: u64,
    pub gradient_accumulation_steps: u64,
    pub ppo_epochs: u64,
    /// Trajectory batches to generate: `num_steps / batch_size`.
    pub total_steps: u64,
    /// Optimizer steps per trajectory batch.
    pub steps_per_trajectory: u64,
    /// Length of the learning-rate schedule in optimizer steps.
    pub lr_schedule_steps: u64,
    /// Optimizer step counter after `steps_run` trajectory batches.
    pub global_step: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batches_per_epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_epochs: Option<u64>,
}

/// Supervised fine-tuning step arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinetunePlan {
    pub batch_size: u64,
    pub gradient_accumulation_steps: u64,
    pub effective_batch_size: u64,
    pub epochs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_per_epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlanDetail {
    Ppo(PpoPlan),
    Finetune(FinetunePlan),
}

/// A derived plan and the warnings produced while deriving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub detail: PlanDetail,
    pub warnings: Vec<String>,
}

fn required(value: Option<u64>, field: &str) -> Result<u64, PlanError> {
    value.ok_or_else(|| PlanError::MissingField {
        field: field.to_string(),
    })
}

fn positive(value: u64, field: &str) -> Result<u64, PlanError> {
    if value == 0 {
        Err(PlanError::Zero {
            field: field.to_string(),
        })
    } else {
        Ok(value)
    }
}

fn product(a: u64, b: u64, field: &str) -> Result<u64, PlanError> {
    a.checked_mul(b).ok_or_else(|| PlanError::Overflow {
        field: field.to_string(),
    })
}

fn divisible(numerator: (u64, &str), denominator: (u64, &str)) -> Result<(), PlanError> {
    if numerator.0 % denominator.0 != 0 {
        return Err(PlanError::NotDivisible {
            numerator_field: numerator.1.to_string(),
            numerator: numerator.0,
            denominator_field: denominator.1.to_string(),
            denominator: denominator.0,
        });
    }
    Ok(())
}

/// Derive the plan for `recipe` as the given `kind`.
pub fn derive(recipe: &RecipeConfig, kind: RecipeKind, inputs: PlanInputs) -> Result<RunPlan, PlanError> {
    match kind {
        RecipeKind::Ppo => derive_ppo(recipe, inputs),
        RecipeKind::Full | RecipeKind::Lora => derive_finetune(recipe, inputs),
    }
}

pub fn derive_ppo(recipe: &RecipeConfig, inputs: PlanInputs) -> Result<RunPlan, PlanError> {
    let batch_size = positive(required(recipe.batch_size, "batch_size")?, "batch_size")?;
    let forward_batch_size = positive(
        required(recipe.forward_batch_size, "forward_batch_size")?,
        "forward_batch_size",
    )?;
    let ppo_batch_size = positive(
        required(recipe.ppo_batch_size, "ppo_batch_size")?,
        "ppo_batch_size",
    )?;
    let ppo_epochs = positive(required(recipe.ppo_epochs, "ppo_epochs")?, "ppo_epochs")?;
    let gradient_accumulation_steps =
        positive(recipe.gradient_accumulation(), "gradient_accumulation_steps")?;
    let num_steps = required(recipe.num_steps, "num_steps")?;

    divisible(
        (batch_size, "batch_size"),
        (forward_batch_size, "forward_batch_size"),
    )?;
    divisible((batch_size, "batch_size"), (ppo_batch_size, "ppo_batch_size"))?;
    divisible(
        (ppo_batch_size, "ppo_batch_size"),
        (gradient_accumulation_steps, "gradient_accumulation_steps"),
    )?;
    if gradient_accumulation_steps > 1 && recipe.optimizer_in_bwd.unwrap_or(false) {
        return Err(PlanError::AccumulationWithOptimizerInBackward);
    }

    let total_steps = num_steps / batch_size;
    if total_steps == 0 {
        return Err(PlanError::TooFewSteps {
            num_steps,
            batch_size,
        });
    }

    let steps_per_trajectory = product(
        ppo_epochs,
        batch_size / ppo_batch_size,
        "steps_per_trajectory",
    )?;
    let lr_schedule_steps = product(total_steps, steps_per_trajectory, "lr_schedule_steps")?;
    let global_step = product(inputs.steps_run, steps_per_trajectory, "global_step")?;
    let mut warnings = Vec::new();

    let (batches_per_epoch, total_epochs) = match inputs.dataset_size {
        Some(size) => {
            let batches = size / batch_size;
            let batches_per_epoch = batches.max(1);
            if total_steps < batches {
                warnings.push(format!(
                    "There are fewer total steps ({}, (num_steps//batch_size) than there are batches ({}) in the dataset. \
                     Training will stop after ({}) steps without saving intermediate checkpoints",
                    total_steps, batches, total_steps
                ));
            }
            if total_steps > batches_per_epoch && total_steps % batches_per_epoch != 0 {
                warnings.push(format!(
                    "num_steps ({}) is not exactly divisible by the number of batches in the dataset ({}). \
                     Intermediate checkpoints will only be saved every {} steps.",
                    num_steps, batches_per_epoch, batches_per_epoch
                ));
            }
            (
                Some(batches_per_epoch),
                Some(total_steps.div_ceil(batches_per_epoch)),
            )
        }
        None => (None, None),
    };

    tracing::debug!(
        total_steps,
        steps_per_trajectory,
        "Derived PPO plan"
    );

    Ok(RunPlan {
        detail: PlanDetail::Ppo(PpoPlan {
            batch_size,
            forward_batch_size,
            ppo_batch_size,
            ppo_backward_batch_size: ppo_batch_size / gradient_accumulation_steps,
            gradient_accumulation_steps,
            ppo_epochs,
            total_steps,
            steps_per_trajectory,
            lr_schedule_steps,
            global_step,
            batches_per_epoch,
            total_epochs,
        }),
        warnings,
    })
}

pub fn derive_finetune(recipe: &RecipeConfig, inputs: PlanInputs) -> Result<RunPlan, PlanError> {
    let batch_size = positive(required(recipe.batch_size, "batch_size")?, "batch_size")?;
    let epochs = positive(required(recipe.epochs, "epochs")?, "epochs")?;
    let gradient_accumulation_steps =
        positive(recipe.gradient_accumulation(), "gradient_accumulation_steps")?;
    if gradient_accumulation_steps > 1 && recipe.optimizer_in_bwd.unwrap_or(false) {
        return Err(PlanError::AccumulationWithOptimizerInBackward);
    }

    let effective_batch_size = product(
        batch_size,
        gradient_accumulation_steps,
        "effective_batch_size",
    )?;

    let mut warnings = Vec::new();
    let (steps_per_epoch, total_steps) = match inputs.dataset_size {
        Some(size) => {
            let batches = size / batch_size;
            let mut steps = batches / gradient_accumulation_steps;
            if let Some(cap) = recipe.max_steps_per_epoch {
                if cap < steps {
                    warnings.push(format!(
                        "max_steps_per_epoch ({}) truncates each epoch from {} steps",
                        cap, steps
                    ));
                    steps = cap;
                }
            }
            if steps == 0 {
                return Err(PlanError::EmptyEpoch {
                    reason: format!(
                        "{} samples at batch_size {} with gradient_accumulation_steps {}",
                        size, batch_size, gradient_accumulation_steps
                    ),
                });
            }
            (Some(steps), Some(product(steps, epochs, "total_steps")?))
        }
        None => (None, None),
    };

    Ok(RunPlan {
        detail: PlanDetail::Finetune(FinetunePlan {
            batch_size,
            gradient_accumulation_steps,
            effective_batch_size,
            epochs,
            steps_per_epoch,
            total_steps,
        }),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ppo_recipe() -> RecipeConfig {
        RecipeConfig {
            batch_size: Some(64),
            forward_batch_size: Some(16),
            ppo_batch_size: Some(32),
            ppo_epochs: Some(2),
            gradient_accumulation_steps: Some(16),
            num_steps: Some(10_000),
            ..Default::default()
        }
    }

    fn ppo(recipe: &RecipeConfig, inputs: PlanInputs) -> Result<PpoPlan, PlanError> {
        match derive_ppo(recipe, inputs)?.detail {
            PlanDetail::Ppo(plan) => Ok(plan),
            PlanDetail::Finetune(_) => unreachable!(),
        }
    }

    #[test]
    fn test_ppo_arithmetic() {
        let plan = ppo(&ppo_recipe(), PlanInputs::default()).unwrap();
        assert_eq!(plan.ppo_backward_batch_size, 2);
        assert_eq!(plan.total_steps, 156);
        assert_eq!(plan.steps_per_trajectory, 4);
        assert_eq!(plan.lr_schedule_steps, 624);
        assert_eq!(plan.global_step, 0);
        assert_eq!(plan.total_epochs, None);
    }

    #[test]
    fn test_ppo_resume_global_step() {
        let inputs = PlanInputs {
            dataset_size: None,
            steps_run: 10,
        };
        let plan = ppo(&ppo_recipe(), inputs).unwrap();
        assert_eq!(plan.global_step, 40);
    }

    #[test]
    fn test_ppo_dataset_epochs_and_warnings() {
        let inputs = PlanInputs {
            dataset_size: Some(64 * 100),
            steps_run: 0,
        };
        let run = derive_ppo(&ppo_recipe(), inputs).unwrap();
        match run.detail {
            PlanDetail::Ppo(plan) => {
                assert_eq!(plan.batches_per_epoch, Some(100));
                assert_eq!(plan.total_epochs, Some(2));
            }
            PlanDetail::Finetune(_) => panic!("expected ppo plan"),
        }
        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].contains("not exactly divisible"));
    }

    #[test]
    fn test_ppo_fewer_steps_than_batches_warns() {
        let recipe = RecipeConfig {
            num_steps: Some(640),
            ..ppo_recipe()
        };
        let inputs = PlanInputs {
            dataset_size: Some(64 * 100),
            steps_run: 0,
        };
        let run = derive_ppo(&recipe, inputs).unwrap();
        assert!(run.warnings[0].contains("fewer total steps"));
    }

    #[test]
    fn test_ppo_divisibility_errors() {
        let recipe = RecipeConfig {
            forward_batch_size: Some(12),
            ..ppo_recipe()
        };
        let err = ppo(&recipe, PlanInputs::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "batch_size (64) must be exactly divisible by forward_batch_size (12)"
        );

        let recipe = RecipeConfig {
            ppo_batch_size: Some(48),
            gradient_accumulation_steps: Some(1),
            ..ppo_recipe()
        };
        assert!(matches!(
            ppo(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::NotDivisible { .. }
        ));

        let recipe = RecipeConfig {
            gradient_accumulation_steps: Some(5),
            ..ppo_recipe()
        };
        assert!(matches!(
            ppo(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::NotDivisible { .. }
        ));
    }

    #[test]
    fn test_ppo_optimizer_in_bwd_conflict() {
        let recipe = RecipeConfig {
            optimizer_in_bwd: Some(true),
            ..ppo_recipe()
        };
        assert!(matches!(
            ppo(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::AccumulationWithOptimizerInBackward
        ));
    }

    #[test]
    fn test_ppo_too_few_steps() {
        let recipe = RecipeConfig {
            num_steps: Some(10),
            ..ppo_recipe()
        };
        assert!(matches!(
            ppo(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::TooFewSteps { .. }
        ));
    }

    #[test]
    fn test_ppo_huge_steps_run_overflows() {
        let inputs = PlanInputs {
            dataset_size: None,
            steps_run: u64::MAX,
        };
        let err = ppo(&ppo_recipe(), inputs).unwrap_err();
        assert!(matches!(err, PlanError::Overflow { ref field } if field == "global_step"));
        assert_eq!(err.to_string(), "global_step is too large to compute");
    }

    #[test]
    fn test_finetune_huge_batch_overflows() {
        let recipe = RecipeConfig {
            batch_size: Some(u64::MAX),
            epochs: Some(1),
            gradient_accumulation_steps: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            derive_finetune(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::Overflow { .. }
        ));
    }

    #[test]
    fn test_ppo_missing_field() {
        let recipe = RecipeConfig {
            ppo_epochs: None,
            ..ppo_recipe()
        };
        assert!(matches!(
            ppo(&recipe, PlanInputs::default()).unwrap_err(),
            PlanError::MissingField { .. }
        ));
    }

    #[test]
    fn test_finetune_plan() {
        let recipe = RecipeConfig {
            batch_size: Some(2),
            epochs: Some(3),
            gradient_accumulation_steps: Some(8),
            max_steps_per_epoch: Some(100),
            ..Default::default()
        };
        let inputs = PlanInputs {
            dataset_size: Some(52_002),
            steps_run: 0,
        };
        let run = derive(&recipe, RecipeKind::Full, inputs).unwrap();
        match run.detail {
            PlanDetail::Finetune(plan) => {
                assert_eq!(plan.effective_batch_size, 16);
                assert_eq!(plan.steps_per_epoch, Some(100));
                assert_eq!(plan.total_steps, Some(300));
            }
            PlanDetail::Ppo(_) => panic!("expected finetune plan"),
        }
        assert_eq!(run.warnings.len(), 1);
    }

    #[test]
    fn test_finetune_empty_epoch() {
        let recipe = RecipeConfig {
            batch_size: Some(8),
            epochs: Some(1),
            gradient_accumulation_steps: Some(4),
            ..Default::default()
        };
        let inputs = PlanInputs {
            dataset_size: Some(16),
            steps_run: 0,
        };
        assert!(matches!(
            derive_finetune(&recipe, inputs).unwrap_err(),
            PlanError::EmptyEpoch { .. }
        ));
    }
}
