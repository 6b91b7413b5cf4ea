//! Typed view over a resolved recipe document.
//!
//! The key vocabulary is open: anything not listed here is kept in
//! [`RecipeConfig::extra`].

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::str::FromStr;

use crate::checkpoint::CheckpointerConfig;
use crate::component::ComponentRef;
use crate::error::{ComponentError, ConfigError};
use crate::precision::{DeviceSpec, Dtype, LogLevel};

/// Which family of recipe a document parameterizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    Full,
    Lora,
    Ppo,
}

impl RecipeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Lora => "lora",
            Self::Ppo => "ppo",
        }
    }

    /// Guess the recipe family from the shape of a document.
    pub fn detect(root: &Value) -> Self {
        if root.get("policy_model").is_some() {
            return Self::Ppo;
        }
        let has_lora_rank = root
            .get("model")
            .and_then(|m| m.get("lora_rank"))
            .is_some();
        if has_lora_rank { Self::Lora } else { Self::Full }
    }
}

impl fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecipeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "lora" => Ok(Self::Lora),
            "ppo" => Ok(Self::Ppo),
            other => Err(ConfigError::Invalid {
                key: "kind".to_string(),
                message: format!("unknown recipe kind '{}' (expected full, lora or ppo)", other),
            }),
        }
    }
}

/// `dataset` is a single component or a list that gets concatenated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetSpec {
    Single(ComponentRef),
    Concat(Vec<ComponentRef>),
}

impl DatasetSpec {
    pub fn components(&self) -> Vec<&ComponentRef> {
        match self {
            Self::Single(c) => vec![c],
            Self::Concat(list) => list.iter().collect(),
        }
    }
}

/// Recognized recipe keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    // Components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpointer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lr_scheduler: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_logger: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiler: Option<Value>,

    // Environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<Dtype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_activation_checkpointing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer_in_bwd: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from_checkpoint: Option<bool>,

    // Training loop sizes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps_per_epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_accumulation_steps: Option<u64>,

    // Logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_every_n_steps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_peak_memory_stats: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    // PPO
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_model: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_and_value_model: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_policy_checkpointer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_checkpointer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_checkpointer: Option<ComponentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_steps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppo_epochs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppo_batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kl_coeff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmbda: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whiten_rewards: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_generated_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_response_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalise_no_eos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_token_ids: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_kv_cache: Option<bool>,

    /// Keys outside the recognized vocabulary.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl RecipeConfig {
    /// Build the typed view from a resolved tree.
    pub fn from_value(root: &Value) -> Result<Self, ConfigError> {
        serde_yaml::from_value(root.clone()).map_err(|e| ConfigError::Invalid {
            key: "<root>".to_string(),
            message: e.to_string(),
        })
    }

    /// dtype with the harness default applied.
    pub fn effective_dtype(&self) -> Dtype {
        self.dtype.unwrap_or_default()
    }

    pub fn gradient_accumulation(&self) -> u64 {
        self.gradient_accumulation_steps.unwrap_or(1)
    }

    pub fn resuming(&self) -> bool {
        self.resume_from_checkpoint.unwrap_or(false)
    }

    /// The model component: `policy_model` for PPO, `model` otherwise.
    pub fn primary_model(&self) -> Option<&ComponentRef> {
        self.policy_model.as_ref().or(self.model.as_ref())
    }

    /// Typed checkpointer groups keyed by their top-level name.
    pub fn checkpointers(&self) -> Result<Vec<(&'static str, CheckpointerConfig)>, ComponentError> {
        let groups: [(&'static str, &Option<ComponentRef>); 4] = [
            ("checkpointer", &self.checkpointer),
            ("ref_policy_checkpointer", &self.ref_policy_checkpointer),
            ("value_checkpointer", &self.value_checkpointer),
            ("reward_checkpointer", &self.reward_checkpointer),
        ];
        let mut out = Vec::new();
        for (key, group) in groups {
            if let Some(component) = group {
                let value = serde_yaml::to_value(component).map_err(|e| {
                    ComponentError::CheckpointFiles {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                out.push((key, CheckpointerConfig::from_value(key, &value)?));
            }
        }
        Ok(out)
    }
}
