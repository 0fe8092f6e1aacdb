//! Agent configuration.
//!
//! An [`AgentConfig`] is the JSON document describing one training setup.
//! It is parsed with `serde_json` and checked by [`AgentConfig::validate`],
//! which fails fast (before any component exists) and yields typed
//! [`TrainerSettings`] for the component constructors.
//!
//! ```json
//! {
//!   "type": "ppo",
//!   "memory_spec": { "type": "ring_buffer", "capacity": 2048 },
//!   "observe_spec": { "buffer_size": 256 },
//!   "update_spec": { "update_mode": "time_steps", "update_interval": 1024,
//!                    "batch_size": 1024, "num_iterations": 4, "sample_size": 128 },
//!   "optimizer_spec": { "type": "adam", "learning_rate": 0.0003 }
//! }
//! ```

use crate::actors::{CollectorConfig, ResourceHints, WorkerConfig};
use crate::algorithms::gae::AdvantageEstimator;
use crate::algorithms::ppo::{AlgorithmKind, OptimizerSettings, PpoConfig};
use crate::core::transition::Transition;
use crate::memory::{MemoryError, RingBuffer, SamplingMode};
use crate::preprocessing::{PreprocessError, PreprocessingStageSpec};
use crate::runners::{TrainerConfig, UpdateMode, UpdateTrigger};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown algorithm type '{0}'")]
    UnknownAlgorithm(String),
    #[error("unknown update mode '{0}'")]
    UnknownUpdateMode(String),
    #[error("unknown memory type '{0}'")]
    UnknownMemory(String),
    #[error("unknown optimizer type '{0}'")]
    UnknownOptimizer(String),
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("{field} = {value} is outside {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },
    #[error("invalid preprocessing stage: {0}")]
    Preprocessing(#[from] PreprocessError),
}

fn default_discount() -> f32 {
    0.99
}

fn default_gae_lambda() -> f32 {
    0.95
}

fn default_clip_ratio() -> f32 {
    0.2
}

fn default_weight_entropy() -> f32 {
    0.00025
}

fn default_value_coefficient() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

/// `memory_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySpec {
    #[serde(rename = "type", default = "MemorySpec::default_kind")]
    pub kind: String,
    pub capacity: usize,
    #[serde(default)]
    pub sample_with_replacement: bool,
}

impl MemorySpec {
    fn default_kind() -> String {
        "ring_buffer".to_string()
    }
}

/// `observe_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveSpec {
    /// Agent steps collected per round
    pub buffer_size: usize,
}

/// `update_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpec {
    #[serde(default = "UpdateSpec::default_mode")]
    pub update_mode: String,
    #[serde(default = "default_true")]
    pub do_updates: bool,
    pub update_interval: usize,
    /// Defaults to the memory capacity
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "UpdateSpec::default_num_iterations")]
    pub num_iterations: usize,
    #[serde(default = "UpdateSpec::default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub steps_before_update: Option<usize>,
}

impl UpdateSpec {
    fn default_mode() -> String {
        "time_steps".to_string()
    }

    fn default_num_iterations() -> usize {
        PpoConfig::default().num_iterations
    }

    fn default_sample_size() -> usize {
        PpoConfig::default().sample_size
    }
}

/// `optimizer_spec` / `value_function_optimizer_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSpec {
    #[serde(rename = "type", default = "OptimizerSpec::default_kind")]
    pub kind: String,
    #[serde(default = "OptimizerSpec::default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub clip_grad_norm: Option<f32>,
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            learning_rate: Self::default_learning_rate(),
            clip_grad_norm: None,
        }
    }
}

impl OptimizerSpec {
    fn default_kind() -> String {
        "adam".to_string()
    }

    fn default_learning_rate() -> f64 {
        OptimizerSettings::default().learning_rate
    }

    fn settings(&self, field: &'static str) -> Result<OptimizerSettings, ConfigError> {
        if self.kind != "adam" {
            return Err(ConfigError::UnknownOptimizer(self.kind.clone()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::NotPositive { field });
        }
        if let Some(norm) = self.clip_grad_norm {
            if !(norm > 0.0) {
                return Err(ConfigError::NotPositive {
                    field: "clip_grad_norm",
                });
            }
        }
        Ok(OptimizerSettings {
            learning_rate: self.learning_rate,
            clip_grad_norm: self.clip_grad_norm,
        })
    }
}

/// `execution_spec`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSpec {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub ray_spec: RaySpec,
}

/// `execution_spec.ray_spec`: sample collection topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaySpec {
    #[serde(default)]
    pub executor_spec: ExecutorSpec,
    #[serde(default)]
    pub worker_spec: WorkerSpec,
}

/// `executor_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSpec {
    pub num_cpus: usize,
    pub num_gpus: usize,
    pub num_sample_workers: usize,
    pub num_worker_samples: usize,
    pub redis_address: Option<String>,
    pub min_sample_quorum: f32,
    pub sample_timeout_secs: f64,
    pub max_worker_retries: usize,
    pub max_round_retries: usize,
}

impl Default for ExecutorSpec {
    fn default() -> Self {
        let collector = CollectorConfig::default();
        Self {
            num_cpus: 1,
            num_gpus: 0,
            num_sample_workers: collector.num_sample_workers,
            num_worker_samples: collector.num_worker_samples,
            redis_address: None,
            min_sample_quorum: collector.min_sample_quorum,
            sample_timeout_secs: collector.sample_timeout.as_secs_f64(),
            max_worker_retries: collector.max_worker_retries,
            max_round_retries: collector.max_round_retries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    #[serde(default)]
    pub gpus_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerExecutionSpec {
    #[serde(default)]
    pub gpu_spec: GpuSpec,
}

/// `worker_spec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSpec {
    #[serde(default = "default_one")]
    pub num_worker_environments: usize,
    #[serde(default)]
    pub num_background_envs: usize,
    #[serde(default)]
    pub compress_states: bool,
    #[serde(default)]
    pub execution_spec: WorkerExecutionSpec,
    #[serde(default = "default_one")]
    pub repeat_actions: usize,
    #[serde(default)]
    pub max_timesteps_per_episode: usize,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            num_worker_environments: 1,
            num_background_envs: 0,
            compress_states: false,
            execution_spec: WorkerExecutionSpec::default(),
            repeat_actions: 1,
            max_timesteps_per_episode: 0,
        }
    }
}

/// The full agent configuration document.
///
/// Unknown keys are rejected at every level that carries collection
/// settings, so a misplaced `executor_spec` fails to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Algorithm name: `ppo` or `actor_critic`
    #[serde(rename = "type")]
    pub algorithm: String,
    #[serde(default)]
    pub sample_episodes: bool,
    #[serde(default = "default_discount")]
    pub discount: f32,
    #[serde(default = "default_gae_lambda")]
    pub gae_lambda: f32,
    #[serde(default = "default_clip_ratio")]
    pub clip_ratio: f32,
    #[serde(default = "default_weight_entropy")]
    pub weight_entropy: f32,
    #[serde(default)]
    pub standardize_advantages: bool,
    #[serde(default = "default_value_coefficient")]
    pub value_function_coefficient: f32,
    #[serde(default)]
    pub value_function_clipping: Option<f32>,
    pub memory_spec: MemorySpec,
    #[serde(default)]
    pub preprocessing_spec: Vec<PreprocessingStageSpec>,
    /// Passed through to the network collaborator
    #[serde(default)]
    pub network_spec: Vec<serde_json::Value>,
    #[serde(default)]
    pub value_function_spec: Vec<serde_json::Value>,
    pub observe_spec: ObserveSpec,
    pub update_spec: UpdateSpec,
    #[serde(default)]
    pub optimizer_spec: OptimizerSpec,
    /// Defaults to `optimizer_spec`
    #[serde(default)]
    pub value_function_optimizer_spec: Option<OptimizerSpec>,
    /// Seed plus `ray_spec.{executor_spec, worker_spec}`
    #[serde(default)]
    pub execution_spec: ExecutionSpec,
}

/// Validated settings for every component.
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub ppo: PpoConfig,
    pub estimator: AdvantageEstimator,
    pub memory_capacity: usize,
    pub sampling: SamplingMode,
    pub seed: Option<u64>,
    /// Agent steps per trainer round (`observe_spec.buffer_size`)
    pub steps_per_round: usize,
    pub trigger: UpdateTrigger,
    pub trainer: TrainerConfig,
    pub collector: CollectorConfig,
    pub preprocessing: Vec<PreprocessingStageSpec>,
    pub network_spec: Vec<serde_json::Value>,
    pub value_function_spec: Vec<serde_json::Value>,
}

impl TrainerSettings {
    /// Build the ring-buffer memory, seeded when a seed is configured.
    pub fn build_memory(&self) -> Result<RingBuffer<Transition>, MemoryError> {
        match self.seed {
            Some(seed) => RingBuffer::with_seed(self.memory_capacity, self.sampling, seed),
            None => RingBuffer::new(self.memory_capacity, self.sampling),
        }
    }
}

fn positive(value: usize, field: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::NotPositive { field })
    } else {
        Ok(value)
    }
}

fn in_unit_interval(value: f32, field: &'static str) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            range: "[0, 1]",
        })
    }
}

impl AgentConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check every value and derive component settings.
    pub fn validate(&self) -> Result<TrainerSettings, ConfigError> {
        let algorithm = AlgorithmKind::parse(&self.algorithm)
            .ok_or_else(|| ConfigError::UnknownAlgorithm(self.algorithm.clone()))?;
        let update_mode = UpdateMode::parse(&self.update_spec.update_mode)
            .ok_or_else(|| ConfigError::UnknownUpdateMode(self.update_spec.update_mode.clone()))?;
        if self.memory_spec.kind != "ring_buffer" {
            return Err(ConfigError::UnknownMemory(self.memory_spec.kind.clone()));
        }

        let discount = in_unit_interval(self.discount, "discount")?;
        let gae_lambda = in_unit_interval(self.gae_lambda, "gae_lambda")?;
        if !(self.clip_ratio > 0.0 && self.clip_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "clip_ratio",
                value: self.clip_ratio as f64,
                range: "(0, 1]",
            });
        }
        if let Some(clip) = self.value_function_clipping {
            if !(clip > 0.0) {
                return Err(ConfigError::NotPositive {
                    field: "value_function_clipping",
                });
            }
        }

        let capacity = positive(self.memory_spec.capacity, "memory_spec.capacity")?;
        let buffer_size = positive(self.observe_spec.buffer_size, "observe_spec.buffer_size")?;
        let update = &self.update_spec;
        let update_interval = positive(update.update_interval, "update_spec.update_interval")?;
        let batch_size = positive(update.batch_size.unwrap_or(capacity), "update_spec.batch_size")?;
        let num_iterations = positive(update.num_iterations, "update_spec.num_iterations")?;
        let sample_size = positive(update.sample_size, "update_spec.sample_size")?;

        let policy_optimizer = self.optimizer_spec.settings("optimizer_spec.learning_rate")?;
        let value_optimizer = match &self.value_function_optimizer_spec {
            Some(spec) => spec.settings("value_function_optimizer_spec.learning_rate")?,
            None => policy_optimizer,
        };

        let executor = &self.execution_spec.ray_spec.executor_spec;
        positive(executor.num_sample_workers, "execution_spec.ray_spec.executor_spec.num_sample_workers")?;
        positive(executor.num_worker_samples, "execution_spec.ray_spec.executor_spec.num_worker_samples")?;
        in_unit_interval(executor.min_sample_quorum, "execution_spec.ray_spec.executor_spec.min_sample_quorum")?;
        if !(executor.sample_timeout_secs > 0.0) || !executor.sample_timeout_secs.is_finite() {
            return Err(ConfigError::NotPositive {
                field: "execution_spec.ray_spec.executor_spec.sample_timeout_secs",
            });
        }
        let worker = &self.execution_spec.ray_spec.worker_spec;
        positive(worker.num_worker_environments, "execution_spec.ray_spec.worker_spec.num_worker_environments")?;
        positive(worker.repeat_actions, "execution_spec.ray_spec.worker_spec.repeat_actions")?;

        for stage in &self.preprocessing_spec {
            stage.build()?;
        }

        let seed = self.execution_spec.seed;
        let ppo = PpoConfig::new()
            .with_algorithm(algorithm)
            .with_clip_ratio(self.clip_ratio)
            .with_weight_entropy(self.weight_entropy)
            .with_value_coefficient(self.value_function_coefficient)
            .with_value_clip(self.value_function_clipping)
            .with_num_iterations(num_iterations)
            .with_sample_size(sample_size)
            .with_optimizer(policy_optimizer)
            .with_value_optimizer(value_optimizer)
            .with_seed(seed);

        let worker_config = WorkerConfig {
            num_worker_environments: worker.num_worker_environments,
            num_background_envs: worker.num_background_envs,
            compress_states: worker.compress_states,
            gpus_enabled: worker.execution_spec.gpu_spec.gpus_enabled,
            repeat_actions: worker.repeat_actions,
            max_timesteps_per_episode: worker.max_timesteps_per_episode,
            sample_episodes: self.sample_episodes,
        };
        let collector = CollectorConfig {
            num_sample_workers: executor.num_sample_workers,
            num_worker_samples: executor.num_worker_samples,
            min_sample_quorum: executor.min_sample_quorum,
            sample_timeout: Duration::from_secs_f64(executor.sample_timeout_secs),
            max_worker_retries: executor.max_worker_retries,
            max_round_retries: executor.max_round_retries,
            seed,
            worker: worker_config,
            resources: ResourceHints {
                num_cpus: executor.num_cpus,
                num_gpus: executor.num_gpus,
                gpus_enabled: worker.execution_spec.gpu_spec.gpus_enabled,
                redis_address: executor.redis_address.clone(),
            },
        };

        let trigger = UpdateTrigger::new(update_mode, update_interval)
            .with_steps_before_update(update.steps_before_update.unwrap_or(0))
            .with_do_updates(update.do_updates);

        Ok(TrainerSettings {
            ppo,
            estimator: AdvantageEstimator::new(discount, gae_lambda, self.standardize_advantages),
            memory_capacity: capacity,
            sampling: if self.memory_spec.sample_with_replacement {
                SamplingMode::WithReplacement
            } else {
                SamplingMode::WithoutReplacement
            },
            seed,
            steps_per_round: buffer_size,
            trigger,
            trainer: TrainerConfig::new().with_batch_size(batch_size),
            collector,
            preprocessing: self.preprocessing_spec.clone(),
            network_spec: self.network_spec.clone(),
            value_function_spec: self.value_function_spec.clone(),
        })
    }
}
