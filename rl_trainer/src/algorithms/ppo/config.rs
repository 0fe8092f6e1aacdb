//! Update engine configuration.

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

/// Policy objective variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Clipped surrogate objective.
    Ppo,
    /// Plain advantage-weighted log-likelihood; `clip_ratio` is ignored.
    ActorCritic,
}

impl AlgorithmKind {
    /// Parse the config `type` string.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ppo" => Some(AlgorithmKind::Ppo),
            "actor_critic" | "actor-critic" => Some(AlgorithmKind::ActorCritic),
            _ => None,
        }
    }
}

/// Adam settings for one optimizer instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub learning_rate: f64,
    /// Clip the global gradient norm to this value
    pub clip_grad_norm: Option<f32>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            clip_grad_norm: None,
        }
    }
}

impl OptimizerSettings {
    /// Build an Adam optimizer for module `M`.
    pub fn adam<B, M>(&self) -> impl Optimizer<M, B>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut config = AdamConfig::new().with_epsilon(1e-5);
        if let Some(max_norm) = self.clip_grad_norm {
            config = config.with_grad_clipping(Some(GradientClippingConfig::Norm(max_norm)));
        }
        config.init()
    }
}

/// Configuration for [`PpoUpdateEngine`](super::PpoUpdateEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpoConfig {
    /// Objective variant
    pub algorithm: AlgorithmKind,
    /// Clipping ratio ε
    pub clip_ratio: f32,
    /// Entropy bonus weight
    pub weight_entropy: f32,
    /// Value loss weight c_vf
    pub value_coefficient: f32,
    /// Optional clip range for value updates
    pub value_clip: Option<f32>,
    /// Full passes over the batch per round
    pub num_iterations: usize,
    /// Minibatch size
    pub sample_size: usize,
    /// Policy optimizer
    pub policy_optimizer: OptimizerSettings,
    /// Value optimizer (a distinct instance, same settings unless overridden)
    pub value_optimizer: OptimizerSettings,
    /// Seed for minibatch shuffling
    pub seed: Option<u64>,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::Ppo,
            clip_ratio: 0.2,
            weight_entropy: 0.00025,
            value_coefficient: 0.5,
            value_clip: None,
            num_iterations: 10,
            sample_size: 32,
            policy_optimizer: OptimizerSettings::default(),
            value_optimizer: OptimizerSettings::default(),
            seed: None,
        }
    }
}

impl PpoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmKind) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_clip_ratio(mut self, clip_ratio: f32) -> Self {
        self.clip_ratio = clip_ratio;
        self
    }

    pub fn with_weight_entropy(mut self, weight_entropy: f32) -> Self {
        self.weight_entropy = weight_entropy;
        self
    }

    pub fn with_value_coefficient(mut self, value_coefficient: f32) -> Self {
        self.value_coefficient = value_coefficient;
        self
    }

    pub fn with_value_clip(mut self, value_clip: Option<f32>) -> Self {
        self.value_clip = value_clip;
        self
    }

    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Set both optimizers to the same settings.
    pub fn with_optimizer(mut self, settings: OptimizerSettings) -> Self {
        self.policy_optimizer = settings;
        self.value_optimizer = settings;
        self
    }

    pub fn with_value_optimizer(mut self, settings: OptimizerSettings) -> Self {
        self.value_optimizer = settings;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Number of minibatches in one pass over `batch_len` transitions.
    pub fn minibatches_per_pass(&self, batch_len: usize) -> usize {
        if batch_len == 0 {
            0
        } else {
            batch_len.div_ceil(self.sample_size.max(1))
        }
    }
}
