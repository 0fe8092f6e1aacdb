//! PPO update engine.
//!
//! One update round runs `num_iterations` passes over the batch. Each pass
//! shuffles the transitions and walks them in minibatches of `sample_size`:
//!
//! ```text
//! Collecting ──mark_ready──▶ Ready ──run_round──▶ Updating{i, m} ──▶ Done
//!      ▲                                                               │
//!      └──────────────────────────── finish_round ─────────────────────┘
//! ```
//!
//! Policy and value function have separate optimizers. Each minibatch
//! computes
//!
//! ```text
//! total = policy_loss + c_vf · value_loss − weight_entropy · entropy
//! ```
//!
//! and steps both modules. Since the two networks share no parameters this
//! is done as two backward passes, one per module. A minibatch whose loss or
//! gradients are not finite is skipped without touching the parameters.

use super::config::{AlgorithmKind, PpoConfig};
use super::grad_norm::gradient_norm;
use crate::algorithms::distribution::DistributionError;
use crate::algorithms::gae::Advantages;
use crate::algorithms::network::{PolicyNetwork, PolicyParameters, ValueFunction};
use crate::algorithms::policy_loss::{
    actor_critic_policy_loss, ppo_clip_loss, scalar, value_loss, MAX_LOG_RATIO,
};
use crate::core::transition::{Action, Transition};
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Where the engine is in its update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Workers are producing samples; parameters are stable.
    Collecting,
    /// A batch has been assembled and may be consumed.
    Ready,
    /// Inside `run_round`.
    Updating { iteration: usize, minibatch: usize },
    /// The round finished; parameters may be published.
    Done,
}

/// Errors raised by the update engine.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update requested in phase {0:?}, expected Ready")]
    NotReady(RoundPhase),
    #[error("cannot mark ready from phase {0:?}")]
    InvalidTransition(RoundPhase),
    #[error("batch has {transitions} transitions but {advantages} advantages")]
    LengthMismatch { transitions: usize, advantages: usize },
    #[error("transition {index} has {actual} features, expected {expected}")]
    FeatureDim { index: usize, expected: usize, actual: usize },
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("failed to record parameters: {0}")]
    Recorder(String),
}

/// Summary of one update round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub num_transitions: usize,
    pub iterations: usize,
    pub minibatches_applied: usize,
    pub minibatches_skipped: usize,
    /// Means over applied minibatches
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub total_loss: f32,
    pub grad_norm: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    /// Learner version after the round
    pub version: u64,
}

impl UpdateReport {
    /// True when no parameter changed during the round.
    pub fn is_noop(&self) -> bool {
        self.minibatches_applied == 0
    }
}

/// What the trainer needs from a learner.
pub trait PolicyLearner {
    fn phase(&self) -> RoundPhase;

    /// Collecting → Ready.
    fn mark_ready(&mut self) -> Result<(), UpdateError>;

    /// Ready → Done, consuming one batch.
    fn run_round(
        &mut self,
        transitions: &[Transition],
        advantages: &Advantages,
    ) -> Result<UpdateReport, UpdateError>;

    /// Done → Collecting.
    fn finish_round(&mut self);

    /// Serialize current parameters for the sample workers.
    fn export_parameters(&self) -> Result<PolicyParameters, UpdateError>;

    fn version(&self) -> u64;

    /// Policy learning rate, for reporting.
    fn learning_rate(&self) -> f64 {
        0.0
    }
}

#[derive(Default)]
struct Accumulator {
    policy_loss: f64,
    value_loss: f64,
    entropy: f64,
    total_loss: f64,
    grad_norm: f64,
    approx_kl: f64,
    clip_fraction: f64,
}

struct MinibatchStats {
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    total_loss: f32,
    grad_norm: f32,
    approx_kl: f32,
    clip_fraction: f32,
}

/// PPO learner over a policy network `P` and value function `V`.
pub struct PpoUpdateEngine<B, P, V, PO, VO>
where
    B: AutodiffBackend,
    P: PolicyNetwork<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
    PO: Optimizer<P, B>,
    VO: Optimizer<V, B>,
{
    config: PpoConfig,
    policy: P,
    value: V,
    policy_optimizer: PO,
    value_optimizer: VO,
    device: B::Device,
    rng: StdRng,
    phase: RoundPhase,
    version: u64,
}

impl<B, P, V, PO, VO> PpoUpdateEngine<B, P, V, PO, VO>
where
    B: AutodiffBackend,
    P: PolicyNetwork<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
    PO: Optimizer<P, B>,
    VO: Optimizer<V, B>,
{
    pub fn new(
        config: PpoConfig,
        policy: P,
        value: V,
        policy_optimizer: PO,
        value_optimizer: VO,
        device: B::Device,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            policy,
            value,
            policy_optimizer,
            value_optimizer,
            device,
            rng,
            phase: RoundPhase::Collecting,
            version: 0,
        }
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn value_function(&self) -> &V {
        &self.value
    }

    fn tensor(&self, values: &[f32]) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(values, &self.device)
    }

    fn run_minibatch(
        &mut self,
        transitions: &[Transition],
        advantages: &Advantages,
        indices: &[usize],
        obs_dim: usize,
    ) -> Result<Option<MinibatchStats>, UpdateError> {
        let n = indices.len();
        let mut observations = Vec::with_capacity(n * obs_dim);
        let mut actions: Vec<Action> = Vec::with_capacity(n);
        let mut old_log_probs = Vec::with_capacity(n);
        let mut old_values = Vec::with_capacity(n);
        let mut batch_advantages = Vec::with_capacity(n);
        let mut batch_returns = Vec::with_capacity(n);

        for &i in indices {
            let t = &transitions[i];
            if t.observation.len() != obs_dim {
                return Err(UpdateError::FeatureDim {
                    index: i,
                    expected: obs_dim,
                    actual: t.observation.len(),
                });
            }
            observations.extend_from_slice(&t.observation);
            actions.push(t.action.clone());
            old_log_probs.push(t.log_prob_old);
            old_values.push(t.value_old);
            batch_advantages.push(advantages.advantages[i]);
            batch_returns.push(advantages.returns[i]);
        }

        let obs = self.tensor(&observations).reshape([n, obs_dim]);
        let old_log_probs_t = self.tensor(&old_log_probs);
        let advantages_t = self.tensor(&batch_advantages);

        let dist = self.policy.forward(obs.clone());
        let log_probs = dist.log_prob(&actions)?;
        let entropy = dist.entropy().mean();

        let policy_loss = match self.config.algorithm {
            AlgorithmKind::Ppo => ppo_clip_loss(
                log_probs.clone(),
                old_log_probs_t,
                advantages_t,
                self.config.clip_ratio,
            ),
            AlgorithmKind::ActorCritic => actor_critic_policy_loss(log_probs.clone(), advantages_t),
        };

        let values = self.value.forward(obs);
        let v_loss = value_loss(
            values,
            self.tensor(&old_values),
            self.tensor(&batch_returns),
            self.config.value_clip,
        );

        let policy_loss_val = scalar(policy_loss.clone());
        let value_loss_val = scalar(v_loss.clone());
        let entropy_val = scalar(entropy.clone());
        let total = policy_loss_val + self.config.value_coefficient * value_loss_val
            - self.config.weight_entropy * entropy_val;

        if !total.is_finite() {
            log::warn!(
                "Skipping minibatch: non-finite loss (policy={}, value={}, entropy={})",
                policy_loss_val,
                value_loss_val,
                entropy_val
            );
            return Ok(None);
        }

        let (approx_kl, clip_fraction) =
            ratio_diagnostics(log_probs.detach(), &old_log_probs, self.config.clip_ratio)?;

        let policy_objective = policy_loss - entropy.mul_scalar(self.config.weight_entropy);
        let policy_grads = GradientsParams::from_grads(policy_objective.backward(), &self.policy);
        let value_objective = v_loss.mul_scalar(self.config.value_coefficient);
        let value_grads = GradientsParams::from_grads(value_objective.backward(), &self.value);

        let (Some(policy_norm), Some(value_norm)) = (
            gradient_norm::<B, P>(&self.policy, &policy_grads),
            gradient_norm::<B, V>(&self.value, &value_grads),
        ) else {
            log::warn!("Skipping minibatch: non-finite gradients");
            return Ok(None);
        };

        self.policy = self.policy_optimizer.step(
            self.config.policy_optimizer.learning_rate,
            self.policy.clone(),
            policy_grads,
        );
        self.value = self.value_optimizer.step(
            self.config.value_optimizer.learning_rate,
            self.value.clone(),
            value_grads,
        );

        Ok(Some(MinibatchStats {
            policy_loss: policy_loss_val,
            value_loss: value_loss_val,
            entropy: entropy_val,
            total_loss: total,
            grad_norm: (policy_norm.powi(2) + value_norm.powi(2)).sqrt(),
            approx_kl,
            clip_fraction,
        }))
    }
}

/// Approximate KL `E[(r - 1) - log r]` and fraction of ratios outside the
/// clip range.
fn ratio_diagnostics<B: burn::tensor::backend::Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: &[f32],
    clip_ratio: f32,
) -> Result<(f32, f32), UpdateError> {
    let log_probs = log_probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| DistributionError::Data(format!("{:?}", e)))?;
    let n = log_probs.len().min(old_log_probs.len());
    if n == 0 {
        return Ok((0.0, 0.0));
    }

    let mut kl = 0.0f64;
    let mut clipped = 0usize;
    for (new, old) in log_probs.iter().zip(old_log_probs) {
        let log_ratio = (new - old).clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);
        let ratio = log_ratio.exp();
        kl += ((ratio - 1.0) - log_ratio) as f64;
        if (ratio - 1.0).abs() > clip_ratio {
            clipped += 1;
        }
    }
    Ok(((kl / n as f64) as f32, clipped as f32 / n as f32))
}

impl<B, P, V, PO, VO> PolicyLearner for PpoUpdateEngine<B, P, V, PO, VO>
where
    B: AutodiffBackend,
    P: PolicyNetwork<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
    PO: Optimizer<P, B>,
    VO: Optimizer<V, B>,
{
    fn phase(&self) -> RoundPhase {
        self.phase
    }

    fn mark_ready(&mut self) -> Result<(), UpdateError> {
        match self.phase {
            RoundPhase::Collecting | RoundPhase::Ready => {
                self.phase = RoundPhase::Ready;
                Ok(())
            }
            other => Err(UpdateError::InvalidTransition(other)),
        }
    }

    fn run_round(
        &mut self,
        transitions: &[Transition],
        advantages: &Advantages,
    ) -> Result<UpdateReport, UpdateError> {
        if self.phase != RoundPhase::Ready {
            return Err(UpdateError::NotReady(self.phase));
        }
        if transitions.len() != advantages.len() {
            return Err(UpdateError::LengthMismatch {
                transitions: transitions.len(),
                advantages: advantages.len(),
            });
        }

        let n = transitions.len();
        if n == 0 {
            log::debug!("Empty batch, update round is a no-op");
            self.phase = RoundPhase::Done;
            return Ok(UpdateReport {
                version: self.version,
                ..UpdateReport::default()
            });
        }

        let obs_dim = transitions[0].observation.len();
        let sample_size = self.config.sample_size.max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut acc = Accumulator::default();
        let mut report = UpdateReport {
            num_transitions: n,
            iterations: self.config.num_iterations,
            ..UpdateReport::default()
        };

        for iteration in 0..self.config.num_iterations {
            indices.shuffle(&mut self.rng);
            for (minibatch, chunk) in indices.chunks(sample_size).enumerate() {
                self.phase = RoundPhase::Updating { iteration, minibatch };
                let stats = match self.run_minibatch(transitions, advantages, chunk, obs_dim) {
                    Ok(stats) => stats,
                    Err(e) => {
                        self.phase = RoundPhase::Ready;
                        return Err(e);
                    }
                };
                match stats {
                    Some(s) => {
                        report.minibatches_applied += 1;
                        acc.policy_loss += s.policy_loss as f64;
                        acc.value_loss += s.value_loss as f64;
                        acc.entropy += s.entropy as f64;
                        acc.total_loss += s.total_loss as f64;
                        acc.grad_norm += s.grad_norm as f64;
                        acc.approx_kl += s.approx_kl as f64;
                        acc.clip_fraction += s.clip_fraction as f64;
                    }
                    None => report.minibatches_skipped += 1,
                }
            }
        }

        if report.minibatches_applied > 0 {
            self.version += 1;
            let k = report.minibatches_applied as f64;
            report.policy_loss = (acc.policy_loss / k) as f32;
            report.value_loss = (acc.value_loss / k) as f32;
            report.entropy = (acc.entropy / k) as f32;
            report.total_loss = (acc.total_loss / k) as f32;
            report.grad_norm = (acc.grad_norm / k) as f32;
            report.approx_kl = (acc.approx_kl / k) as f32;
            report.clip_fraction = (acc.clip_fraction / k) as f32;
        }
        report.version = self.version;

        log::debug!(
            "Update round: {} transitions, {} minibatches applied, {} skipped, loss={:.4}",
            n,
            report.minibatches_applied,
            report.minibatches_skipped,
            report.total_loss
        );

        self.phase = RoundPhase::Done;
        Ok(report)
    }

    fn finish_round(&mut self) {
        self.phase = RoundPhase::Collecting;
    }

    fn export_parameters(&self) -> Result<PolicyParameters, UpdateError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let policy: Vec<u8> =
            Recorder::<B::InnerBackend>::record(&recorder, self.policy.valid().into_record(), ())
                .map_err(|e| UpdateError::Recorder(format!("{:?}", e)))?;
        let value: Vec<u8> =
            Recorder::<B::InnerBackend>::record(&recorder, self.value.valid().into_record(), ())
                .map_err(|e| UpdateError::Recorder(format!("{:?}", e)))?;

        Ok(PolicyParameters {
            version: self.version,
            policy: Arc::new(policy),
            value: Arc::new(value),
        })
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn learning_rate(&self) -> f64 {
        self.config.policy_optimizer.learning_rate
    }
}
