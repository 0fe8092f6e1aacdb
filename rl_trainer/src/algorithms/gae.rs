//! Generalized Advantage Estimation for PPO / actor-critic.
//!
//! GAE provides a family of policy gradient estimators parameterized by λ:
//! - λ = 0: one-step TD (low variance, high bias)
//! - λ = 1: Monte Carlo (high variance, low bias)
//! - λ ∈ (0, 1): interpolation
//!
//! ## Formula
//!
//! A_t^GAE(γ,λ) = Σ_{l=0}^{∞} (γλ)^l δ_{t+l}
//! where δ_t = r_t + γ V(s_{t+1}) (1 - done_t) - V(s_t)
//!
//! Advantages are computed per trajectory after a collection round. A batch
//! may interleave many environments and episodes, so [`AdvantageEstimator`]
//! first reconstructs trajectories from the transition metadata.
//!
//! ## References
//!
//! - Schulman et al., "High-Dimensional Continuous Control Using
//!   Generalized Advantage Estimation" (2016)

use crate::core::transition::Transition;

/// Default epsilon for advantage standardization.
pub const STANDARDIZE_EPSILON: f32 = 1e-8;

/// Compute GAE advantages and returns for a single trajectory.
///
/// # Arguments
///
/// * `rewards` - rewards received [T]
/// * `values` - value estimates V(s) [T]
/// * `dones` - terminal flags [T]
/// * `last_value` - V(s_T) for bootstrap (ignored if the last step is terminal)
/// * `gamma` - discount factor
/// * `gae_lambda` - GAE λ parameter
///
/// # Returns
///
/// (advantages, returns) - both [T]
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    last_value: f32,
    gamma: f32,
    gae_lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    debug_assert_eq!(values.len(), rewards.len());
    debug_assert_eq!(dones.len(), rewards.len());
    let n = rewards.len().min(values.len()).min(dones.len());

    let mut advantages = vec![0.0f32; n];
    let mut returns = vec![0.0f32; n];

    let mut gae = 0.0f32;
    let mut next_value = last_value;

    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };

        // TD residual: δ_t = r_t + γ * V(s_{t+1}) * (1 - done_t) - V(s_t)
        let delta = rewards[t] + gamma * next_value * not_done - values[t];

        // A_t = δ_t + γλ * (1 - done_t) * A_{t+1}
        gae = delta + gamma * gae_lambda * not_done * gae;

        advantages[t] = gae;
        returns[t] = gae + values[t];

        next_value = values[t];
    }

    (advantages, returns)
}

/// Rescale advantages to zero mean and unit variance.
///
/// # Edge Cases
///
/// - Empty slice: no-op
/// - Single element: set to 0.0 (no meaningful variance)
/// - All same values: all 0.0 (`epsilon` prevents division by zero)
pub fn standardize_advantages(advantages: &mut [f32], epsilon: f32) {
    if advantages.is_empty() {
        return;
    }

    if advantages.len() == 1 {
        advantages[0] = 0.0;
        return;
    }

    let n = advantages.len() as f64;
    let mean = advantages.iter().map(|&a| a as f64).sum::<f64>() / n;
    let var = advantages
        .iter()
        .map(|&a| {
            let d = a as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = var.sqrt() + epsilon as f64;

    for a in advantages.iter_mut() {
        *a = ((*a as f64 - mean) / std) as f32;
    }
}

/// Advantages and returns aligned with the input transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advantages {
    /// A_t per transition
    pub advantages: Vec<f32>,
    /// A_t + V(s_t) per transition
    pub returns: Vec<f32>,
    /// Number of trajectories (or truncated segments) reconstructed
    pub num_segments: usize,
}

impl Advantages {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.advantages.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.advantages.is_empty()
    }
}

/// Turns a batch of transitions into per-transition advantages and returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvantageEstimator {
    /// Discount factor γ
    pub discount: f32,
    /// Trace decay λ
    pub gae_lambda: f32,
    /// Standardize advantages over the whole batch
    pub standardize: bool,
    /// Epsilon used by standardization
    pub epsilon: f32,
}

impl Default for AdvantageEstimator {
    fn default() -> Self {
        Self {
            discount: 0.99,
            gae_lambda: 0.95,
            standardize: false,
            epsilon: STANDARDIZE_EPSILON,
        }
    }
}

impl AdvantageEstimator {
    /// Create an estimator.
    pub fn new(discount: f32, gae_lambda: f32, standardize: bool) -> Self {
        Self {
            discount,
            gae_lambda,
            standardize,
            epsilon: STANDARDIZE_EPSILON,
        }
    }

    /// Estimate advantages for a batch of transitions.
    ///
    /// Transitions are grouped by environment and ordered by step. A
    /// trajectory ends at a terminal transition, at a transition carrying a
    /// `bootstrap_value`, or where the step sequence breaks. The value after
    /// a terminal is 0; a marked segment bootstraps from its
    /// `bootstrap_value`; an unmarked break reuses the last `value_old`.
    ///
    /// Standardization, when enabled, runs once over the whole batch after
    /// every trajectory has been processed.
    pub fn estimate(&self, transitions: &[Transition]) -> Advantages {
        let n = transitions.len();
        if n == 0 {
            return Advantages::default();
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (transitions[i].env_id, transitions[i].step));

        let mut advantages = vec![0.0f32; n];
        let mut returns = vec![0.0f32; n];
        let mut num_segments = 0;

        let mut start = 0;
        while start < n {
            let mut end = start + 1;
            while end < n {
                let prev = &transitions[order[end - 1]];
                let next = &transitions[order[end]];
                if prev.ends_segment() || !prev.is_followed_by(next) {
                    break;
                }
                end += 1;
            }

            let segment = &order[start..end];
            let rewards: Vec<f32> = segment.iter().map(|&i| transitions[i].reward).collect();
            let values: Vec<f32> = segment.iter().map(|&i| transitions[i].value_old).collect();
            let dones: Vec<bool> = segment.iter().map(|&i| transitions[i].terminal).collect();

            let last = &transitions[segment[segment.len() - 1]];
            let last_value = if last.terminal {
                0.0
            } else {
                last.bootstrap_value.unwrap_or(last.value_old)
            };

            let (seg_adv, seg_ret) = compute_gae(
                &rewards,
                &values,
                &dones,
                last_value,
                self.discount,
                self.gae_lambda,
            );
            for (k, &i) in segment.iter().enumerate() {
                advantages[i] = seg_adv[k];
                returns[i] = seg_ret[k];
            }

            num_segments += 1;
            start = end;
        }

        if self.standardize {
            standardize_advantages(&mut advantages, self.epsilon);
        }

        log::debug!(
            "estimated advantages for {} transitions across {} segments",
            n,
            num_segments
        );

        Advantages {
            advantages,
            returns,
            num_segments,
        }
    }
}
