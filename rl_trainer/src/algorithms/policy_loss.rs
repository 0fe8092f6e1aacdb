//! Policy gradient loss functions for PPO and the actor-critic variant.
//!
//! Scalar versions are used for diagnostics and tests, tensor versions for
//! gradient computation.
//!
//! # Numerical Stability
//!
//! All functions that compute importance ratios via exp(log_ratio) clamp the
//! log ratio to [-20, 20] to prevent overflow. This limits ratios to approximately
//! [2e-9, 485 million], which is more than sufficient for any practical scenario.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

/// Maximum log ratio before exp() to prevent overflow.
pub const MAX_LOG_RATIO: f32 = 20.0;

/// Surrogate term for a single sample: min(r·A, clip(r, 1-ε, 1+ε)·A).
///
/// For positive advantages the clipped ratio caps the gain; for negative
/// advantages the unclipped (more negative) term is kept.
pub fn clipped_surrogate(ratio: f32, advantage: f32, clip_ratio: f32) -> f32 {
    let clipped = ratio.clamp(1.0 - clip_ratio, 1.0 + clip_ratio);
    (ratio * advantage).min(clipped * advantage)
}

/// PPO clipped surrogate loss (scalar computation).
///
/// L^CLIP(θ) = E[min(r_t(θ) * A_t, clip(r_t(θ), 1-ε, 1+ε) * A_t)]
///
/// Returns the negated objective (for minimization). Non-finite log ratios
/// fall back to a ratio of 1.
pub fn ppo_clip_loss_scalar(
    log_probs: &[f32],
    old_log_probs: &[f32],
    advantages: &[f32],
    clip_ratio: f32,
) -> f32 {
    let n = log_probs.len().min(old_log_probs.len()).min(advantages.len());
    if n == 0 {
        return 0.0;
    }

    let total: f32 = (0..n)
        .map(|i| {
            let log_ratio = log_probs[i] - old_log_probs[i];
            let clamped = if log_ratio.is_finite() {
                log_ratio.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
            } else {
                0.0
            };
            clipped_surrogate(clamped.exp(), advantages[i], clip_ratio)
        })
        .sum();

    -total / n as f32
}

/// Importance ratio π_new / π_old from log probabilities.
pub fn importance_ratio<B: Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: Tensor<B, 1>,
) -> Tensor<B, 1> {
    (log_probs - old_log_probs)
        .clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
        .exp()
}

/// PPO clipped surrogate loss (tensor computation for gradient).
///
/// # Arguments
///
/// * `log_probs` - Current policy log probs: [batch_size]
/// * `old_log_probs` - Behaviour policy log probs (constant): [batch_size]
/// * `advantages` - Advantages (constant): [batch_size]
/// * `clip_ratio` - Clipping ratio ε
pub fn ppo_clip_loss<B: Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_ratio: f32,
) -> Tensor<B, 1> {
    let ratio = importance_ratio(log_probs, old_log_probs);
    let clipped_ratio = ratio.clone().clamp(1.0 - clip_ratio, 1.0 + clip_ratio);

    let surr1 = ratio * advantages.clone();
    let surr2 = clipped_ratio * advantages;

    -surr1.min_pair(surr2).mean()
}

/// Plain advantage actor-critic policy loss: -E[log π(a|s) · A].
pub fn actor_critic_policy_loss<B: Backend>(
    log_probs: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
) -> Tensor<B, 1> {
    -(log_probs * advantages).mean()
}

/// Value function loss, optionally clipped around the behaviour values.
///
/// # Arguments
///
/// * `values` - Current value predictions: [batch_size]
/// * `old_values` - Values recorded at collection time: [batch_size]
/// * `returns` - Target returns: [batch_size]
/// * `clip_value` - Optional clip range for `values - old_values`
pub fn value_loss<B: Backend>(
    values: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    clip_value: Option<f32>,
) -> Tensor<B, 1> {
    match clip_value {
        Some(clip) => {
            let values_clipped = old_values.clone() + (values.clone() - old_values).clamp(-clip, clip);

            let loss1 = (values - returns.clone()).powf_scalar(2.0);
            let loss2 = (values_clipped - returns).powf_scalar(2.0);

            loss1.max_pair(loss2).mean()
        }
        None => (values - returns).powf_scalar(2.0).mean(),
    }
}

/// Value function loss (scalar computation).
pub fn value_loss_scalar(values: &[f32], returns: &[f32]) -> f32 {
    let n = values.len().min(returns.len());
    if n == 0 {
        return 0.0;
    }

    let mse: f32 = values
        .iter()
        .zip(returns.iter())
        .map(|(v, r)| (v - r).powi(2))
        .sum();

    mse / n as f32
}

/// Read a single-element tensor as `f32`.
pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn t(values: &[f32]) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(values, &Default::default())
    }

    #[test]
    fn test_clipped_surrogate_positive_advantage_is_capped() {
        let s = clipped_surrogate(1.5, 1.0, 0.2);
        assert!((s - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_clipped_surrogate_negative_advantage_keeps_unclipped() {
        // Clipped term is -1.2, unclipped -1.5; min picks the more negative.
        let s = clipped_surrogate(1.5, -1.0, 0.2);
        assert!((s - (-1.5)).abs() < 1e-6);

        // Below the lower bound the roles swap.
        let s = clipped_surrogate(0.5, -1.0, 0.2);
        assert!((s - (-0.8)).abs() < 1e-6);
        let s = clipped_surrogate(0.5, 1.0, 0.2);
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ppo_clip_loss_scalar_no_clip() {
        let loss = ppo_clip_loss_scalar(&[-1.0, -1.0], &[-1.0, -1.0], &[1.0, 1.0], 0.2);
        assert!((loss - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_ppo_clip_loss_scalar_non_finite_falls_back_to_unit_ratio() {
        let loss = ppo_clip_loss_scalar(&[f32::NAN], &[0.0], &[2.0], 0.2);
        assert!((loss - (-2.0)).abs() < 1e-6);
        assert_eq!(ppo_clip_loss_scalar(&[], &[], &[], 0.2), 0.0);
    }

    #[test]
    fn test_tensor_clip_loss_matches_scalar() {
        let log_probs = [0.0f32, -0.3, 0.4, -2.0];
        let old = [-1.0f32, -0.3, 0.0, -1.0];
        let adv = [1.0f32, -0.5, -1.0, 2.0];

        let expected = ppo_clip_loss_scalar(&log_probs, &old, &adv, 0.2);
        let loss = scalar(ppo_clip_loss(t(&log_probs), t(&old), t(&adv), 0.2));

        assert!((loss - expected).abs() < 1e-5, "tensor {} vs scalar {}", loss, expected);
    }

    #[test]
    fn test_actor_critic_policy_loss() {
        let loss = scalar(actor_critic_policy_loss(t(&[-0.5, -1.0]), t(&[1.0, 2.0])));
        assert!((loss - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_value_loss_unclipped_is_mse() {
        let loss = scalar(value_loss(t(&[1.0, 2.0]), t(&[0.0, 0.0]), t(&[2.0, 4.0]), None));
        assert!((loss - 2.5).abs() < 1e-6);
        assert!((value_loss_scalar(&[1.0, 2.0], &[2.0, 4.0]) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_value_loss_clipped_takes_pessimistic_branch() {
        // V moved from 0 to 1 toward return 2 but clip 0.2 holds it at 0.2:
        // max((1-2)^2, (0.2-2)^2) = 3.24
        let loss = scalar(value_loss(t(&[1.0]), t(&[0.0]), t(&[2.0]), Some(0.2)));
        assert!((loss - 3.24).abs() < 1e-5);
    }
}
