//! Action distributions produced by policy networks.
//!
//! A policy's `forward` returns distribution parameters: logits for discrete
//! action spaces, mean and log standard deviation for continuous ones. The
//! same type serves both sides of training:
//!
//! - workers sample actions (and their log probabilities) on plain `f32` data
//! - the update engine evaluates `log_prob` and `entropy` as differentiable tensors

use crate::core::transition::Action;
use burn::tensor::{activation::log_softmax, activation::softmax, backend::Backend, Int, Tensor};
use rand::Rng;
use thiserror::Error;

/// Minimum log standard deviation for numerical stability.
pub const LOG_STD_MIN: f32 = -20.0;

/// Maximum log standard deviation to prevent extreme exploration.
pub const LOG_STD_MAX: f32 = 2.0;

/// Errors raised when evaluating a distribution against actions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributionError {
    #[error("action {index} has the wrong kind for a {expected} distribution")]
    ActionKind { index: usize, expected: &'static str },
    #[error("action {index} has {actual} components, expected {expected}")]
    ActionDim { index: usize, expected: usize, actual: usize },
    #[error("failed to read distribution parameters: {0}")]
    Data(String),
}

/// Distribution parameters for a batch of states.
#[derive(Debug, Clone)]
pub enum ActionDistribution<B: Backend> {
    /// Categorical over discrete actions; logits are [batch, n_actions].
    Categorical { logits: Tensor<B, 2> },
    /// Diagonal Gaussian; mean and log_std are [batch, action_dim].
    Gaussian { mean: Tensor<B, 2>, log_std: Tensor<B, 2> },
}

/// A sampled action together with its log probability.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledAction {
    pub action: Action,
    pub log_prob: f32,
}

impl<B: Backend> ActionDistribution<B> {
    /// Categorical distribution from unnormalized logits.
    pub fn categorical(logits: Tensor<B, 2>) -> Self {
        ActionDistribution::Categorical { logits }
    }

    /// Gaussian distribution; `log_std` is clamped to [`LOG_STD_MIN`, `LOG_STD_MAX`].
    pub fn gaussian(mean: Tensor<B, 2>, log_std: Tensor<B, 2>) -> Self {
        ActionDistribution::Gaussian {
            mean,
            log_std: log_std.clamp(LOG_STD_MIN, LOG_STD_MAX),
        }
    }

    /// Number of states in the batch.
    pub fn batch_size(&self) -> usize {
        match self {
            ActionDistribution::Categorical { logits } => logits.dims()[0],
            ActionDistribution::Gaussian { mean, .. } => mean.dims()[0],
        }
    }

    /// Log probability of `actions` (one per state): [batch].
    pub fn log_prob(&self, actions: &[Action]) -> Result<Tensor<B, 1>, DistributionError> {
        match self {
            ActionDistribution::Categorical { logits } => {
                let n = actions.len();
                let n_actions = logits.dims()[1];
                let mut indices = Vec::with_capacity(n);
                for (index, action) in actions.iter().enumerate() {
                    let a = action.as_discrete().ok_or(DistributionError::ActionKind {
                        index,
                        expected: "categorical",
                    })?;
                    if a as usize >= n_actions {
                        return Err(DistributionError::ActionDim {
                            index,
                            expected: n_actions,
                            actual: a as usize + 1,
                        });
                    }
                    indices.push(a as i32);
                }

                let device = logits.device();
                let actions_2d: Tensor<B, 2, Int> =
                    Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device).reshape([n, 1]);
                let log_probs = log_softmax(logits.clone(), 1);
                Ok(log_probs.gather(1, actions_2d).flatten::<1>(0, 1))
            }
            ActionDistribution::Gaussian { mean, log_std } => {
                let [n, dim] = mean.dims();
                let mut flat = Vec::with_capacity(n * dim);
                for (index, action) in actions.iter().enumerate() {
                    let a = action.as_continuous().ok_or(DistributionError::ActionKind {
                        index,
                        expected: "gaussian",
                    })?;
                    if a.len() != dim {
                        return Err(DistributionError::ActionDim {
                            index,
                            expected: dim,
                            actual: a.len(),
                        });
                    }
                    flat.extend_from_slice(a);
                }

                let device = mean.device();
                let x = Tensor::<B, 1>::from_floats(flat.as_slice(), &device).reshape([n, dim]);
                let std = log_std.clone().exp();
                let normalized = (x - mean.clone()) / std;

                // log N(x; μ, σ) = -0.5 * ((x - μ)/σ)² - log(σ) - 0.5 * log(2π)
                let log_2pi = (2.0 * std::f32::consts::PI).ln();
                let per_dim = normalized.powf_scalar(2.0).mul_scalar(-0.5) - log_std.clone() - 0.5 * log_2pi;
                Ok(per_dim.sum_dim(1).flatten::<1>(0, 1))
            }
        }
    }

    /// Entropy per state: [batch].
    pub fn entropy(&self) -> Tensor<B, 1> {
        match self {
            ActionDistribution::Categorical { logits } => {
                let probs = softmax(logits.clone(), 1);
                let log_probs = log_softmax(logits.clone(), 1);
                let neg_entropy: Tensor<B, 2> = (probs * log_probs).sum_dim(1);
                -neg_entropy.flatten::<1>(0, 1)
            }
            ActionDistribution::Gaussian { log_std, .. } => {
                // H = 0.5 * D * (1 + log(2π)) + Σ log σ
                let dim = log_std.dims()[1] as f32;
                let log_2pi = (2.0 * std::f32::consts::PI).ln();
                let constant = 0.5 * dim * (1.0 + log_2pi);
                log_std.clone().sum_dim(1).flatten::<1>(0, 1).add_scalar(constant)
            }
        }
    }

    /// Sample one action per state.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Vec<SampledAction>, DistributionError> {
        match self {
            ActionDistribution::Categorical { logits } => {
                let [n, n_actions] = logits.dims();
                let log_probs = read(log_softmax(logits.clone(), 1))?;

                let mut out = Vec::with_capacity(n);
                for i in 0..n {
                    let row = &log_probs[i * n_actions..(i + 1) * n_actions];
                    // Categorical sampling via cumulative sum; the last action
                    // absorbs rounding when probabilities do not sum to 1.
                    let u: f32 = rng.gen();
                    let mut cumsum = 0.0;
                    let mut selected = n_actions - 1;
                    for (a, lp) in row.iter().enumerate() {
                        cumsum += lp.exp();
                        if u < cumsum {
                            selected = a;
                            break;
                        }
                    }
                    out.push(SampledAction {
                        action: Action::Discrete(selected as u32),
                        log_prob: row[selected],
                    });
                }
                Ok(out)
            }
            ActionDistribution::Gaussian { mean, log_std } => {
                let [n, dim] = mean.dims();
                let means = read(mean.clone())?;
                let log_stds = read(log_std.clone())?;
                let log_2pi = (2.0 * std::f32::consts::PI).ln();

                let mut out = Vec::with_capacity(n);
                for i in 0..n {
                    let mut action = Vec::with_capacity(dim);
                    let mut log_prob = 0.0;
                    for d in 0..dim {
                        let k = i * dim + d;
                        let noise = standard_normal(rng);
                        action.push(means[k] + log_stds[k].exp() * noise);
                        log_prob += -0.5 * noise * noise - log_stds[k] - 0.5 * log_2pi;
                    }
                    out.push(SampledAction {
                        action: Action::Continuous(action),
                        log_prob,
                    });
                }
                Ok(out)
            }
        }
    }

    /// Most likely action per state (argmax / mean).
    pub fn mode(&self) -> Result<Vec<Action>, DistributionError> {
        match self {
            ActionDistribution::Categorical { logits } => {
                let [n, n_actions] = logits.dims();
                let values = read(logits.clone())?;
                Ok((0..n)
                    .map(|i| {
                        let row = &values[i * n_actions..(i + 1) * n_actions];
                        let best = row
                            .iter()
                            .enumerate()
                            .fold((0, f32::NEG_INFINITY), |acc, (a, &v)| if v > acc.1 { (a, v) } else { acc })
                            .0;
                        Action::Discrete(best as u32)
                    })
                    .collect())
            }
            ActionDistribution::Gaussian { mean, .. } => {
                let [n, dim] = mean.dims();
                let values = read(mean.clone())?;
                Ok(values.chunks(dim.max(1)).take(n).map(|c| Action::Continuous(c.to_vec())).collect())
            }
        }
    }
}

fn read<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, DistributionError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| DistributionError::Data(format!("{:?}", e)))
}

/// Box-Muller transform.
fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    let u1: f32 = rng.gen_range(f32::MIN_POSITIVE..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::policy_loss::scalar;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type B = NdArray<f32>;

    fn matrix(rows: usize, cols: usize, values: &[f32]) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape([rows, cols])
    }

    #[test]
    fn test_categorical_log_prob_and_entropy() {
        // Uniform over two actions.
        let dist = ActionDistribution::categorical(matrix(2, 2, &[0.0, 0.0, 3.0, 3.0]));
        let lp = dist
            .log_prob(&[Action::Discrete(0), Action::Discrete(1)])
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(lp.iter().all(|v| (v - 0.5f32.ln()).abs() < 1e-5));

        let entropy = scalar(dist.entropy().mean());
        assert!((entropy - 2.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_categorical_rejects_wrong_actions() {
        let dist = ActionDistribution::categorical(matrix(1, 2, &[0.0, 1.0]));
        assert!(matches!(
            dist.log_prob(&[Action::Continuous(vec![0.0])]),
            Err(DistributionError::ActionKind { index: 0, .. })
        ));
        assert!(matches!(
            dist.log_prob(&[Action::Discrete(2)]),
            Err(DistributionError::ActionDim { index: 0, expected: 2, .. })
        ));
    }

    #[test]
    fn test_categorical_sample_matches_log_prob() {
        let dist = ActionDistribution::categorical(matrix(3, 3, &[0.1, 2.0, -1.0, 0.0, 0.0, 5.0, -3.0, 1.0, 1.0]));
        let mut rng = StdRng::seed_from_u64(3);
        let samples = dist.sample(&mut rng).unwrap();
        let actions: Vec<Action> = samples.iter().map(|s| s.action.clone()).collect();
        let lp = dist.log_prob(&actions).unwrap().into_data().to_vec::<f32>().unwrap();
        for (s, l) in samples.iter().zip(lp) {
            assert!((s.log_prob - l).abs() < 1e-5);
        }
    }

    #[test]
    fn test_categorical_sampling_follows_probabilities() {
        let dist = ActionDistribution::categorical(matrix(1, 2, &[0.0, 10.0]));
        let mut rng = StdRng::seed_from_u64(11);
        let picks = (0..200)
            .filter(|_| dist.sample(&mut rng).unwrap()[0].action == Action::Discrete(1))
            .count();
        assert!(picks > 190);
        assert_eq!(dist.mode().unwrap(), vec![Action::Discrete(1)]);
    }

    #[test]
    fn test_gaussian_log_prob_at_mean() {
        let dist = ActionDistribution::gaussian(matrix(1, 2, &[0.5, -0.5]), matrix(1, 2, &[0.0, 0.0]));
        let lp = scalar(dist.log_prob(&[Action::Continuous(vec![0.5, -0.5])]).unwrap());
        let expected = -(2.0 * std::f32::consts::PI).ln();
        assert!((lp - expected).abs() < 1e-5);

        // Unit-variance entropy per dim = 0.5 * (1 + log(2π)).
        let h = scalar(dist.entropy());
        assert!((h - (1.0 + (2.0 * std::f32::consts::PI).ln())).abs() < 1e-5);
        assert_eq!(dist.mode().unwrap(), vec![Action::Continuous(vec![0.5, -0.5])]);
    }

    #[test]
    fn test_gaussian_sample_log_prob_consistent() {
        let dist = ActionDistribution::gaussian(matrix(2, 1, &[1.0, -2.0]), matrix(2, 1, &[-0.5, 0.3]));
        let mut rng = StdRng::seed_from_u64(5);
        let samples = dist.sample(&mut rng).unwrap();
        let actions: Vec<Action> = samples.iter().map(|s| s.action.clone()).collect();
        let lp = dist.log_prob(&actions).unwrap().into_data().to_vec::<f32>().unwrap();
        for (s, l) in samples.iter().zip(lp) {
            assert!((s.log_prob - l).abs() < 1e-3, "sampled {} vs evaluated {}", s.log_prob, l);
        }
    }
}
