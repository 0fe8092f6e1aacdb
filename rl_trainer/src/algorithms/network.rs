//! Capability traits for the external policy and value networks.
//!
//! The training core never builds layers. It needs two things from a model:
//!
//! - [`PolicyNetwork`]: `forward(features) → distribution parameters`
//! - [`ValueFunction`]: `forward(features) → V(s)`
//!
//! Both are plain `burn` modules, so the learner can differentiate through
//! them (on an autodiff backend) and serialize them with a recorder.
//!
//! Workers never see the learner's modules. They act through an
//! [`ActingPolicy`], which receives parameters as bytes in a
//! [`PolicyParameters`] message. [`NetworkPolicy`] is the `burn`-backed
//! implementation.

use super::distribution::{ActionDistribution, DistributionError};
use crate::core::transition::Action;
use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;

/// A policy network: features [batch, obs_dim] → action distribution.
pub trait PolicyNetwork<B: Backend>: Module<B> {
    fn forward(&self, features: Tensor<B, 2>) -> ActionDistribution<B>;
}

/// A state-value network: features [batch, obs_dim] → V(s) [batch].
pub trait ValueFunction<B: Backend>: Module<B> {
    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 1>;
}

/// Errors raised by acting policies.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to decode parameters: {0}")]
    Recorder(String),
    #[error("observation {index} has {actual} features, expected {expected}")]
    FeatureDim { index: usize, expected: usize, actual: usize },
    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

/// Serialized policy and value parameters broadcast to workers.
///
/// Bytes are immutable once published; cloning only bumps reference counts.
#[derive(Debug, Clone)]
pub struct PolicyParameters {
    /// Learner version that produced these parameters
    pub version: u64,
    /// `BinBytesRecorder` encoding of the policy record
    pub policy: Arc<Vec<u8>>,
    /// `BinBytesRecorder` encoding of the value function record
    pub value: Arc<Vec<u8>>,
}

impl PolicyParameters {
    /// Total payload size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.policy.len() + self.value.len()
    }
}

/// Behaviour-policy output for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStep {
    pub action: Action,
    /// log π(a|s) of the chosen action
    pub log_prob: f32,
    /// V(s)
    pub value: f32,
}

/// What a sample worker needs from the current policy.
pub trait ActingPolicy: Send {
    /// Choose actions for a batch of preprocessed observations.
    fn act(&mut self, observations: &[&[f32]]) -> Result<Vec<PolicyStep>, PolicyError>;

    /// Estimate V(s) for a batch of preprocessed observations.
    fn values(&mut self, observations: &[&[f32]]) -> Result<Vec<f32>, PolicyError>;

    /// Replace the current parameters.
    fn load_parameters(&mut self, parameters: &PolicyParameters) -> Result<(), PolicyError>;

    /// Version of the parameters currently loaded (0 before the first load).
    fn version(&self) -> u64;
}

/// [`ActingPolicy`] backed by `burn` modules.
pub struct NetworkPolicy<B: Backend, P, V> {
    policy: P,
    value: V,
    device: B::Device,
    obs_dim: usize,
    version: u64,
    rng: StdRng,
}

impl<B, P, V> NetworkPolicy<B, P, V>
where
    B: Backend,
    P: PolicyNetwork<B>,
    V: ValueFunction<B>,
{
    /// Wrap freshly initialized modules. `seed` drives action sampling.
    pub fn new(policy: P, value: V, obs_dim: usize, device: B::Device, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            policy,
            value,
            device,
            obs_dim,
            version: 0,
            rng,
        }
    }

    fn batch(&self, observations: &[&[f32]]) -> Result<Tensor<B, 2>, PolicyError> {
        let mut flat = Vec::with_capacity(observations.len() * self.obs_dim);
        for (index, obs) in observations.iter().enumerate() {
            if obs.len() != self.obs_dim {
                return Err(PolicyError::FeatureDim {
                    index,
                    expected: self.obs_dim,
                    actual: obs.len(),
                });
            }
            flat.extend_from_slice(obs);
        }
        Ok(Tensor::<B, 1>::from_floats(flat.as_slice(), &self.device)
            .reshape([observations.len(), self.obs_dim]))
    }

    fn read(tensor: Tensor<B, 1>) -> Result<Vec<f32>, PolicyError> {
        tensor
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PolicyError::Distribution(DistributionError::Data(format!("{:?}", e))))
    }
}

impl<B, P, V> ActingPolicy for NetworkPolicy<B, P, V>
where
    B: Backend,
    P: PolicyNetwork<B>,
    V: ValueFunction<B>,
{
    fn act(&mut self, observations: &[&[f32]]) -> Result<Vec<PolicyStep>, PolicyError> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.batch(observations)?;
        let samples = self.policy.forward(x.clone()).sample(&mut self.rng)?;
        let values = Self::read(self.value.forward(x))?;

        Ok(samples
            .into_iter()
            .zip(values)
            .map(|(s, value)| PolicyStep {
                action: s.action,
                log_prob: s.log_prob,
                value,
            })
            .collect())
    }

    fn values(&mut self, observations: &[&[f32]]) -> Result<Vec<f32>, PolicyError> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.batch(observations)?;
        Self::read(self.value.forward(x))
    }

    fn load_parameters(&mut self, parameters: &PolicyParameters) -> Result<(), PolicyError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let policy_record: P::Record =
            Recorder::<B>::load(&recorder, parameters.policy.as_ref().clone(), &self.device)
                .map_err(|e| PolicyError::Recorder(format!("{:?}", e)))?;
        let value_record: V::Record =
            Recorder::<B>::load(&recorder, parameters.value.as_ref().clone(), &self.device)
                .map_err(|e| PolicyError::Recorder(format!("{:?}", e)))?;

        self.policy = self.policy.clone().load_record(policy_record);
        self.value = self.value.clone().load_record(value_record);
        self.version = parameters.version;
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }
}
