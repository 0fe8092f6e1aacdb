//! Minimal networks for exercising the learner.

use crate::algorithms::distribution::ActionDistribution;
use crate::algorithms::network::{PolicyNetwork, ValueFunction};
use crate::core::transition::{Action, Transition};
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

/// Linear logits over `n_actions`.
#[derive(Module, Debug)]
pub struct TinyPolicy<B: Backend> {
    head: Linear<B>,
}

impl<B: Backend> TinyPolicy<B> {
    pub fn new(obs_dim: usize, n_actions: usize, device: &B::Device) -> Self {
        Self {
            head: LinearConfig::new(obs_dim, n_actions).init(device),
        }
    }
}

impl<B: Backend> PolicyNetwork<B> for TinyPolicy<B> {
    fn forward(&self, features: Tensor<B, 2>) -> ActionDistribution<B> {
        ActionDistribution::categorical(self.head.forward(features))
    }
}

/// Linear state value.
#[derive(Module, Debug)]
pub struct TinyValue<B: Backend> {
    head: Linear<B>,
}

impl<B: Backend> TinyValue<B> {
    pub fn new(obs_dim: usize, device: &B::Device) -> Self {
        Self {
            head: LinearConfig::new(obs_dim, 1).init(device),
        }
    }
}

impl<B: Backend> ValueFunction<B> for TinyValue<B> {
    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 1> {
        self.head.forward(features).flatten::<1>(0, 1)
    }
}

/// A single-step episode on env `env_id`.
pub fn bandit_transition(env_id: u64, action: u32, reward: f32) -> Transition {
    Transition {
        observation: vec![1.0, 0.0],
        action: Action::Discrete(action),
        reward,
        terminal: true,
        log_prob_old: 0.5f32.ln(),
        value_old: 0.0,
        env_id,
        episode_id: 0,
        step: 0,
        policy_version: 0,
        bootstrap_value: None,
    }
}
