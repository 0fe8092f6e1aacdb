//! Two-layer policy and value networks.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::tanh;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rl_trainer::{ActionDistribution, PolicyNetwork, ValueFunction};

#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    hidden_0: Linear<B>,
    hidden_1: Linear<B>,
    logits: Linear<B>,
}

impl<B: Backend> PolicyNet<B> {
    pub fn new(obs_dim: usize, n_actions: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            hidden_0: LinearConfig::new(obs_dim, hidden).init(device),
            hidden_1: LinearConfig::new(hidden, hidden).init(device),
            logits: LinearConfig::new(hidden, n_actions).init(device),
        }
    }
}

impl<B: Backend> PolicyNetwork<B> for PolicyNet<B> {
    fn forward(&self, features: Tensor<B, 2>) -> ActionDistribution<B> {
        let x = tanh(self.hidden_0.forward(features));
        let x = tanh(self.hidden_1.forward(x));
        ActionDistribution::categorical(self.logits.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct ValueNet<B: Backend> {
    hidden_0: Linear<B>,
    hidden_1: Linear<B>,
    value: Linear<B>,
}

impl<B: Backend> ValueNet<B> {
    pub fn new(obs_dim: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            hidden_0: LinearConfig::new(obs_dim, hidden).init(device),
            hidden_1: LinearConfig::new(hidden, hidden).init(device),
            value: LinearConfig::new(hidden, 1).init(device),
        }
    }
}

impl<B: Backend> ValueFunction<B> for ValueNet<B> {
    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 1> {
        let x = tanh(self.hidden_0.forward(features));
        let x = tanh(self.hidden_1.forward(x));
        self.value.forward(x).flatten::<1>(0, 1)
    }
}
