//! Learning components.
//!
//! - `gae`: Generalized Advantage Estimation over interleaved batches
//! - `policy_loss`: clipped surrogate, actor-critic and value losses
//! - `distribution`: categorical and diagonal Gaussian action distributions
//! - `network`: capability traits for policy/value networks and acting policies
//! - `ppo`: the PPO update engine

pub mod distribution;
pub mod gae;
pub mod network;
pub mod policy_loss;
pub mod ppo;

#[cfg(test)]
pub(crate) mod tests;

pub use distribution::{ActionDistribution, DistributionError, SampledAction};
pub use gae::{compute_gae, standardize_advantages, AdvantageEstimator, Advantages};
pub use network::{
    ActingPolicy, NetworkPolicy, PolicyError, PolicyNetwork, PolicyParameters, PolicyStep,
    ValueFunction,
};
pub use policy_loss::{actor_critic_policy_loss, ppo_clip_loss, value_loss};
pub use ppo::{
    AlgorithmKind, OptimizerSettings, PolicyLearner, PpoConfig, PpoUpdateEngine, RoundPhase,
    UpdateError, UpdateReport,
};
