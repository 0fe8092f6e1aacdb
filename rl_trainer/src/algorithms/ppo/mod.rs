//! PPO update engine.
//!
//! - `config`: objective variant, optimizer settings and minibatch schedule
//! - `engine`: round state machine and the clipped-surrogate update
//! - `grad_norm`: gradient norm used to detect non-finite updates

pub mod config;
mod engine;
mod grad_norm;

pub use config::{AlgorithmKind, OptimizerSettings, PpoConfig};
pub use engine::{PolicyLearner, PpoUpdateEngine, RoundPhase, UpdateError, UpdateReport};
pub use grad_norm::gradient_norm;
