//! Environment abstraction.
//!
//! The trainer only ever talks to environments through [`Environment`].
//! Workers build their environments from an [`EnvFactory`] so a crashed
//! worker can be respawned with fresh instances.

use crate::core::transition::Action;
use crate::preprocessing::Observation;
use std::sync::Arc;
use thiserror::Error;

/// Result of stepping a single environment.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Observation after the step
    pub observation: Observation,
    pub reward: f32,
    /// Episode ended due to goal/failure
    pub terminal: bool,
    /// Episode ended due to an environment-side time limit
    pub truncated: bool,
}

impl StepOutcome {
    pub fn new(observation: Observation, reward: f32, terminal: bool) -> Self {
        Self {
            observation,
            reward,
            terminal,
            truncated: false,
        }
    }

    /// Terminal OR truncated.
    pub fn done(&self) -> bool {
        self.terminal || self.truncated
    }
}

/// Errors raised by environments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvError {
    #[error("reset failed: {0}")]
    Reset(String),
    #[error("step failed: {0}")]
    Step(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("failed to create environment {index}: {reason}")]
    Create { index: usize, reason: String },
}

/// A single, non-vectorized environment.
///
/// Environments do not auto-reset: after a done step the caller calls
/// [`reset`](Environment::reset).
pub trait Environment: Send {
    fn reset(&mut self) -> Result<Observation, EnvError>;

    fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError>;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        (**self).reset()
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError> {
        (**self).step(action)
    }
}

/// Builds the environment with the given global index.
pub type EnvFactory = Arc<dyn Fn(usize) -> Result<Box<dyn Environment>, EnvError> + Send + Sync>;
