//! Transition types recorded by sample workers.
//!
//! - `Transition`: one environment step with the behaviour-policy snapshot
//!   (`log_prob_old`, `value_old`) needed by the clipped surrogate
//! - `TransitionBatch`: the transitions produced by one collection round
//!
//! Trajectories are not stored; `AdvantageEstimator` rebuilds them from the
//! `env_id`/`episode_id`/`step` metadata on each transition.

use serde::{Deserialize, Serialize};

/// Action representation (discrete or continuous).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Discrete action index
    Discrete(u32),
    /// Continuous action vector
    Continuous(Vec<f32>),
}

impl Action {
    /// Discrete action index, if this is a discrete action.
    pub fn as_discrete(&self) -> Option<u32> {
        match self {
            Action::Discrete(a) => Some(*a),
            Action::Continuous(_) => None,
        }
    }

    /// Continuous action vector, if this is a continuous action.
    pub fn as_continuous(&self) -> Option<&[f32]> {
        match self {
            Action::Discrete(_) => None,
            Action::Continuous(a) => Some(a),
        }
    }

    /// Number of scalar components (1 for discrete actions).
    pub fn dim(&self) -> usize {
        match self {
            Action::Discrete(_) => 1,
            Action::Continuous(a) => a.len(),
        }
    }
}

/// A single recorded environment step.
///
/// Transitions are immutable once built by a worker. `log_prob_old` and
/// `value_old` are the behaviour policy's outputs at collection time and are
/// never rewritten by later updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Preprocessed features of the state the action was taken in (flattened)
    pub observation: Vec<f32>,
    /// Action taken
    pub action: Action,
    /// Reward received (summed over repeated actions)
    pub reward: f32,
    /// Episode terminated after this step
    pub terminal: bool,
    /// log π_old(a|s) at collection time
    pub log_prob_old: f32,
    /// V_old(s) at collection time
    pub value_old: f32,
    /// Globally unique environment id (worker-scoped ids are offset per worker)
    pub env_id: u64,
    /// Episode counter within `env_id`
    pub episode_id: u64,
    /// Monotone step counter within `env_id`
    pub step: u64,
    /// Parameter version of the policy that produced the action
    pub policy_version: u64,
    /// V(s_{t+1}) when the segment was cut here without a terminal
    pub bootstrap_value: Option<f32>,
}

impl Transition {
    /// Whether a trajectory segment ends at this transition.
    pub fn ends_segment(&self) -> bool {
        self.terminal || self.bootstrap_value.is_some()
    }

    /// Whether `next` directly follows `self` within the same episode.
    pub fn is_followed_by(&self, next: &Transition) -> bool {
        self.env_id == next.env_id
            && self.episode_id == next.episode_id
            && self.step + 1 == next.step
    }
}

/// Transitions returned by one worker (or one local collection) per round.
#[derive(Debug, Clone, Default)]
pub struct TransitionBatch {
    /// Recorded transitions in production order
    pub transitions: Vec<Transition>,
    /// Episodes completed during the round
    pub episodes_completed: usize,
    /// Undiscounted returns of the episodes completed during the round
    pub episode_returns: Vec<f32>,
    /// Raw environment frames stepped (includes action repeats)
    pub env_frames: usize,
}

impl TransitionBatch {
    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Check if the batch holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Append another batch, consuming it.
    pub fn extend(&mut self, other: TransitionBatch) {
        self.transitions.extend(other.transitions);
        self.episodes_completed += other.episodes_completed;
        self.episode_returns.extend(other.episode_returns);
        self.env_frames += other.env_frames;
    }
}
