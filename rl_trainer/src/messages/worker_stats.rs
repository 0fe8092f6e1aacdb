//! Per-worker statistics.
//!
//! # Data Integrity
//!
//! Non-finite episode rewards are counted but never enter the running mean.

use super::RoundStats;
use crate::core::transition::TransitionBatch;
use serde::{Deserialize, Serialize};

/// Lifetime statistics for one worker slot, kept by the coordinator.
///
/// Survives respawns: a replacement worker keeps accumulating into the same
/// record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: usize,

    /// Total agent steps collected.
    pub steps: usize,

    /// Total environment frames (including repeated actions).
    pub env_frames: usize,

    /// Total episodes completed (including those with non-finite rewards).
    pub episodes: usize,

    /// Rounds delivered.
    pub rounds: usize,

    /// Number of episodes with valid (finite) rewards used in the mean.
    pub valid_episodes: usize,

    /// Episodes with NaN/Inf rewards.
    pub filtered_episodes: usize,

    /// Mean episode reward over valid episodes.
    pub mean_episode_reward: f32,

    /// Every finite episode reward, in completion order.
    pub episode_rewards: Vec<f32>,

    /// Failed rounds (errors, panics, timeouts).
    pub failures: usize,

    /// Times the worker thread was replaced.
    pub respawns: usize,

    /// Policy version used for the most recent round.
    pub policy_version: u64,

    /// Total collection time in seconds.
    pub collect_secs: f64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    /// Record one completed episode (Welford incremental mean).
    pub fn record_episode(&mut self, reward: f32) {
        self.episodes += 1;
        if !reward.is_finite() {
            self.filtered_episodes += 1;
            return;
        }
        self.valid_episodes += 1;
        self.episode_rewards.push(reward);
        let delta = reward - self.mean_episode_reward;
        self.mean_episode_reward += delta / self.valid_episodes as f32;
    }

    /// Fold a delivered round into the totals.
    pub fn record_round(&mut self, batch: &TransitionBatch, round: &RoundStats) {
        self.rounds += 1;
        self.steps = self.steps.saturating_add(batch.len());
        self.env_frames = self.env_frames.saturating_add(batch.env_frames);
        self.policy_version = round.policy_version;
        self.collect_secs += round.elapsed_secs;
        for &reward in &batch.episode_returns {
            self.record_episode(reward);
        }
        // Episodes without a reported return still count.
        let unreported = batch.episodes_completed.saturating_sub(batch.episode_returns.len());
        self.episodes += unreported;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_respawn(&mut self) {
        self.respawns += 1;
    }

    /// Steps per second of collection time.
    pub fn steps_per_second(&self) -> f64 {
        if self.collect_secs > 0.0 {
            self.steps as f64 / self.collect_secs
        } else {
            0.0
        }
    }
}
