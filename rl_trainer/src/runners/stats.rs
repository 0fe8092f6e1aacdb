//! Execution statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running totals kept by the trainer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub timesteps: usize,
    pub env_frames: usize,
    pub episodes: usize,
    pub updates: usize,
    /// Returns of completed episodes, in completion order
    pub episode_rewards: Vec<f32>,
}

impl Progress {
    /// Mean of the last `window` episode returns.
    pub fn recent_reward(&self, window: usize) -> f32 {
        let start = self.episode_rewards.len().saturating_sub(window);
        let recent = &self.episode_rewards[start..];
        if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f32>() / recent.len() as f32
        }
    }
}

/// Summary of one training run or workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub runtime_secs: f64,
    /// Agent steps executed
    pub timesteps_executed: usize,
    pub ops_per_second: f64,
    /// Environment frames including action repeats
    pub env_frames: usize,
    pub env_frames_per_second: f64,
    pub episodes_executed: usize,
    pub episodes_per_minute: f64,
    pub updates: usize,
    /// `None` when no episode finished
    pub mean_episode_reward: Option<f32>,
    pub max_episode_reward: Option<f32>,
    pub final_episode_reward: Option<f32>,
}

impl ExecutionStats {
    /// Stats for the work done between `before` and `after`.
    pub fn between(before: &Progress, after: &Progress, runtime: Duration) -> Self {
        let secs = runtime.as_secs_f64().max(1e-10);
        let timesteps = after.timesteps.saturating_sub(before.timesteps);
        let env_frames = after.env_frames.saturating_sub(before.env_frames);
        let episodes = after.episodes.saturating_sub(before.episodes);

        let rewards = after
            .episode_rewards
            .get(before.episode_rewards.len()..)
            .unwrap_or(&[]);
        let finite: Vec<f32> = rewards.iter().copied().filter(|r| r.is_finite()).collect();
        let mean_episode_reward = if finite.is_empty() {
            None
        } else {
            Some(finite.iter().sum::<f32>() / finite.len() as f32)
        };

        Self {
            runtime_secs: secs,
            timesteps_executed: timesteps,
            ops_per_second: timesteps as f64 / secs,
            env_frames,
            env_frames_per_second: env_frames as f64 / secs,
            episodes_executed: episodes,
            episodes_per_minute: episodes as f64 / (secs / 60.0),
            updates: after.updates.saturating_sub(before.updates),
            mean_episode_reward,
            max_episode_reward: finite.iter().copied().reduce(f32::max),
            final_episode_reward: rewards.last().copied(),
        }
    }

    /// Write the summary to the log.
    pub fn log_summary(&self) {
        log::info!("Finished execution in {:.2}s", self.runtime_secs);
        log::info!(
            "Time steps executed: {} ({:.1} ops/s)",
            self.timesteps_executed,
            self.ops_per_second
        );
        log::info!(
            "Env frames executed (incl. action repeats): {} ({:.1} frames/s)",
            self.env_frames,
            self.env_frames_per_second
        );
        log::info!(
            "Episodes finished: {} ({:.1} episodes/min), updates: {}",
            self.episodes_executed,
            self.episodes_per_minute,
            self.updates
        );
        if let (Some(mean), Some(max)) = (self.mean_episode_reward, self.max_episode_reward) {
            log::info!("Episode reward: mean {:.3}, max {:.3}", mean, max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_uses_only_new_work() {
        let before = Progress {
            timesteps: 100,
            env_frames: 400,
            episodes: 2,
            updates: 1,
            episode_rewards: vec![50.0, 60.0],
        };
        let after = Progress {
            timesteps: 300,
            env_frames: 1200,
            episodes: 5,
            updates: 3,
            episode_rewards: vec![50.0, 60.0, 1.0, f32::NAN, 5.0],
        };

        let stats = ExecutionStats::between(&before, &after, Duration::from_secs(2));

        assert_eq!(stats.timesteps_executed, 200);
        assert_eq!(stats.ops_per_second, 100.0);
        assert_eq!(stats.env_frames_per_second, 400.0);
        assert_eq!(stats.episodes_executed, 3);
        assert!((stats.episodes_per_minute - 90.0).abs() < 1e-9);
        assert_eq!(stats.updates, 2);
        assert_eq!(stats.mean_episode_reward, Some(3.0));
        assert_eq!(stats.max_episode_reward, Some(5.0));
        assert_eq!(stats.final_episode_reward, Some(5.0));
    }

    #[test]
    fn test_no_episodes() {
        let stats = ExecutionStats::between(&Progress::default(), &Progress::default(), Duration::ZERO);
        assert_eq!(stats.mean_episode_reward, None);
        assert_eq!(stats.max_episode_reward, None);
        assert_eq!(stats.ops_per_second, 0.0);
    }

    #[test]
    fn test_recent_reward_window() {
        let progress = Progress {
            episode_rewards: vec![0.0, 10.0, 20.0],
            ..Default::default()
        };
        assert_eq!(progress.recent_reward(2), 15.0);
        assert_eq!(progress.recent_reward(100), 10.0);
        assert_eq!(Progress::default().recent_reward(10), 0.0);
    }
}
