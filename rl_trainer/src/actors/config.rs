//! Worker and coordinator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one sample worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Environments the policy acts on per inference call
    pub num_worker_environments: usize,
    /// Extra environments stepping while inference runs
    pub num_background_envs: usize,
    /// Ship observations as compressed states
    pub compress_states: bool,
    /// Passed through to the policy factory's device choice
    pub gpus_enabled: bool,
    /// Repeat each action this many env frames
    pub repeat_actions: usize,
    /// Truncate episodes after this many agent steps (0 = unlimited)
    pub max_timesteps_per_episode: usize,
    /// Emit only whole episodes
    pub sample_episodes: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_worker_environments: 1,
            num_background_envs: 0,
            compress_states: false,
            gpus_enabled: false,
            repeat_actions: 1,
            max_timesteps_per_episode: 0,
            sample_episodes: false,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total environments owned by one worker.
    pub fn total_envs(&self) -> usize {
        self.num_worker_environments + self.num_background_envs
    }

    /// Environments step on their own threads.
    pub fn is_threaded(&self) -> bool {
        self.num_background_envs > 0
    }

    pub fn with_num_worker_environments(mut self, n: usize) -> Self {
        self.num_worker_environments = n;
        self
    }

    pub fn with_num_background_envs(mut self, n: usize) -> Self {
        self.num_background_envs = n;
        self
    }

    pub fn with_compress_states(mut self, compress: bool) -> Self {
        self.compress_states = compress;
        self
    }

    pub fn with_repeat_actions(mut self, repeat: usize) -> Self {
        self.repeat_actions = repeat;
        self
    }

    pub fn with_max_timesteps_per_episode(mut self, max: usize) -> Self {
        self.max_timesteps_per_episode = max;
        self
    }

    pub fn with_sample_episodes(mut self, sample_episodes: bool) -> Self {
        self.sample_episodes = sample_episodes;
        self
    }
}

/// Declarative resource request for an external scheduler.
///
/// Nothing in this crate acts on these values beyond logging them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceHints {
    pub num_cpus: usize,
    pub num_gpus: usize,
    pub gpus_enabled: bool,
    pub redis_address: Option<String>,
}

/// Configuration for the sample coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub num_sample_workers: usize,
    /// Transitions requested from each worker per round
    pub num_worker_samples: usize,
    /// Fraction of workers that must deliver for a partial round to proceed
    pub min_sample_quorum: f32,
    pub sample_timeout: Duration,
    /// Respawns allowed per worker slot over the collector's lifetime
    pub max_worker_retries: usize,
    /// Extra attempts for a round that misses the quorum
    pub max_round_retries: usize,
    /// Base seed; worker `i` uses `seed + i`
    pub seed: Option<u64>,
    pub worker: WorkerConfig,
    pub resources: ResourceHints,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            num_sample_workers: 1,
            num_worker_samples: 100,
            min_sample_quorum: 1.0,
            sample_timeout: Duration::from_secs(60),
            max_worker_retries: 3,
            max_round_retries: 2,
            seed: None,
            worker: WorkerConfig::default(),
            resources: ResourceHints::default(),
        }
    }
}

impl CollectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers that must deliver for a round to proceed (at least one).
    pub fn quorum(&self) -> usize {
        let q = (self.min_sample_quorum.clamp(0.0, 1.0) * self.num_sample_workers as f32).ceil();
        (q as usize).max(1)
    }

    pub fn with_num_sample_workers(mut self, n: usize) -> Self {
        self.num_sample_workers = n;
        self
    }

    pub fn with_num_worker_samples(mut self, n: usize) -> Self {
        self.num_worker_samples = n;
        self
    }

    pub fn with_min_sample_quorum(mut self, quorum: f32) -> Self {
        self.min_sample_quorum = quorum;
        self
    }

    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }

    pub fn with_max_worker_retries(mut self, retries: usize) -> Self {
        self.max_worker_retries = retries;
        self
    }

    pub fn with_max_round_retries(mut self, retries: usize) -> Self {
        self.max_round_retries = retries;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_resources(mut self, resources: ResourceHints) -> Self {
        self.resources = resources;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_envs() {
        let config = WorkerConfig::new()
            .with_num_worker_environments(4)
            .with_num_background_envs(2);
        assert_eq!(config.total_envs(), 6);
        assert!(config.is_threaded());
        assert!(!WorkerConfig::default().is_threaded());
    }

    #[test]
    fn test_quorum_rounds_up() {
        let config = CollectorConfig::new()
            .with_num_sample_workers(4)
            .with_min_sample_quorum(0.6);
        assert_eq!(config.quorum(), 3);

        assert_eq!(config.clone().with_min_sample_quorum(1.0).quorum(), 4);
        assert_eq!(config.with_min_sample_quorum(0.0).quorum(), 1);
    }
}
