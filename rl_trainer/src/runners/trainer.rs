//! The collect → append → trigger → update loop.
//!
//! ```text
//! ┌──────────────┐  TransitionBatch  ┌────────┐  latest(batch_size)  ┌────────────┐
//! │ SampleSource │ ────────────────► │ Memory │ ───────────────────► │ Estimator  │
//! └──────────────┘                   └────────┘                      └─────┬──────┘
//!        ▲                                                                  │
//!        │          PolicyParameters            ┌───────────────┐           │
//!        └───────────────────────────────────── │ PolicyLearner │ ◄─────────┘
//!                                               └───────────────┘
//! ```
//!
//! One [`Trainer::step`] is one collection round followed by at most one
//! update round. Training stops on the first [`StopCondition`] limit hit
//! or when the shared stop flag is raised.
//!
//! The trainer never collects while it updates. For overlap, build it over a
//! [`SharedMemory`](crate::memory::SharedMemory) and keep a clone: another
//! thread can `append_round` extra experience or watch the fill level, and
//! each append lands whole between two trainer phases.

use super::source::SampleSource;
use super::stats::{ExecutionStats, Progress};
use super::trigger::UpdateTrigger;
use crate::actors::{CollectionError, RolloutError};
use crate::algorithms::gae::AdvantageEstimator;
use crate::algorithms::ppo::{PolicyLearner, UpdateError, UpdateReport};
use crate::config::ConfigError;
use crate::core::transition::Transition;
use crate::memory::{ExperienceMemory, MemoryError};
use crate::messages::WorkerStats;
use crate::metrics::{MetricsLogger, TrainingSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a training run.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Rollout(#[from] RolloutError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Trainer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    /// Transitions per update round (newest first)
    pub batch_size: usize,
    /// Empty memory after each update round
    pub drain_after_update: bool,
    /// Episodes averaged for the reported reward
    pub reward_window: usize,
    /// Bound on waiting for in-flight rounds at shutdown
    pub drain_timeout: Duration,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 2048,
            drain_after_update: true,
            reward_window: 100,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_drain_after_update(mut self, drain: bool) -> Self {
        self.drain_after_update = drain;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Limits on a training run. Unset limits never stop training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopCondition {
    pub max_timesteps: Option<usize>,
    pub max_episodes: Option<usize>,
    pub max_updates: Option<usize>,
}

impl StopCondition {
    pub fn timesteps(max: usize) -> Self {
        Self {
            max_timesteps: Some(max),
            ..Default::default()
        }
    }

    pub fn with_max_episodes(mut self, max: usize) -> Self {
        self.max_episodes = Some(max);
        self
    }

    pub fn with_max_updates(mut self, max: usize) -> Self {
        self.max_updates = Some(max);
        self
    }

    /// Whether `progress` has reached any limit.
    pub fn is_reached(&self, progress: &Progress) -> bool {
        self.max_timesteps.map_or(false, |max| progress.timesteps >= max)
            || self.max_episodes.map_or(false, |max| progress.episodes >= max)
            || self.max_updates.map_or(false, |max| progress.updates >= max)
    }

    /// The same limits counted from `progress` onwards.
    fn offset_by(&self, progress: &Progress) -> Self {
        Self {
            max_timesteps: self.max_timesteps.map(|m| progress.timesteps.saturating_add(m)),
            max_episodes: self.max_episodes.map(|m| progress.episodes.saturating_add(m)),
            max_updates: self.max_updates.map(|m| progress.updates.saturating_add(m)),
        }
    }
}

/// A bounded chunk of training with periodic progress reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub num_timesteps: Option<usize>,
    pub num_episodes: Option<usize>,
    /// Report every this many timesteps (0 = never)
    pub report_interval: usize,
    /// Minimum wall-clock seconds between two reports
    pub report_interval_min_seconds: f64,
}

impl Workload {
    pub fn timesteps(num_timesteps: usize) -> Self {
        Self {
            num_timesteps: Some(num_timesteps),
            num_episodes: None,
            report_interval: 0,
            report_interval_min_seconds: 0.0,
        }
    }

    pub fn episodes(num_episodes: usize) -> Self {
        Self {
            num_timesteps: None,
            num_episodes: Some(num_episodes),
            report_interval: 0,
            report_interval_min_seconds: 0.0,
        }
    }

    pub fn with_report_interval(mut self, timesteps: usize, min_seconds: f64) -> Self {
        self.report_interval = timesteps;
        self.report_interval_min_seconds = min_seconds;
        self
    }
}

/// What one [`Trainer::step`] did.
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub steps: usize,
    pub episodes: usize,
    pub env_frames: usize,
    pub update: Option<UpdateReport>,
}

/// Drives collection and updates.
pub struct Trainer<L, S, M> {
    config: TrainerConfig,
    learner: L,
    source: S,
    memory: M,
    trigger: UpdateTrigger,
    estimator: AdvantageEstimator,
    logger: Option<Box<dyn MetricsLogger>>,
    progress: Progress,
    stop_flag: Arc<AtomicBool>,
    published: bool,
    shut_down: bool,
}

impl<L, S, M> Trainer<L, S, M>
where
    L: PolicyLearner,
    S: SampleSource,
    M: ExperienceMemory<Item = Transition>,
{
    pub fn new(
        config: TrainerConfig,
        learner: L,
        source: S,
        memory: M,
        trigger: UpdateTrigger,
        estimator: AdvantageEstimator,
    ) -> Self {
        Self {
            config,
            learner,
            source,
            memory,
            trigger,
            estimator,
            logger: None,
            progress: Progress::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            published: false,
            shut_down: false,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricsLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Flag that stops training at the next round boundary when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn trigger(&self) -> &UpdateTrigger {
        &self.trigger
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.source.worker_stats()
    }

    fn publish(&mut self) -> Result<(), TrainerError> {
        let parameters = self.learner.export_parameters()?;
        log::debug!("Publishing parameters v{}", parameters.version);
        self.source.publish(parameters)?;
        self.published = true;
        Ok(())
    }

    /// One collection round, then an update round if the trigger fires.
    pub fn step(&mut self) -> Result<RoundOutcome, TrainerError> {
        if !self.published {
            // Workers act with the learner's initial parameters.
            self.publish()?;
        }

        let batch = self.source.collect()?;
        let outcome = RoundOutcome {
            steps: batch.len(),
            episodes: batch.episodes_completed,
            env_frames: batch.env_frames,
            update: None,
        };
        self.progress.timesteps += outcome.steps;
        self.progress.episodes += outcome.episodes;
        self.progress.env_frames += outcome.env_frames;
        self.progress.episode_rewards.extend(batch.episode_returns);

        self.memory.push_batch(batch.transitions);
        self.trigger.observe(outcome.steps, outcome.episodes);

        if !self.trigger.should_update() {
            return Ok(outcome);
        }
        let report = self.update()?;
        Ok(RoundOutcome {
            update: Some(report),
            ..outcome
        })
    }

    fn update(&mut self) -> Result<UpdateReport, TrainerError> {
        let batch = self.memory.latest(self.config.batch_size);
        let advantages = self.estimator.estimate(&batch);

        self.learner.mark_ready()?;
        let report = self.learner.run_round(&batch, &advantages)?;
        if self.config.drain_after_update {
            self.memory.clear();
        }
        self.learner.finish_round();
        self.trigger.reset();
        self.progress.updates += 1;

        if report.minibatches_skipped > 0 {
            log::warn!(
                "Update {}: skipped {} non-finite minibatches",
                self.progress.updates,
                report.minibatches_skipped
            );
        }
        if !report.is_noop() {
            self.publish()?;
        }

        let snapshot = TrainingSnapshot::new(
            self.progress.updates,
            self.progress.timesteps,
            self.progress.episodes,
            self.progress.recent_reward(self.config.reward_window),
        )
        .with_report(&report)
        .with_learning_rate(self.learner.learning_rate());
        log::debug!(
            "Update {}: {} transitions, policy_loss={:.4} value_loss={:.4} entropy={:.4} kl={:.5}",
            snapshot.update,
            report.num_transitions,
            snapshot.policy_loss,
            snapshot.value_loss,
            snapshot.entropy,
            snapshot.approx_kl
        );
        if let Some(logger) = self.logger.as_mut() {
            logger.log(&snapshot);
        }
        Ok(report)
    }

    /// Train until `stop` is reached or the stop flag is raised.
    pub fn run(&mut self, stop: &StopCondition) -> Result<ExecutionStats, TrainerError> {
        self.run_with_reports(stop, 0, 0.0)
    }

    /// Train for a workload, logging progress every `report_interval`
    /// timesteps and at most once per `report_interval_min_seconds`.
    pub fn execute_workload(&mut self, workload: &Workload) -> Result<ExecutionStats, TrainerError> {
        let stop = StopCondition {
            max_timesteps: workload.num_timesteps,
            max_episodes: workload.num_episodes,
            max_updates: None,
        };
        self.run_with_reports(
            &stop.offset_by(&self.progress),
            workload.report_interval,
            workload.report_interval_min_seconds,
        )
    }

    fn run_with_reports(
        &mut self,
        stop: &StopCondition,
        report_interval: usize,
        min_report_secs: f64,
    ) -> Result<ExecutionStats, TrainerError> {
        let start = Instant::now();
        let before = self.progress.clone();
        let mut next_report = before.timesteps.saturating_add(report_interval);
        let mut last_report: Option<Instant> = None;

        while !stop.is_reached(&self.progress) && !self.stop_flag.load(Ordering::Relaxed) {
            self.step()?;

            if report_interval > 0 && self.progress.timesteps >= next_report {
                let rate_ok = last_report.map_or(true, |t| t.elapsed().as_secs_f64() >= min_report_secs);
                if rate_ok {
                    let elapsed = start.elapsed().as_secs_f64().max(1e-10);
                    let done = self.progress.timesteps - before.timesteps;
                    log::info!(
                        "Timesteps {} ({:.1} ops/s), episodes {}, updates {}, mean reward {:.3}",
                        self.progress.timesteps,
                        done as f64 / elapsed,
                        self.progress.episodes,
                        self.progress.updates,
                        self.progress.recent_reward(self.config.reward_window)
                    );
                    last_report = Some(Instant::now());
                }
                while next_report <= self.progress.timesteps {
                    next_report = next_report.saturating_add(report_interval);
                }
            }
        }

        if let Some(logger) = self.logger.as_mut() {
            logger.flush();
        }
        let stats = ExecutionStats::between(&before, &self.progress, start.elapsed());
        stats.log_summary();
        Ok(stats)
    }

    /// Stop the sample source. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.stop_flag.store(true, Ordering::Relaxed);
        self.source.shutdown(self.config.drain_timeout);
    }
}
