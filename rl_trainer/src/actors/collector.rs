//! Sample coordinator.
//!
//! The [`SampleCollector`] owns `num_sample_workers` worker threads and turns
//! their replies into one [`TransitionBatch`] per round:
//!
//! 1. Every live worker receives `Collect { round, num_worker_samples }`.
//! 2. Replies are accepted until `sample_timeout`. Replies tagged with an
//!    older round are discarded.
//! 3. Workers that fail or time out are respawned, at most
//!    `max_worker_retries` times per slot.
//! 4. If at least `ceil(min_sample_quorum · workers)` workers delivered, the
//!    (possibly partial) round is returned. Otherwise it is retried up to
//!    `max_round_retries` times before failing with
//!    [`CollectionError::Timeout`].

use super::config::CollectorConfig;
use super::rollout::RolloutError;
use super::worker::{PolicyFactory, SampleWorker, WorkerHandle, WorkerSpawn};
use crate::algorithms::network::{PolicyError, PolicyParameters};
use crate::core::compression::CompressionError;
use crate::core::transition::TransitionBatch;
use crate::environment::EnvFactory;
use crate::messages::{WorkerMsg, WorkerReport, WorkerStats};
use crate::preprocessing::PreprocessingStageSpec;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while collecting a round.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("round {round} timed out: {delivered} of {required} workers delivered")]
    Timeout {
        round: u64,
        delivered: usize,
        required: usize,
    },
    #[error("all sample workers have failed")]
    AllWorkersFailed,
    #[error("worker report channel disconnected")]
    Disconnected,
    #[error(transparent)]
    Rollout(#[from] RolloutError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("failed to spawn worker {worker_id}: {reason}")]
    Spawn { worker_id: usize, reason: String },
}

struct WorkerSlot {
    handle: Option<WorkerHandle>,
    generation: u32,
    retries_used: usize,
    stats: WorkerStats,
}

/// Coordinates sample workers.
pub struct SampleCollector {
    config: CollectorConfig,
    env_factory: EnvFactory,
    policy_factory: PolicyFactory,
    preprocessing: Arc<Vec<PreprocessingStageSpec>>,
    workers: Vec<WorkerSlot>,
    /// Replaced threads that may still be finishing a stale round
    abandoned: Vec<WorkerHandle>,
    report_tx: Sender<WorkerReport>,
    report_rx: Receiver<WorkerReport>,
    round: u64,
    parameters: Option<PolicyParameters>,
    stopped: bool,
}

impl SampleCollector {
    /// Spawn all workers.
    pub fn new(
        config: CollectorConfig,
        env_factory: EnvFactory,
        policy_factory: PolicyFactory,
        preprocessing: Vec<PreprocessingStageSpec>,
    ) -> Result<Self, CollectionError> {
        let (report_tx, report_rx) = crossbeam_channel::unbounded();
        let hints = &config.resources;
        log::info!(
            "Sample collector: {} workers x {} envs (+{} background), resources: cpus={} gpus={} gpus_enabled={} redis={:?}",
            config.num_sample_workers,
            config.worker.num_worker_environments,
            config.worker.num_background_envs,
            hints.num_cpus,
            hints.num_gpus,
            hints.gpus_enabled,
            hints.redis_address
        );

        let mut collector = Self {
            workers: Vec::with_capacity(config.num_sample_workers),
            config,
            env_factory,
            policy_factory,
            preprocessing: Arc::new(preprocessing),
            abandoned: Vec::new(),
            report_tx,
            report_rx,
            round: 0,
            parameters: None,
            stopped: false,
        };

        for worker_id in 0..collector.config.num_sample_workers {
            let handle = collector.spawn_worker(worker_id, 0)?;
            collector.workers.push(WorkerSlot {
                handle: Some(handle),
                generation: 0,
                retries_used: 0,
                stats: WorkerStats::new(worker_id),
            });
        }
        Ok(collector)
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Workers with a running thread.
    pub fn num_live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.handle.is_some()).count()
    }

    /// Current round number (0 before the first round).
    pub fn round(&self) -> u64 {
        self.round
    }

    fn spawn_worker(&self, worker_id: usize, generation: u32) -> Result<WorkerHandle, CollectionError> {
        let spawn = WorkerSpawn {
            worker_id,
            generation,
            config: self.config.worker.clone(),
            seed: self.config.seed.map(|s| s.wrapping_add(worker_id as u64)),
            env_factory: self.env_factory.clone(),
            policy_factory: self.policy_factory.clone(),
            preprocessing: self.preprocessing.clone(),
        };
        let handle = SampleWorker::spawn(spawn, self.report_tx.clone()).map_err(|e| CollectionError::Spawn {
            worker_id,
            reason: e.to_string(),
        })?;
        if let Some(parameters) = &self.parameters {
            handle.send(WorkerMsg::UpdateParameters(parameters.clone()));
        }
        Ok(handle)
    }

    /// Send new parameters to every live worker. Respawned workers receive
    /// the latest parameters on start.
    pub fn broadcast_parameters(&mut self, parameters: PolicyParameters) {
        log::debug!(
            "Broadcasting parameters v{} ({} bytes)",
            parameters.version,
            parameters.size_bytes()
        );
        for worker in &self.workers {
            if let Some(handle) = &worker.handle {
                handle.send(WorkerMsg::UpdateParameters(parameters.clone()));
            }
        }
        self.parameters = Some(parameters);
    }

    /// Replace a failed worker if it has retries left.
    fn respawn(&mut self, worker_id: usize) {
        let Some(slot) = self.workers.get_mut(worker_id) else {
            return;
        };
        if let Some(old) = slot.handle.take() {
            old.stop();
            self.abandoned.push(old);
        }
        self.abandoned.retain(|h| !h.is_finished());
        if slot.retries_used >= self.config.max_worker_retries {
            log::error!(
                "Sample worker {} exhausted {} retries; not respawning",
                worker_id,
                self.config.max_worker_retries
            );
            return;
        }
        let generation = slot.generation + 1;
        match self.spawn_worker(worker_id, generation) {
            Ok(handle) => {
                let slot = &mut self.workers[worker_id];
                slot.handle = Some(handle);
                slot.generation = generation;
                slot.retries_used += 1;
                slot.stats.record_respawn();
                log::info!(
                    "Respawned sample worker {} ({}/{})",
                    worker_id,
                    slot.retries_used,
                    self.config.max_worker_retries
                );
            }
            Err(e) => log::error!("Failed to respawn worker {}: {}", worker_id, e),
        }
    }

    /// Collect one round from all live workers.
    pub fn collect_round(&mut self) -> Result<TransitionBatch, CollectionError> {
        let required = self.config.quorum();
        let mut delivered = 0;

        for attempt in 0..=self.config.max_round_retries {
            self.round += 1;
            let round = self.round;

            let mut pending: HashSet<usize> = HashSet::new();
            let mut unreachable = Vec::new();
            for (worker_id, worker) in self.workers.iter().enumerate() {
                if let Some(handle) = &worker.handle {
                    let msg = WorkerMsg::Collect {
                        round,
                        num_samples: self.config.num_worker_samples,
                    };
                    if handle.send(msg) {
                        pending.insert(worker_id);
                    } else {
                        unreachable.push(worker_id);
                    }
                }
            }
            for worker_id in unreachable {
                self.workers[worker_id].stats.record_failure();
                self.respawn(worker_id);
            }
            if pending.is_empty() {
                return Err(CollectionError::AllWorkersFailed);
            }

            let (batch, count) = self.await_round(round, &mut pending)?;
            delivered = count;
            if delivered >= required {
                if delivered < self.workers.len() {
                    log::info!(
                        "Round {}: proceeding with {}/{} workers",
                        round,
                        delivered,
                        self.workers.len()
                    );
                }
                return Ok(batch);
            }
            log::warn!(
                "Round {}: {}/{} workers delivered (quorum {}), attempt {}/{}",
                round,
                delivered,
                self.workers.len(),
                required,
                attempt + 1,
                self.config.max_round_retries + 1
            );
        }

        Err(CollectionError::Timeout {
            round: self.round,
            delivered,
            required,
        })
    }

    /// Wait for replies to `round` until the timeout. Workers still pending
    /// at the deadline are treated as failed.
    fn await_round(
        &mut self,
        round: u64,
        pending: &mut HashSet<usize>,
    ) -> Result<(TransitionBatch, usize), CollectionError> {
        let deadline = Instant::now() + self.config.sample_timeout;
        let mut merged = TransitionBatch::default();
        let mut delivered = 0;

        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let report = match self.report_rx.recv_timeout(remaining) {
                Ok(report) => report,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(CollectionError::Disconnected),
            };

            match report {
                WorkerReport::Samples {
                    worker_id,
                    round: r,
                    payload,
                    stats,
                } => {
                    if r != round || !pending.remove(&worker_id) {
                        log::debug!(
                            "Discarding stale samples from worker {} (round {}, current {})",
                            worker_id,
                            r,
                            round
                        );
                        continue;
                    }
                    match payload.unpack() {
                        Ok(batch) => {
                            let slot = &mut self.workers[worker_id];
                            slot.stats.record_round(&batch, &stats);
                            merged.extend(batch);
                            delivered += 1;
                        }
                        Err(e) => {
                            log::warn!("Worker {} sent an undecodable batch: {}", worker_id, e);
                            self.workers[worker_id].stats.record_failure();
                            self.respawn(worker_id);
                        }
                    }
                }
                WorkerReport::Failed {
                    worker_id,
                    generation,
                    round: r,
                    error,
                } => {
                    if !self.is_current_generation(worker_id, generation) {
                        log::debug!("Ignoring failure of replaced worker {} (gen {})", worker_id, generation);
                        continue;
                    }
                    log::warn!("Worker {} failed in round {:?}: {}", worker_id, r, error);
                    pending.remove(&worker_id);
                    self.workers[worker_id].stats.record_failure();
                    self.respawn(worker_id);
                }
                WorkerReport::Stopped { .. } => {}
            }
        }

        let timed_out: Vec<usize> = pending.drain().collect();
        for worker_id in timed_out {
            log::warn!(
                "Worker {} missed the {:?} deadline for round {}",
                worker_id,
                self.config.sample_timeout,
                round
            );
            self.workers[worker_id].stats.record_failure();
            self.respawn(worker_id);
        }

        Ok((merged, delivered))
    }

    /// Reports from abandoned threads carry an older generation.
    fn is_current_generation(&self, worker_id: usize, generation: u32) -> bool {
        self.workers
            .get(worker_id)
            .map_or(false, |w| w.handle.is_some() && w.generation == generation)
    }

    /// Lifetime statistics per worker slot.
    pub fn result_by_worker(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.stats.clone()).collect()
    }

    /// Stop all workers and drain in-flight replies until `drain_timeout`.
    ///
    /// Returns the number of threads joined; threads still busy at the
    /// deadline are detached.
    pub fn shutdown(&mut self, drain_timeout: Duration) -> usize {
        if self.stopped {
            return 0;
        }
        self.stopped = true;

        let mut handles: Vec<WorkerHandle> = self.workers.iter_mut().filter_map(|w| w.handle.take()).collect();
        handles.append(&mut self.abandoned);
        for handle in &handles {
            handle.stop();
        }

        let deadline = Instant::now() + drain_timeout;
        let mut discarded = 0;
        while handles.iter().any(|h| !h.is_finished()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self
                .report_rx
                .recv_timeout(remaining.min(Duration::from_millis(50)))
            {
                Ok(WorkerReport::Samples { .. }) => discarded += 1,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut joined = 0;
        for handle in handles {
            if handle.is_finished() {
                let worker_id = handle.worker_id;
                if handle.join().is_err() {
                    log::warn!("Sample worker {} panicked during shutdown", worker_id);
                }
                joined += 1;
            } else {
                log::warn!("Sample worker {} still busy at shutdown; detaching", handle.worker_id);
            }
        }
        log::info!(
            "Sample collector stopped: {} threads joined, {} in-flight batches discarded",
            joined,
            discarded
        );
        joined
    }
}

impl Drop for SampleCollector {
    fn drop(&mut self) {
        if !self.stopped {
            for worker in &self.workers {
                if let Some(handle) = &worker.handle {
                    handle.stop();
                }
            }
            for handle in &self.abandoned {
                handle.stop();
            }
        }
    }
}
