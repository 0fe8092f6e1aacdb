//! Sample worker threads.
//!
//! A worker owns a [`RolloutCollector`] and serves [`WorkerMsg`] commands
//! until it is told to stop or something fails. Failures (including panics)
//! are reported once as [`WorkerReport::Failed`], after which the thread
//! exits and the coordinator decides whether to respawn it.

use super::config::WorkerConfig;
use super::rollout::RolloutCollector;
use crate::algorithms::network::{ActingPolicy, PolicyError};
use crate::core::compression::StatePayload;
use crate::environment::EnvFactory;
use crate::messages::{RoundStats, WorkerMsg, WorkerReport};
use crate::preprocessing::PreprocessingStageSpec;
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Builds a worker's acting policy from `(worker_id, seed)`.
pub type PolicyFactory =
    Arc<dyn Fn(usize, Option<u64>) -> Result<Box<dyn ActingPolicy>, PolicyError> + Send + Sync>;

/// Everything a worker thread needs to build its collector.
#[derive(Clone)]
pub struct WorkerSpawn {
    pub worker_id: usize,
    /// Incremented on every respawn of the same slot
    pub generation: u32,
    pub config: WorkerConfig,
    pub seed: Option<u64>,
    pub env_factory: EnvFactory,
    pub policy_factory: PolicyFactory,
    pub preprocessing: Arc<Vec<PreprocessingStageSpec>>,
}

/// Handle for a spawned worker thread.
pub struct WorkerHandle {
    pub worker_id: usize,
    cmd_tx: Sender<WorkerMsg>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Send a command. Returns false if the worker has exited.
    pub fn send(&self, msg: WorkerMsg) -> bool {
        self.cmd_tx.send(msg).is_ok()
    }

    /// Ask the worker to stop (non-blocking).
    pub fn stop(&self) {
        let _ = self.cmd_tx.try_send(WorkerMsg::Stop);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker thread to finish.
    pub fn join(mut self) -> std::thread::Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}

/// Spawns sample worker threads.
pub struct SampleWorker;

impl SampleWorker {
    /// Spawn a thread named `Sample-Worker-{id}`.
    pub fn spawn(spawn: WorkerSpawn, reports: Sender<WorkerReport>) -> std::io::Result<WorkerHandle> {
        let worker_id = spawn.worker_id;
        let generation = spawn.generation;
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();

        let thread = std::thread::Builder::new()
            .name(format!("Sample-Worker-{}", worker_id))
            .spawn(move || {
                let mut active_round = None;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    serve(&spawn, &cmd_rx, &reports, &mut active_round)
                }));
                let error = match result {
                    Ok(Ok(())) => {
                        let _ = reports.send(WorkerReport::Stopped { worker_id });
                        return;
                    }
                    Ok(Err(error)) => error,
                    Err(_) => "worker panicked".to_string(),
                };
                log::warn!("Sample worker {} failed: {}", worker_id, error);
                let _ = reports.send(WorkerReport::Failed {
                    worker_id,
                    generation,
                    round: active_round,
                    error,
                });
            })?;

        Ok(WorkerHandle {
            worker_id,
            cmd_tx,
            thread: Some(thread),
        })
    }
}

/// Command loop. `Ok` on a clean stop, `Err(message)` on failure.
fn serve(
    spawn: &WorkerSpawn,
    cmd_rx: &Receiver<WorkerMsg>,
    reports: &Sender<WorkerReport>,
    active_round: &mut Option<u64>,
) -> Result<(), String> {
    let policy = (spawn.policy_factory)(spawn.worker_id, spawn.seed).map_err(|e| e.to_string())?;
    let mut collector = RolloutCollector::new(
        spawn.worker_id,
        spawn.generation,
        spawn.config.clone(),
        &spawn.env_factory,
        &spawn.preprocessing,
        policy,
    )
    .map_err(|e| e.to_string())?;

    while let Ok(msg) = cmd_rx.recv() {
        match msg {
            WorkerMsg::Stop => return Ok(()),
            WorkerMsg::UpdateParameters(parameters) => {
                collector.load_parameters(&parameters).map_err(|e| e.to_string())?;
                log::trace!(
                    "Worker {} loaded parameters v{}",
                    spawn.worker_id,
                    parameters.version
                );
            }
            WorkerMsg::Collect { round, num_samples } => {
                *active_round = Some(round);
                let start = Instant::now();
                let batch = collector.collect(num_samples).map_err(|e| e.to_string())?;
                let payload =
                    StatePayload::pack(batch, spawn.config.compress_states).map_err(|e| e.to_string())?;
                let stats = RoundStats {
                    elapsed_secs: start.elapsed().as_secs_f64(),
                    policy_version: collector.policy_version(),
                };
                let report = WorkerReport::Samples {
                    worker_id: spawn.worker_id,
                    round,
                    payload,
                    stats,
                };
                if reports.send(report).is_err() {
                    // Coordinator is gone.
                    return Ok(());
                }
                *active_round = None;
            }
        }
    }
    Ok(())
}
