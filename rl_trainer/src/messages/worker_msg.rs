//! Worker commands and replies.

use crate::algorithms::network::PolicyParameters;
use crate::core::compression::StatePayload;

/// Commands sent to a sample worker.
#[derive(Debug, Clone)]
pub enum WorkerMsg {
    /// Collect `num_samples` transitions for round `round`.
    Collect { round: u64, num_samples: usize },

    /// Load new policy parameters before the next collection.
    UpdateParameters(PolicyParameters),

    /// Stop the worker gracefully.
    Stop,
}

/// Collection timing reported alongside a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundStats {
    /// Wall-clock collection time
    pub elapsed_secs: f64,
    /// Policy version the worker acted with
    pub policy_version: u64,
}

/// Replies sent by sample workers to the coordinator.
#[derive(Debug, Clone)]
pub enum WorkerReport {
    /// A finished round.
    Samples {
        worker_id: usize,
        round: u64,
        payload: StatePayload,
        stats: RoundStats,
    },

    /// Collection or parameter loading failed; the worker has exited.
    Failed {
        worker_id: usize,
        /// Respawn generation of the failed thread
        generation: u32,
        round: Option<u64>,
        error: String,
    },

    /// Worker exited after `Stop`.
    Stopped { worker_id: usize },
}

impl WorkerReport {
    pub fn worker_id(&self) -> usize {
        match self {
            WorkerReport::Samples { worker_id, .. }
            | WorkerReport::Failed { worker_id, .. }
            | WorkerReport::Stopped { worker_id } => *worker_id,
        }
    }
}
