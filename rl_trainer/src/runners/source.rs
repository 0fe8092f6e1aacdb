//! Where the trainer's transitions come from.

use crate::actors::{CollectionError, RolloutCollector, SampleCollector};
use crate::algorithms::network::PolicyParameters;
use crate::core::transition::TransitionBatch;
use crate::messages::{RoundStats, WorkerStats};
use std::time::{Duration, Instant};

/// A producer of collection rounds that can be told about new parameters.
pub trait SampleSource {
    /// Collect one round.
    fn collect(&mut self) -> Result<TransitionBatch, CollectionError>;

    /// Make `parameters` the acting policy for subsequent rounds.
    fn publish(&mut self, parameters: PolicyParameters) -> Result<(), CollectionError>;

    /// Per-worker statistics.
    fn worker_stats(&self) -> Vec<WorkerStats>;

    /// Stop background work, waiting at most `drain_timeout`.
    fn shutdown(&mut self, drain_timeout: Duration) {
        let _ = drain_timeout;
    }
}

/// In-process sampling with a single [`RolloutCollector`].
#[derive(Debug)]
pub struct LocalSampler {
    collector: RolloutCollector,
    steps_per_round: usize,
    stats: WorkerStats,
}

impl LocalSampler {
    pub fn new(collector: RolloutCollector, steps_per_round: usize) -> Self {
        let stats = WorkerStats::new(collector.worker_id());
        Self {
            collector,
            steps_per_round,
            stats,
        }
    }

    pub fn collector(&self) -> &RolloutCollector {
        &self.collector
    }
}

impl SampleSource for LocalSampler {
    fn collect(&mut self) -> Result<TransitionBatch, CollectionError> {
        let start = Instant::now();
        let batch = self.collector.collect(self.steps_per_round)?;
        let round = RoundStats {
            elapsed_secs: start.elapsed().as_secs_f64(),
            policy_version: self.collector.policy_version(),
        };
        self.stats.record_round(&batch, &round);
        Ok(batch)
    }

    fn publish(&mut self, parameters: PolicyParameters) -> Result<(), CollectionError> {
        self.collector.load_parameters(&parameters)?;
        Ok(())
    }

    fn worker_stats(&self) -> Vec<WorkerStats> {
        vec![self.stats.clone()]
    }
}

/// Multi-worker sampling through a [`SampleCollector`].
///
/// One trainer round runs as many collector rounds as it takes to reach
/// `steps_per_round` transitions, so the round size follows
/// `observe_spec.buffer_size` rather than the worker topology.
pub struct DistributedSampler {
    collector: SampleCollector,
    steps_per_round: usize,
}

impl DistributedSampler {
    pub fn new(collector: SampleCollector, steps_per_round: usize) -> Self {
        Self {
            collector,
            steps_per_round: steps_per_round.max(1),
        }
    }

    pub fn collector(&self) -> &SampleCollector {
        &self.collector
    }

    pub fn steps_per_round(&self) -> usize {
        self.steps_per_round
    }
}

impl SampleSource for DistributedSampler {
    fn collect(&mut self) -> Result<TransitionBatch, CollectionError> {
        let mut batch = TransitionBatch::default();
        let mut rounds = 0;
        while batch.len() < self.steps_per_round {
            let round = self.collector.collect_round()?;
            rounds += 1;
            if round.is_empty() {
                // Workers only returned held-back episodes; try again.
                log::debug!("Collector round {} delivered no transitions", self.collector.round());
            }
            batch.extend(round);
        }
        log::trace!("Collected {} transitions in {} collector rounds", batch.len(), rounds);
        Ok(batch)
    }

    fn publish(&mut self, parameters: PolicyParameters) -> Result<(), CollectionError> {
        self.collector.broadcast_parameters(parameters);
        Ok(())
    }

    fn worker_stats(&self) -> Vec<WorkerStats> {
        self.collector.result_by_worker()
    }

    fn shutdown(&mut self, drain_timeout: Duration) {
        self.collector.shutdown(drain_timeout);
    }
}
