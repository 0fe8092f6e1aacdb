//! Training loop.
//!
//! - [`Trainer`]: collect → append → trigger → update → publish
//! - [`UpdateTrigger`]: step- or episode-based update schedule with warm-up
//! - [`SampleSource`]: [`LocalSampler`] in-process, or [`DistributedSampler`]
//!   over the threaded [`SampleCollector`](crate::actors::SampleCollector)
//! - [`ExecutionStats`]: throughput and reward summary of a run

pub mod source;
pub mod stats;
pub mod trainer;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use source::{DistributedSampler, LocalSampler, SampleSource};
pub use stats::{ExecutionStats, Progress};
pub use trainer::{RoundOutcome, StopCondition, Trainer, TrainerConfig, TrainerError, Workload};
pub use trigger::{UpdateMode, UpdateTrigger};
