//! Sample collection.
//!
//! - [`RolloutCollector`]: steps one worker's environments with an acting policy
//! - [`SampleWorker`]: thread wrapper serving collect/update commands
//! - [`SampleCollector`]: coordinator with round tags, timeouts, respawn and quorum
//!
//! Environments optionally step on their own `Env-Runner` threads when
//! background environments are configured.

pub mod collector;
pub mod config;
pub(crate) mod env_runner;
pub mod rollout;
pub mod worker;


pub use collector::{CollectionError, SampleCollector};
pub use config::{CollectorConfig, ResourceHints, WorkerConfig};
pub use rollout::{RolloutCollector, RolloutError};
pub use worker::{PolicyFactory, SampleWorker, WorkerHandle, WorkerSpawn};

// Re-export from messages for convenience
pub use crate::messages::{WorkerMsg, WorkerReport, WorkerStats};
