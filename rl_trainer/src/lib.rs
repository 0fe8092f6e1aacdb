//! # rl_trainer: On-Policy Training Core
//!
//! PPO / actor-critic training with synchronous, round-based sample
//! collection across worker threads.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          SampleCollector                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Thread 1          Thread 2          Thread N                       │
//! │  ┌────────┐        ┌────────┐        ┌────────┐                    │
//! │  │Worker 0│        │Worker 1│        │Worker N│                    │
//! │  │ envs   │        │ envs   │        │ envs   │                    │
//! │  │ policy │        │ policy │        │ policy │                    │
//! │  └───┬────┘        └───┬────┘        └───┬────┘                    │
//! │      │   WorkerReport  │                 │                          │
//! │      └─────────────────┼─────────────────┘                          │
//! │                        ▼                                            │
//! │              ┌─────────────────┐      ┌──────────────────┐         │
//! │              │ TransitionBatch │      │ PolicyParameters │         │
//! │              └────────┬────────┘      └────────▲─────────┘         │
//! │                       ▼                        │                    │
//! │              ┌─────────────────┐      ┌────────┴─────────┐         │
//! │              │ ExperienceMemory│ ───► │ PpoUpdateEngine  │         │
//! │              └─────────────────┘      └──────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collection and updates alternate: the [`Trainer`] runs one collection
//! round, appends it to memory, and runs an update round whenever the
//! [`UpdateTrigger`] fires. New parameters are published to every worker
//! before the next round starts, so each round is collected with a single
//! policy version.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rl_trainer::{AgentConfig, LocalSampler, RolloutCollector, StopCondition, Trainer};
//!
//! let settings = AgentConfig::from_json_file("agent.json")?.validate()?;
//! let engine = PpoUpdateEngine::new(
//!     settings.ppo.clone(), policy_net, value_net,
//!     AdamConfig::new().init(), AdamConfig::new().init(), device,
//! );
//! let collector = RolloutCollector::new(
//!     0, 0, settings.collector.worker.clone(), &env_factory,
//!     &settings.preprocessing, Box::new(acting_policy),
//! )?;
//! let sampler = LocalSampler::new(collector, settings.steps_per_round);
//!
//! let mut trainer = Trainer::new(
//!     settings.trainer.clone(),
//!     engine,
//!     sampler,
//!     settings.build_memory()?,
//!     settings.trigger.clone(),
//!     settings.estimator,
//! );
//! let stats = trainer.run(&StopCondition::timesteps(100_000))?;
//! trainer.shutdown();
//! ```

pub mod core;
pub mod memory;
pub mod preprocessing;
pub mod environment;
pub mod algorithms;
pub mod messages;
pub mod actors;
pub mod runners;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use core::{Action, CompressedStates, CompressionError, StatePayload, Transition, TransitionBatch};
pub use memory::{ExperienceMemory, MemoryError, RingBuffer, SamplingMode, SharedMemory};
pub use preprocessing::{Observation, Pipeline, PreprocessError, PreprocessingStageSpec, Transform};
pub use environment::{EnvError, EnvFactory, Environment, StepOutcome};

// Learning
pub use algorithms::{
    AdvantageEstimator, Advantages, ActingPolicy, ActionDistribution, AlgorithmKind, NetworkPolicy,
    OptimizerSettings, PolicyError, PolicyLearner, PolicyNetwork, PolicyParameters, PpoConfig,
    PpoUpdateEngine, RoundPhase, UpdateError, UpdateReport, ValueFunction,
};

// Sample collection
pub use messages::{RoundStats, WorkerMsg, WorkerReport, WorkerStats};
pub use actors::{
    CollectionError, CollectorConfig, PolicyFactory, ResourceHints, RolloutCollector, RolloutError,
    SampleCollector, WorkerConfig,
};

// Training loop
pub use runners::{
    DistributedSampler, ExecutionStats, LocalSampler, Progress, RoundOutcome, SampleSource, StopCondition, Trainer,
    TrainerConfig, TrainerError, UpdateMode, UpdateTrigger, Workload,
};

pub use config::{AgentConfig, ConfigError, TrainerSettings};
pub use metrics::{CSVLogger, ConsoleLogger, MetricsLogger, MultiLogger, TrainingSnapshot};
