//! PPO on CartPole driven by an agent configuration document.
//!
//! The same document drives both modes; `execution_spec.ray_spec.executor_spec`
//! only matters for the multi-worker collector.

use std::sync::Arc;
use std::time::Duration;

use burn::backend::{Autodiff, NdArray};
use rl_trainer::environment::{EnvFactory, Environment};
use rl_trainer::{
    ActingPolicy, AgentConfig, CSVLogger, ConsoleLogger, DistributedSampler, LocalSampler, MultiLogger, NetworkPolicy,
    PolicyFactory, PpoUpdateEngine, RolloutCollector, SampleCollector, SampleSource, Trainer,
    TrainerError, TrainerSettings, Workload,
};

use crate::cartpole::CartPole;
use crate::nets::{PolicyNet, ValueNet};

type Inner = NdArray<f32>;
type B = Autodiff<Inner>;

const HIDDEN: usize = 64;

/// Used when no configuration file is given.
pub const DEFAULT_CONFIG: &str = r#"{
    "type": "ppo",
    "discount": 0.99,
    "gae_lambda": 0.95,
    "clip_ratio": 0.2,
    "weight_entropy": 0.01,
    "standardize_advantages": true,
    "memory_spec": { "type": "ring_buffer", "capacity": 2048 },
    "observe_spec": { "buffer_size": 256 },
    "update_spec": { "update_mode": "time_steps", "update_interval": 2048,
                     "num_iterations": 4, "sample_size": 256 },
    "optimizer_spec": { "type": "adam", "learning_rate": 0.0003, "clip_grad_norm": 0.5 },
    "execution_spec": {
        "seed": 7,
        "ray_spec": {
            "executor_spec": { "num_sample_workers": 4, "num_worker_samples": 128,
                               "min_sample_quorum": 0.75, "sample_timeout_secs": 30.0 },
            "worker_spec": { "num_worker_environments": 8, "max_timesteps_per_episode": 500 }
        }
    }
}"#;

const NUM_TIMESTEPS: usize = 200_000;

fn load_settings(config_path: Option<&str>) -> Result<TrainerSettings, TrainerError> {
    let config = match config_path {
        Some(path) => AgentConfig::from_json_file(path)?,
        None => AgentConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    Ok(config.validate()?)
}

fn env_factory(seed: u64) -> EnvFactory {
    Arc::new(move |index| Ok(Box::new(CartPole::new(seed + index as u64)) as Box<dyn Environment>))
}

fn acting_policy(seed: Option<u64>) -> Box<dyn ActingPolicy> {
    let device = Default::default();
    Box::new(NetworkPolicy::<Inner, _, _>::new(
        PolicyNet::new(CartPole::OBS_SIZE, CartPole::N_ACTIONS, HIDDEN, &device),
        ValueNet::new(CartPole::OBS_SIZE, HIDDEN, &device),
        CartPole::OBS_SIZE,
        device,
        seed,
    ))
}

fn train<S: SampleSource>(settings: &TrainerSettings, source: S) -> Result<(), TrainerError> {
    let device = Default::default();
    let engine = PpoUpdateEngine::new(
        settings.ppo.clone(),
        PolicyNet::<B>::new(CartPole::OBS_SIZE, CartPole::N_ACTIONS, HIDDEN, &device),
        ValueNet::<B>::new(CartPole::OBS_SIZE, HIDDEN, &device),
        settings.ppo.policy_optimizer.adam::<B, PolicyNet<B>>(),
        settings.ppo.value_optimizer.adam::<B, ValueNet<B>>(),
        device,
    );

    let mut loggers = MultiLogger::new().add(ConsoleLogger::new(1));
    match CSVLogger::new("cartpole_ppo.csv") {
        Ok(csv) => loggers = loggers.add(csv),
        Err(e) => log::warn!("CSV logging disabled: {}", e),
    }

    let mut trainer = Trainer::new(
        settings.trainer.clone(),
        engine,
        source,
        settings.build_memory()?,
        settings.trigger.clone(),
        settings.estimator,
    )
    .with_logger(Box::new(loggers));

    let workload = Workload::timesteps(NUM_TIMESTEPS).with_report_interval(10_000, 5.0);
    let result = trainer.execute_workload(&workload);

    for stats in trainer.worker_stats() {
        log::info!(
            "Worker {}: {} rounds, {} failures, {} respawns",
            stats.worker_id,
            stats.rounds,
            stats.failures,
            stats.respawns
        );
    }
    trainer.shutdown();

    let stats = result?;
    println!();
    println!("Trained {} timesteps in {:.1}s", stats.timesteps_executed, stats.runtime_secs);
    if let Some(reward) = stats.mean_episode_reward {
        println!("Mean episode reward: {:.1}", reward);
    }
    Ok(())
}

/// Single worker, stepping its environments on the training thread.
pub fn run_local(config_path: Option<&str>) -> Result<(), TrainerError> {
    let settings = load_settings(config_path)?;
    let seed = settings.seed.unwrap_or(0);
    println!("PPO CartPole: in-process sampling");
    println!("  {} envs, {} steps per round", settings.collector.worker.total_envs(), settings.steps_per_round);

    let collector = RolloutCollector::new(
        0,
        0,
        settings.collector.worker.clone(),
        &env_factory(seed),
        &settings.preprocessing,
        acting_policy(settings.seed),
    )?;
    train(&settings, LocalSampler::new(collector, settings.steps_per_round))
}

/// Worker threads coordinated by a `SampleCollector`.
pub fn run_distributed(config_path: Option<&str>) -> Result<(), TrainerError> {
    let settings = load_settings(config_path)?;
    let seed = settings.seed.unwrap_or(0);
    let collector_config = &settings.collector;
    println!("PPO CartPole: multi-worker sampling");
    println!(
        "  {} workers x {} envs, {} samples per worker, quorum {}",
        collector_config.num_sample_workers,
        collector_config.worker.total_envs(),
        collector_config.num_worker_samples,
        collector_config.quorum()
    );

    let policy_factory: PolicyFactory = Arc::new(|_worker_id, seed| Ok(acting_policy(seed)));
    let collector = SampleCollector::new(
        collector_config.clone().with_sample_timeout(Duration::from_secs(30)),
        env_factory(seed),
        policy_factory,
        settings.preprocessing.clone(),
    )?;
    train(&settings, DistributedSampler::new(collector, settings.steps_per_round))
}
