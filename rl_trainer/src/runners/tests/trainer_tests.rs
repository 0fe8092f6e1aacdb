//! Tests for the training loop.
//!
//! Scripted sources and a recording learner pin down the loop's contract:
//! - Updates fire on the trigger schedule and see the newest `batch_size`
//!   transitions
//! - Parameters are published before the first round and after every
//!   update that changed something
//! - Stop conditions, the stop flag and workloads bound the run

use crate::actors::{
    CollectionError, CollectorConfig, PolicyFactory, RolloutCollector, SampleCollector, WorkerConfig,
};
use crate::algorithms::gae::{AdvantageEstimator, Advantages};
use crate::algorithms::network::{ActingPolicy, NetworkPolicy, PolicyError, PolicyParameters, PolicyStep};
use crate::algorithms::ppo::{
    PolicyLearner, PpoConfig, PpoUpdateEngine, RoundPhase, UpdateError, UpdateReport,
};
use crate::algorithms::tests::support::{TinyPolicy, TinyValue};
use crate::core::transition::{Action, Transition, TransitionBatch};
use crate::environment::{EnvError, EnvFactory, Environment, StepOutcome};
use crate::memory::{ExperienceMemory, RingBuffer, SamplingMode, SharedMemory};
use crate::messages::WorkerStats;
use crate::preprocessing::Observation;
use crate::runners::{
    DistributedSampler, LocalSampler, SampleSource, StopCondition, Trainer, TrainerConfig, TrainerError, UpdateMode,
    UpdateTrigger, Workload,
};
use burn::backend::{Autodiff, NdArray};
use std::sync::atomic::Ordering;
use std::sync::Arc;

// ============================================================================
// Test Doubles
// ============================================================================

/// Produces `steps` transitions per round on one endless environment, with
/// `episodes` episode completions reported per round.
struct ScriptedSource {
    steps: usize,
    episodes: usize,
    next_step: u64,
    published: Vec<u64>,
}

impl ScriptedSource {
    fn new(steps: usize, episodes: usize) -> Self {
        Self {
            steps,
            episodes,
            next_step: 0,
            published: Vec::new(),
        }
    }
}

impl SampleSource for ScriptedSource {
    fn collect(&mut self) -> Result<TransitionBatch, CollectionError> {
        let transitions = (0..self.steps)
            .map(|_| {
                let step = self.next_step;
                self.next_step += 1;
                Transition {
                    observation: vec![step as f32],
                    action: Action::Discrete(0),
                    reward: 1.0,
                    terminal: false,
                    log_prob_old: -0.69,
                    value_old: 0.0,
                    env_id: 0,
                    episode_id: 0,
                    step,
                    policy_version: 0,
                    bootstrap_value: None,
                }
            })
            .collect();
        Ok(TransitionBatch {
            transitions,
            episodes_completed: self.episodes,
            episode_returns: vec![10.0; self.episodes],
            env_frames: self.steps * 2,
        })
    }

    fn publish(&mut self, parameters: PolicyParameters) -> Result<(), CollectionError> {
        self.published.push(parameters.version);
        Ok(())
    }

    fn worker_stats(&self) -> Vec<WorkerStats> {
        Vec::new()
    }
}

/// Records the batches it is asked to learn from.
#[derive(Default)]
struct RecordingLearner {
    phase: Option<RoundPhase>,
    version: u64,
    /// Steps of every transition in each round's batch
    rounds: Vec<Vec<u64>>,
    fail: bool,
}

impl PolicyLearner for RecordingLearner {
    fn phase(&self) -> RoundPhase {
        self.phase.unwrap_or(RoundPhase::Collecting)
    }

    fn mark_ready(&mut self) -> Result<(), UpdateError> {
        match self.phase() {
            RoundPhase::Collecting | RoundPhase::Ready => {
                self.phase = Some(RoundPhase::Ready);
                Ok(())
            }
            other => Err(UpdateError::InvalidTransition(other)),
        }
    }

    fn run_round(
        &mut self,
        transitions: &[Transition],
        advantages: &Advantages,
    ) -> Result<UpdateReport, UpdateError> {
        if self.fail {
            return Err(UpdateError::Recorder("scripted failure".to_string()));
        }
        assert_eq!(self.phase(), RoundPhase::Ready);
        assert_eq!(advantages.len(), transitions.len());
        self.rounds.push(transitions.iter().map(|t| t.step).collect());
        self.version += 1;
        self.phase = Some(RoundPhase::Done);
        Ok(UpdateReport {
            num_transitions: transitions.len(),
            iterations: 1,
            minibatches_applied: 1,
            version: self.version,
            ..Default::default()
        })
    }

    fn finish_round(&mut self) {
        self.phase = Some(RoundPhase::Collecting);
    }

    fn export_parameters(&self) -> Result<PolicyParameters, UpdateError> {
        Ok(PolicyParameters {
            version: self.version,
            policy: Arc::new(Vec::new()),
            value: Arc::new(Vec::new()),
        })
    }

    fn version(&self) -> u64 {
        self.version
    }
}

type ScriptedTrainer = Trainer<RecordingLearner, ScriptedSource, RingBuffer<Transition>>;

fn trainer(source: ScriptedSource, trigger: UpdateTrigger, config: TrainerConfig) -> ScriptedTrainer {
    let memory = RingBuffer::with_seed(10_000, SamplingMode::WithoutReplacement, 0).unwrap();
    Trainer::new(
        config,
        RecordingLearner::default(),
        source,
        memory,
        trigger,
        AdvantageEstimator::default(),
    )
}

// ============================================================================
// Update Schedule
// ============================================================================

#[test]
fn test_updates_follow_trigger() {
    let mut trainer = trainer(
        ScriptedSource::new(100, 0),
        UpdateTrigger::new(UpdateMode::TimeSteps, 200),
        TrainerConfig::new().with_batch_size(1000),
    );

    let stats = trainer.run(&StopCondition::timesteps(600)).unwrap();

    assert_eq!(stats.timesteps_executed, 600);
    assert_eq!(stats.env_frames, 1200);
    assert_eq!(stats.updates, 3);
    let rounds = &trainer.learner().rounds;
    assert_eq!(rounds.len(), 3);
    // memory is drained after each update
    assert_eq!(rounds[0], (0..200).collect::<Vec<u64>>());
    assert_eq!(rounds[2], (400..600).collect::<Vec<u64>>());
    assert!(trainer.memory().is_empty());
    assert_eq!(trainer.trigger().counter(), 0);
}

#[test]
fn test_batch_holds_latest_transitions() {
    let mut trainer = trainer(
        ScriptedSource::new(100, 0),
        UpdateTrigger::new(UpdateMode::TimeSteps, 200),
        TrainerConfig::new()
            .with_batch_size(150)
            .with_drain_after_update(false),
    );

    trainer.run(&StopCondition::timesteps(400)).unwrap();

    let rounds = &trainer.learner().rounds;
    assert_eq!(rounds[0], (50..200).collect::<Vec<u64>>());
    assert_eq!(rounds[1], (250..400).collect::<Vec<u64>>());
    assert_eq!(trainer.memory().size(), 400);
}

#[test]
fn test_warm_up_and_disabled_updates() {
    let trigger = UpdateTrigger::new(UpdateMode::TimeSteps, 100).with_steps_before_update(300);
    let mut warm = trainer(ScriptedSource::new(100, 0), trigger, TrainerConfig::new());
    warm.run(&StopCondition::timesteps(500)).unwrap();
    // first update at 300 sees everything collected so far
    assert_eq!(warm.learner().rounds[0].len(), 300);
    assert_eq!(warm.progress().updates, 3);

    let trigger = UpdateTrigger::new(UpdateMode::TimeSteps, 100).with_do_updates(false);
    let mut idle = trainer(ScriptedSource::new(100, 0), trigger, TrainerConfig::new());
    idle.run(&StopCondition::timesteps(500)).unwrap();
    assert_eq!(idle.progress().updates, 0);
    assert_eq!(idle.memory().size(), 500);
}

#[test]
fn test_episode_mode_trigger() {
    let mut trainer = trainer(
        ScriptedSource::new(10, 1),
        UpdateTrigger::new(UpdateMode::Episodes, 3),
        TrainerConfig::new(),
    );

    let stats = trainer.run(&StopCondition::default().with_max_episodes(7)).unwrap();

    assert_eq!(stats.episodes_executed, 7);
    assert_eq!(stats.updates, 2);
    assert_eq!(stats.mean_episode_reward, Some(10.0));
    assert_eq!(trainer.learner().rounds[0].len(), 30);
}

// ============================================================================
// Parameter Publishing
// ============================================================================

#[test]
fn test_parameters_published_after_updates() {
    let mut trainer = trainer(
        ScriptedSource::new(50, 0),
        UpdateTrigger::new(UpdateMode::TimeSteps, 100),
        TrainerConfig::new(),
    );

    trainer.run(&StopCondition::default().with_max_updates(2)).unwrap();

    assert_eq!(trainer.source().published, vec![0, 1, 2]);
    assert_eq!(trainer.progress().timesteps, 200);
}

// ============================================================================
// Stopping
// ============================================================================

#[test]
fn test_stop_flag_halts_run() {
    let mut trainer = trainer(
        ScriptedSource::new(10, 0),
        UpdateTrigger::new(UpdateMode::TimeSteps, 10),
        TrainerConfig::new(),
    );
    trainer.stop_handle().store(true, Ordering::Relaxed);

    let stats = trainer.run(&StopCondition::timesteps(1000)).unwrap();

    assert_eq!(stats.timesteps_executed, 0);
    assert!(trainer.source().published.is_empty());
}

#[test]
fn test_workloads_are_relative() {
    let mut trainer = trainer(
        ScriptedSource::new(100, 0),
        UpdateTrigger::new(UpdateMode::TimeSteps, 100),
        TrainerConfig::new(),
    );

    let first = trainer
        .execute_workload(&Workload::timesteps(300).with_report_interval(100, 0.0))
        .unwrap();
    let second = trainer.execute_workload(&Workload::timesteps(300)).unwrap();

    assert_eq!(first.timesteps_executed, 300);
    assert_eq!(second.timesteps_executed, 300);
    assert_eq!(second.updates, 3);
    assert_eq!(trainer.progress().timesteps, 600);
}

#[test]
fn test_learner_failure_propagates() {
    let failing = RecordingLearner {
        fail: true,
        ..Default::default()
    };
    let mut trainer = Trainer::new(
        TrainerConfig::new(),
        failing,
        ScriptedSource::new(100, 0),
        RingBuffer::new(1000, SamplingMode::WithoutReplacement).unwrap(),
        UpdateTrigger::new(UpdateMode::TimeSteps, 100),
        AdvantageEstimator::default(),
    );

    let err = trainer.run(&StopCondition::timesteps(1000)).unwrap_err();
    assert!(matches!(err, TrainerError::Update(UpdateError::Recorder(_))));
    assert_eq!(trainer.progress().updates, 0);
}

// ============================================================================
// Shared Memory
// ============================================================================

#[test]
fn test_shared_memory_accepts_outside_rounds() {
    let memory = SharedMemory::new(RingBuffer::new(10_000, SamplingMode::WithoutReplacement).unwrap());
    let handle = memory.clone();
    let mut trainer = Trainer::new(
        TrainerConfig::new()
            .with_batch_size(1000)
            .with_drain_after_update(false),
        RecordingLearner::default(),
        ScriptedSource::new(100, 0),
        memory,
        UpdateTrigger::new(UpdateMode::TimeSteps, 200),
        AdvantageEstimator::default(),
    );

    let outside: Vec<Transition> = (1000..1050)
        .map(|step| Transition {
            observation: vec![0.0],
            action: Action::Discrete(0),
            reward: 0.0,
            terminal: false,
            log_prob_old: -0.69,
            value_old: 0.0,
            env_id: 1,
            episode_id: 0,
            step,
            policy_version: 0,
            bootstrap_value: None,
        })
        .collect();
    handle.append_round(outside);

    let stats = trainer.run(&StopCondition::timesteps(200)).unwrap();

    // outside experience does not count toward the trigger
    assert_eq!(stats.timesteps_executed, 200);
    assert_eq!(stats.updates, 1);
    let expected: Vec<u64> = (1000..1050).chain(0..200).collect();
    assert_eq!(trainer.learner().rounds[0], expected);
    assert_eq!(handle.size(), 250);
}

// ============================================================================
// End To End
// ============================================================================

/// One-step episodes; action 1 pays 1, action 0 pays nothing.
struct Bandit;

impl Environment for Bandit {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        Ok(Observation::vector(vec![1.0, 0.0]))
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError> {
        let reward = match action {
            Action::Discrete(1) => 1.0,
            Action::Discrete(_) => 0.0,
            Action::Continuous(_) => return Err(EnvError::InvalidAction("expected discrete".into())),
        };
        Ok(StepOutcome::new(Observation::vector(vec![1.0, 0.0]), reward, true))
    }
}

#[test]
fn test_local_training_publishes_to_sampler() {
    type Inner = NdArray<f32>;
    type B = Autodiff<Inner>;
    let device = Default::default();

    let config = PpoConfig::new().with_num_iterations(2).with_sample_size(8).with_seed(Some(3));
    let policy_optimizer = config.policy_optimizer.adam::<B, TinyPolicy<B>>();
    let value_optimizer = config.value_optimizer.adam::<B, TinyValue<B>>();
    let engine = PpoUpdateEngine::new(
        config,
        TinyPolicy::<B>::new(2, 2, &device),
        TinyValue::<B>::new(2, &device),
        policy_optimizer,
        value_optimizer,
        device,
    );

    let acting: NetworkPolicy<Inner, TinyPolicy<Inner>, TinyValue<Inner>> = NetworkPolicy::new(
        TinyPolicy::new(2, 2, &Default::default()),
        TinyValue::new(2, &Default::default()),
        2,
        Default::default(),
        Some(0),
    );
    let env_factory: EnvFactory = Arc::new(|_| Ok(Box::new(Bandit) as Box<dyn Environment>));
    let collector = RolloutCollector::new(
        0,
        0,
        WorkerConfig::new().with_num_worker_environments(4),
        &env_factory,
        &[],
        Box::new(acting),
    )
    .unwrap();

    let memory = RingBuffer::new(64, SamplingMode::WithoutReplacement).unwrap();
    let mut trainer = Trainer::new(
        TrainerConfig::new().with_batch_size(32),
        engine,
        LocalSampler::new(collector, 16),
        memory,
        UpdateTrigger::new(UpdateMode::TimeSteps, 32),
        AdvantageEstimator::new(0.99, 0.95, true),
    );

    let stats = trainer.run(&StopCondition::timesteps(64)).unwrap();

    assert_eq!(stats.timesteps_executed, 64);
    assert_eq!(stats.episodes_executed, 64);
    assert_eq!(stats.updates, 2);
    assert_eq!(trainer.learner().version(), 2);
    assert_eq!(trainer.source().collector().policy_version(), 2);
    let worker = &trainer.worker_stats()[0];
    assert_eq!(worker.steps, 64);
    assert_eq!(worker.episodes, 64);

    trainer.shutdown();
    trainer.shutdown();
}

/// Picks arm 1 and remembers the last loaded version.
#[derive(Default)]
struct ArmOnePolicy {
    version: u64,
}

impl ActingPolicy for ArmOnePolicy {
    fn act(&mut self, observations: &[&[f32]]) -> Result<Vec<PolicyStep>, PolicyError> {
        Ok(observations
            .iter()
            .map(|_| PolicyStep {
                action: Action::Discrete(1),
                log_prob: 0.0,
                value: 0.0,
            })
            .collect())
    }

    fn values(&mut self, observations: &[&[f32]]) -> Result<Vec<f32>, PolicyError> {
        Ok(vec![0.0; observations.len()])
    }

    fn load_parameters(&mut self, parameters: &PolicyParameters) -> Result<(), PolicyError> {
        self.version = parameters.version;
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[test]
fn test_distributed_round_reaches_buffer_size() {
    let env_factory: EnvFactory = Arc::new(|_| Ok(Box::new(Bandit) as Box<dyn Environment>));
    let policy_factory: PolicyFactory =
        Arc::new(|_, _| Ok(Box::new(ArmOnePolicy::default()) as Box<dyn ActingPolicy>));
    // 2 workers x 3 samples = 6 per collector round
    let config = CollectorConfig::new()
        .with_num_sample_workers(2)
        .with_num_worker_samples(3)
        .with_worker(WorkerConfig::new());
    let collector = SampleCollector::new(config, env_factory, policy_factory, Vec::new()).unwrap();
    let sampler = DistributedSampler::new(collector, 10);

    let memory = RingBuffer::with_seed(1000, SamplingMode::WithoutReplacement, 0).unwrap();
    let mut trainer = Trainer::new(
        TrainerConfig::new().with_batch_size(1000),
        RecordingLearner::default(),
        sampler,
        memory,
        UpdateTrigger::new(UpdateMode::TimeSteps, 12),
        AdvantageEstimator::default(),
    );

    let first = trainer.step().unwrap();
    assert_eq!(first.steps, 12);
    assert_eq!(first.episodes, 12);
    assert!(first.update.is_some());
    assert_eq!(trainer.source().collector().round(), 2);

    let second = trainer.step().unwrap();
    assert_eq!(second.steps, 12);
    assert_eq!(trainer.progress().timesteps, 24);
    assert_eq!(trainer.progress().updates, 2);

    let rounds = &trainer.learner().rounds;
    assert_eq!(rounds.len(), 2);
    assert!(rounds.iter().all(|r| r.len() == 12));

    let stats = trainer.worker_stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|w| w.steps == 12 && w.rounds == 4));
    // the second trainer round was collected with the first update's parameters
    assert!(stats.iter().all(|w| w.policy_version == 1));

    trainer.shutdown();
}
