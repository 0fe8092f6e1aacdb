//! Rollout collection for one worker.
//!
//! A [`RolloutCollector`] owns a worker's environments, their preprocessing
//! pipelines and an [`ActingPolicy`]. Each call to
//! [`collect`](RolloutCollector::collect) runs the environments forward and
//! returns one [`TransitionBatch`].
//!
//! # Stepping
//!
//! With `num_background_envs == 0` all environments step inline, one batched
//! inference call per sweep. Otherwise every environment steps on its own
//! thread and inference runs on at most `num_worker_environments` ready
//! environments at a time while the rest keep stepping.
//!
//! # Segment boundaries
//!
//! Environments persist across rounds. In step mode a round stops after
//! exactly `n` transitions, so each environment's last transition in the
//! batch is marked with `bootstrap_value = V(s_next)` unless it is terminal.
//! In episode mode unfinished episodes are held back and only whole episodes
//! are emitted.

use super::config::WorkerConfig;
use super::env_runner::{EnvEvent, EnvPool, RepeatedStep};
use crate::algorithms::network::{ActingPolicy, PolicyError, PolicyParameters};
use crate::core::transition::{Action, Transition, TransitionBatch};
use crate::environment::{EnvError, EnvFactory, Environment};
use crate::preprocessing::{Pipeline, PreprocessError, PreprocessingStageSpec};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while collecting a rollout.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("environment {env_id}: {source}")]
    Environment { env_id: u64, source: EnvError },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("policy returned {actual} results for {expected} observations")]
    PolicyOutput { expected: usize, actual: usize },
    #[error("environment runner for slot {0} is gone")]
    RunnerDisconnected(usize),
    #[error("failed to spawn environment runner: {0}")]
    Spawn(String),
}

struct PendingStep {
    features: Vec<f32>,
    action: Action,
    log_prob: f32,
    value: f32,
    policy_version: u64,
}

enum SlotState {
    NeedsReset,
    Resetting,
    Ready(Vec<f32>),
    Stepping(PendingStep),
}

impl SlotState {
    fn in_flight(&self) -> bool {
        matches!(self, SlotState::Resetting | SlotState::Stepping(_))
    }
}

/// Per-environment bookkeeping.
struct EnvSlot {
    env_id: u64,
    pipeline: Pipeline,
    state: SlotState,
    episode_id: u64,
    /// Next per-environment step index; never reset
    next_step: u64,
    episode_steps: usize,
    episode_return: f32,
    /// Episode-mode holdback
    unfinished: Vec<Transition>,
}

/// Collects transitions from a worker's environments.
pub struct RolloutCollector {
    worker_id: usize,
    config: WorkerConfig,
    policy: Box<dyn ActingPolicy>,
    pool: EnvPool,
    slots: Vec<EnvSlot>,
}

impl RolloutCollector {
    /// Build the worker's environments. Environment `slot` gets global index
    /// `worker_id * total_envs + slot` and `env_id = (generation << 32) | index`.
    pub fn new(
        worker_id: usize,
        generation: u32,
        config: WorkerConfig,
        env_factory: &EnvFactory,
        preprocessing: &[PreprocessingStageSpec],
        policy: Box<dyn ActingPolicy>,
    ) -> Result<Self, RolloutError> {
        let total = config.total_envs().max(1);
        let mut envs: Vec<Box<dyn Environment>> = Vec::with_capacity(total);
        let mut slots = Vec::with_capacity(total);
        for slot in 0..total {
            let index = worker_id * total + slot;
            let env_id = ((generation as u64) << 32) | index as u64;
            envs.push(
                env_factory(index).map_err(|source| RolloutError::Environment { env_id, source })?,
            );
            slots.push(EnvSlot {
                env_id,
                pipeline: Pipeline::from_specs(preprocessing)?,
                state: SlotState::NeedsReset,
                episode_id: 0,
                next_step: 0,
                episode_steps: 0,
                episode_return: 0.0,
                unfinished: Vec::new(),
            });
        }

        let repeat = config.repeat_actions.max(1);
        let pool = if config.is_threaded() {
            EnvPool::threaded(worker_id, envs, repeat).map_err(|e| RolloutError::Spawn(e.to_string()))?
        } else {
            EnvPool::inline(envs, repeat)
        };

        log::debug!(
            "Worker {}: {} environments ({}), repeat_actions={}",
            worker_id,
            pool.len(),
            if config.is_threaded() { "threaded" } else { "inline" },
            repeat
        );

        Ok(Self {
            worker_id,
            config,
            policy,
            pool,
            slots,
        })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn num_envs(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn policy_version(&self) -> u64 {
        self.policy.version()
    }

    pub fn load_parameters(&mut self, parameters: &PolicyParameters) -> Result<(), PolicyError> {
        self.policy.load_parameters(parameters)
    }

    /// Run the environments until `n` transitions are available.
    ///
    /// Step mode returns exactly `n`; episode mode returns at least `n`,
    /// all from finished episodes.
    pub fn collect(&mut self, n: usize) -> Result<TransitionBatch, RolloutError> {
        let mut out = TransitionBatch::default();
        if n == 0 {
            return Ok(out);
        }

        for slot in 0..self.slots.len() {
            if matches!(self.slots[slot].state, SlotState::NeedsReset) {
                self.request_reset(slot)?;
            }
        }

        loop {
            while let Some((slot, event)) = self.pool.try_next() {
                self.absorb(slot, event, &mut out)?;
            }

            let satisfied = out.len() >= n;
            let in_flight = self.slots.iter().filter(|s| s.state.in_flight()).count();
            if satisfied && in_flight == 0 {
                break;
            }

            if !satisfied && self.dispatch(n, &out)? > 0 {
                continue;
            }

            if self.slots.iter().all(|s| !s.state.in_flight()) {
                // Nothing outstanding and nothing dispatchable.
                break;
            }
            match self.pool.next() {
                Some((slot, event)) => self.absorb(slot, event, &mut out)?,
                None => return Err(RolloutError::RunnerDisconnected(self.first_in_flight())),
            }
        }

        if !self.config.sample_episodes {
            self.bootstrap_round_end(&mut out)?;
        }

        log::trace!(
            "Worker {}: collected {} transitions, {} episodes",
            self.worker_id,
            out.len(),
            out.episodes_completed
        );
        Ok(out)
    }

    fn first_in_flight(&self) -> usize {
        self.slots.iter().position(|s| s.state.in_flight()).unwrap_or(0)
    }

    fn request_reset(&mut self, slot: usize) -> Result<(), RolloutError> {
        self.slots[slot].state = SlotState::Resetting;
        if self.pool.request_reset(slot) {
            Ok(())
        } else {
            Err(RolloutError::RunnerDisconnected(slot))
        }
    }

    /// Reset finished environments and act on ready ones. Returns the
    /// number of requests issued.
    fn dispatch(&mut self, n: usize, out: &TransitionBatch) -> Result<usize, RolloutError> {
        let mut issued = 0;
        for slot in 0..self.slots.len() {
            if matches!(self.slots[slot].state, SlotState::NeedsReset) {
                self.request_reset(slot)?;
                issued += 1;
            }
        }

        let stepping = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Stepping(_)))
            .count();
        let budget = if self.config.sample_episodes {
            usize::MAX
        } else {
            n.saturating_sub(out.len() + stepping)
        };
        let limit = if self.config.is_threaded() {
            self.config.num_worker_environments.max(1)
        } else {
            self.slots.len()
        };

        let ready: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, SlotState::Ready(_)))
            .map(|(i, _)| i)
            .take(limit.min(budget))
            .collect();
        if ready.is_empty() {
            return Ok(issued);
        }

        let steps = {
            let views: Vec<&[f32]> = ready
                .iter()
                .filter_map(|&i| match &self.slots[i].state {
                    SlotState::Ready(features) => Some(features.as_slice()),
                    _ => None,
                })
                .collect();
            self.policy.act(&views)?
        };
        if steps.len() != ready.len() {
            return Err(RolloutError::PolicyOutput {
                expected: ready.len(),
                actual: steps.len(),
            });
        }

        let policy_version = self.policy.version();
        for (slot, step) in ready.into_iter().zip(steps) {
            let features = match std::mem::replace(&mut self.slots[slot].state, SlotState::NeedsReset) {
                SlotState::Ready(features) => features,
                _ => continue,
            };
            self.slots[slot].state = SlotState::Stepping(PendingStep {
                features,
                action: step.action.clone(),
                log_prob: step.log_prob,
                value: step.value,
                policy_version,
            });
            if !self.pool.request_step(slot, step.action) {
                return Err(RolloutError::RunnerDisconnected(slot));
            }
            issued += 1;
        }
        Ok(issued)
    }

    fn absorb(&mut self, slot: usize, event: EnvEvent, out: &mut TransitionBatch) -> Result<(), RolloutError> {
        let env_id = self.slots[slot].env_id;
        match event {
            EnvEvent::Reset(result) => {
                let observation = result.map_err(|source| RolloutError::Environment { env_id, source })?;
                let s = &mut self.slots[slot];
                s.pipeline.reset();
                let features = s.pipeline.process(observation)?.data;
                s.state = SlotState::Ready(features);
                s.episode_steps = 0;
                s.episode_return = 0.0;
                Ok(())
            }
            EnvEvent::Stepped(result) => {
                let step = result.map_err(|source| RolloutError::Environment { env_id, source })?;
                self.record_step(slot, step, out)
            }
        }
    }

    fn record_step(&mut self, slot: usize, step: RepeatedStep, out: &mut TransitionBatch) -> Result<(), RolloutError> {
        let pending = match std::mem::replace(&mut self.slots[slot].state, SlotState::NeedsReset) {
            SlotState::Stepping(pending) => pending,
            other => {
                // Spurious event; keep the slot as it was.
                self.slots[slot].state = other;
                log::warn!("Worker {}: unexpected step result for slot {}", self.worker_id, slot);
                return Ok(());
            }
        };

        out.env_frames += step.frames;
        let RepeatedStep { outcome, .. } = step;
        let next_features = self.slots[slot].pipeline.process(outcome.observation)?.data;

        let max_steps = self.config.max_timesteps_per_episode;
        let s = &mut self.slots[slot];
        s.episode_steps += 1;
        s.episode_return += outcome.reward;
        let terminal = outcome.terminal;
        let truncated = !terminal && (outcome.truncated || (max_steps > 0 && s.episode_steps >= max_steps));

        let bootstrap_value = if truncated {
            let values = self.policy.values(&[next_features.as_slice()])?;
            Some(values.first().copied().ok_or(RolloutError::PolicyOutput {
                expected: 1,
                actual: 0,
            })?)
        } else {
            None
        };

        let s = &mut self.slots[slot];
        let transition = Transition {
            observation: pending.features,
            action: pending.action,
            reward: outcome.reward,
            terminal,
            log_prob_old: pending.log_prob,
            value_old: pending.value,
            env_id: s.env_id,
            episode_id: s.episode_id,
            step: s.next_step,
            policy_version: pending.policy_version,
            bootstrap_value,
        };
        s.next_step += 1;

        if self.config.sample_episodes {
            s.unfinished.push(transition);
        } else {
            out.transitions.push(transition);
        }

        if terminal || truncated {
            out.episodes_completed += 1;
            out.episode_returns.push(s.episode_return);
            if self.config.sample_episodes {
                out.transitions.append(&mut s.unfinished);
            }
            s.episode_id += 1;
            s.state = SlotState::NeedsReset;
        } else {
            s.state = SlotState::Ready(next_features);
        }
        Ok(())
    }

    /// Mark each environment's last non-terminal transition of the round
    /// with `V(s_next)`.
    fn bootstrap_round_end(&mut self, out: &mut TransitionBatch) -> Result<(), RolloutError> {
        let mut last_by_env: HashMap<u64, usize> = HashMap::new();
        for (i, t) in out.transitions.iter().enumerate() {
            last_by_env.insert(t.env_id, i);
        }

        let mut targets: Vec<(usize, usize)> = Vec::new();
        for (slot, s) in self.slots.iter().enumerate() {
            let Some(&i) = last_by_env.get(&s.env_id) else {
                continue;
            };
            let t = &out.transitions[i];
            if t.terminal || t.bootstrap_value.is_some() {
                continue;
            }
            if matches!(s.state, SlotState::Ready(_)) {
                targets.push((slot, i));
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let values = {
            let views: Vec<&[f32]> = targets
                .iter()
                .filter_map(|&(slot, _)| match &self.slots[slot].state {
                    SlotState::Ready(features) => Some(features.as_slice()),
                    _ => None,
                })
                .collect();
            self.policy.values(&views)?
        };
        if values.len() != targets.len() {
            return Err(RolloutError::PolicyOutput {
                expected: targets.len(),
                actual: values.len(),
            });
        }
        for ((_, i), value) in targets.into_iter().zip(values) {
            out.transitions[i].bootstrap_value = Some(value);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RolloutCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutCollector")
            .field("worker_id", &self.worker_id)
            .field("num_envs", &self.slots.len())
            .field("config", &self.config)
            .finish()
    }
}
