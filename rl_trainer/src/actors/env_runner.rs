//! Environment stepping, inline or on dedicated threads.
//!
//! [`EnvPool`] hides whether environments step on the collector's own thread
//! or on one [`EnvRunner`] thread each. Either way the collector issues
//! requests and consumes [`EnvEvent`]s; inline requests complete
//! immediately and queue their event.

use crate::core::transition::Action;
use crate::environment::{EnvError, Environment, StepOutcome};
use crate::preprocessing::Observation;
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

/// Outcome of one agent step, possibly spanning several env frames.
#[derive(Debug, Clone)]
pub(crate) struct RepeatedStep {
    /// Last frame's observation and flags; reward is summed over frames
    pub outcome: StepOutcome,
    pub frames: usize,
}

pub(crate) enum EnvEvent {
    Reset(Result<Observation, EnvError>),
    Stepped(Result<RepeatedStep, EnvError>),
}

enum EnvCommand {
    Reset,
    Step(Action),
    Stop,
}

/// Apply `action` up to `repeat` times, summing rewards and stopping at the
/// first terminal or truncated frame.
pub(crate) fn step_repeated(
    env: &mut dyn Environment,
    action: &Action,
    repeat: usize,
) -> Result<RepeatedStep, EnvError> {
    let mut outcome = env.step(action)?;
    let mut frames = 1;
    while frames < repeat.max(1) && !outcome.done() {
        let next = env.step(action)?;
        frames += 1;
        outcome = StepOutcome {
            reward: outcome.reward + next.reward,
            ..next
        };
    }
    Ok(RepeatedStep { outcome, frames })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn reset_guarded(env: &mut dyn Environment) -> Result<Observation, EnvError> {
    panic::catch_unwind(AssertUnwindSafe(|| env.reset()))
        .unwrap_or_else(|p| Err(EnvError::Reset(format!("panicked: {}", panic_message(p)))))
}

fn step_guarded(env: &mut dyn Environment, action: &Action, repeat: usize) -> Result<RepeatedStep, EnvError> {
    panic::catch_unwind(AssertUnwindSafe(|| step_repeated(env, action, repeat)))
        .unwrap_or_else(|p| Err(EnvError::Step(format!("panicked: {}", panic_message(p)))))
}

/// One environment stepping on its own thread.
pub(crate) struct EnvRunner {
    cmd_tx: Sender<EnvCommand>,
    thread: Option<JoinHandle<()>>,
}

impl EnvRunner {
    fn spawn(
        name: String,
        slot: usize,
        mut env: Box<dyn Environment>,
        repeat: usize,
        events: Sender<(usize, EnvEvent)>,
    ) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<EnvCommand>();
        let thread = std::thread::Builder::new().name(name).spawn(move || {
            while let Ok(cmd) = cmd_rx.recv() {
                let event = match cmd {
                    EnvCommand::Reset => EnvEvent::Reset(reset_guarded(env.as_mut())),
                    EnvCommand::Step(action) => {
                        EnvEvent::Stepped(step_guarded(env.as_mut(), &action, repeat))
                    }
                    EnvCommand::Stop => break,
                };
                if events.send((slot, event)).is_err() {
                    break;
                }
            }
        })?;
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }
}

impl Drop for EnvRunner {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(EnvCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Environments of one worker.
pub(crate) enum EnvPool {
    Inline {
        envs: Vec<Box<dyn Environment>>,
        repeat: usize,
        queue: VecDeque<(usize, EnvEvent)>,
    },
    Threaded {
        runners: Vec<EnvRunner>,
        events: Receiver<(usize, EnvEvent)>,
    },
}

impl EnvPool {
    pub fn inline(envs: Vec<Box<dyn Environment>>, repeat: usize) -> Self {
        EnvPool::Inline {
            envs,
            repeat,
            queue: VecDeque::new(),
        }
    }

    /// Move every environment onto its own thread, named
    /// `Env-Runner-{worker_id}-{slot}`.
    pub fn threaded(
        worker_id: usize,
        envs: Vec<Box<dyn Environment>>,
        repeat: usize,
    ) -> std::io::Result<Self> {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut runners = Vec::with_capacity(envs.len());
        for (slot, env) in envs.into_iter().enumerate() {
            runners.push(EnvRunner::spawn(
                format!("Env-Runner-{}-{}", worker_id, slot),
                slot,
                env,
                repeat,
                events_tx.clone(),
            )?);
        }
        Ok(EnvPool::Threaded { runners, events })
    }

    pub fn len(&self) -> usize {
        match self {
            EnvPool::Inline { envs, .. } => envs.len(),
            EnvPool::Threaded { runners, .. } => runners.len(),
        }
    }

    pub fn request_reset(&mut self, slot: usize) -> bool {
        match self {
            EnvPool::Inline { envs, queue, .. } => {
                let result = reset_guarded(envs[slot].as_mut());
                queue.push_back((slot, EnvEvent::Reset(result)));
                true
            }
            EnvPool::Threaded { runners, .. } => runners[slot].cmd_tx.send(EnvCommand::Reset).is_ok(),
        }
    }

    pub fn request_step(&mut self, slot: usize, action: Action) -> bool {
        match self {
            EnvPool::Inline {
                envs,
                repeat,
                queue,
            } => {
                let result = step_guarded(envs[slot].as_mut(), &action, *repeat);
                queue.push_back((slot, EnvEvent::Stepped(result)));
                true
            }
            EnvPool::Threaded { runners, .. } => {
                runners[slot].cmd_tx.send(EnvCommand::Step(action)).is_ok()
            }
        }
    }

    /// Next completed request, if one is available now.
    pub fn try_next(&mut self) -> Option<(usize, EnvEvent)> {
        match self {
            EnvPool::Inline { queue, .. } => queue.pop_front(),
            EnvPool::Threaded { events, .. } => events.try_recv().ok(),
        }
    }

    /// Block until a request completes. `None` if no request can complete.
    pub fn next(&mut self) -> Option<(usize, EnvEvent)> {
        match self {
            EnvPool::Inline { queue, .. } => queue.pop_front(),
            EnvPool::Threaded { events, .. } => events.recv().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reward 1 per frame, terminal after `length` frames.
    struct Frames {
        t: usize,
        length: usize,
    }

    impl Environment for Frames {
        fn reset(&mut self) -> Result<Observation, EnvError> {
            self.t = 0;
            Ok(Observation::vector(vec![0.0]))
        }

        fn step(&mut self, _action: &Action) -> Result<StepOutcome, EnvError> {
            self.t += 1;
            Ok(StepOutcome::new(
                Observation::vector(vec![self.t as f32]),
                1.0,
                self.t >= self.length,
            ))
        }
    }

    struct Panics;

    impl Environment for Panics {
        fn reset(&mut self) -> Result<Observation, EnvError> {
            panic!("boom")
        }

        fn step(&mut self, _action: &Action) -> Result<StepOutcome, EnvError> {
            Err(EnvError::Step("unused".into()))
        }
    }

    #[test]
    fn test_repeat_sums_rewards() {
        let mut env = Frames { t: 0, length: 10 };
        let step = step_repeated(&mut env, &Action::Discrete(0), 4).unwrap();
        assert_eq!(step.frames, 4);
        assert_eq!(step.outcome.reward, 4.0);
        assert_eq!(step.outcome.observation.data, vec![4.0]);
    }

    #[test]
    fn test_repeat_stops_at_terminal() {
        let mut env = Frames { t: 0, length: 3 };
        let step = step_repeated(&mut env, &Action::Discrete(0), 5).unwrap();
        assert_eq!(step.frames, 3);
        assert_eq!(step.outcome.reward, 3.0);
        assert!(step.outcome.terminal);
    }

    #[test]
    fn test_threaded_pool_round_trip() {
        let envs: Vec<Box<dyn Environment>> = (0..3)
            .map(|_| Box::new(Frames { t: 0, length: 5 }) as Box<dyn Environment>)
            .collect();
        let mut pool = EnvPool::threaded(0, envs, 1).unwrap();
        assert_eq!(pool.len(), 3);

        for slot in 0..3 {
            assert!(pool.request_reset(slot));
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (slot, event) = pool.next().unwrap();
            assert!(matches!(event, EnvEvent::Reset(Ok(_))));
            seen.push(slot);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);

        assert!(pool.request_step(1, Action::Discrete(0)));
        let (slot, event) = pool.next().unwrap();
        assert_eq!(slot, 1);
        match event {
            EnvEvent::Stepped(Ok(step)) => assert_eq!(step.outcome.reward, 1.0),
            _ => panic!("expected a step"),
        }
    }

    #[test]
    fn test_panicking_env_becomes_error() {
        let mut pool = EnvPool::inline(vec![Box::new(Panics)], 1);
        pool.request_reset(0);
        let (_, event) = pool.try_next().unwrap();
        match event {
            EnvEvent::Reset(Err(EnvError::Reset(msg))) => assert!(msg.contains("boom")),
            _ => panic!("expected a reset error"),
        }
    }
}
