//! Update scheduling.

use serde::{Deserialize, Serialize};

/// What the update interval counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Agent steps since the last update
    #[default]
    TimeSteps,
    /// Completed episodes since the last update
    Episodes,
}

impl UpdateMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "time_steps" => Some(UpdateMode::TimeSteps),
            "episodes" => Some(UpdateMode::Episodes),
            _ => None,
        }
    }
}

/// Decides when the trainer runs an update round.
///
/// Fires iff `do_updates && total_steps >= steps_before_update &&
/// counter >= update_interval`. The counter keeps accumulating during the
/// warm-up, so the first update may come right when the warm-up ends.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTrigger {
    mode: UpdateMode,
    update_interval: usize,
    steps_before_update: usize,
    do_updates: bool,
    counter: usize,
    total_steps: usize,
}

impl UpdateTrigger {
    pub fn new(mode: UpdateMode, update_interval: usize) -> Self {
        Self {
            mode,
            update_interval,
            steps_before_update: 0,
            do_updates: true,
            counter: 0,
            total_steps: 0,
        }
    }

    pub fn with_steps_before_update(mut self, steps: usize) -> Self {
        self.steps_before_update = steps;
        self
    }

    pub fn with_do_updates(mut self, do_updates: bool) -> Self {
        self.do_updates = do_updates;
        self
    }

    /// Account for a collection round.
    pub fn observe(&mut self, steps: usize, episodes: usize) {
        self.total_steps = self.total_steps.saturating_add(steps);
        let increment = match self.mode {
            UpdateMode::TimeSteps => steps,
            UpdateMode::Episodes => episodes,
        };
        self.counter = self.counter.saturating_add(increment);
    }

    pub fn should_update(&self) -> bool {
        self.do_updates && self.total_steps >= self.steps_before_update && self.counter >= self.update_interval
    }

    /// Called after every successful update.
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Steps at which the trigger fires when fed one step at a time.
    fn firing_steps(mut trigger: UpdateTrigger, steps: usize) -> Vec<usize> {
        let mut fired = Vec::new();
        for step in 1..=steps {
            trigger.observe(1, 0);
            if trigger.should_update() {
                fired.push(step);
                trigger.reset();
            }
        }
        fired
    }

    #[test]
    fn test_fires_every_interval() {
        let trigger = UpdateTrigger::new(UpdateMode::TimeSteps, 200);
        assert_eq!(firing_steps(trigger, 700), vec![200, 400, 600]);
    }

    #[test]
    fn test_never_fires_without_updates() {
        let trigger = UpdateTrigger::new(UpdateMode::TimeSteps, 200).with_do_updates(false);
        assert!(firing_steps(trigger, 1000).is_empty());
    }

    #[test]
    fn test_warm_up_delays_first_update() {
        let trigger = UpdateTrigger::new(UpdateMode::TimeSteps, 200).with_steps_before_update(500);
        assert_eq!(firing_steps(trigger, 1000), vec![500, 700, 900]);
    }

    #[test]
    fn test_episode_mode_counts_episodes() {
        let mut trigger = UpdateTrigger::new(UpdateMode::Episodes, 3);

        trigger.observe(100, 2);
        assert!(!trigger.should_update());
        trigger.observe(100, 1);
        assert!(trigger.should_update());
        assert_eq!(trigger.total_steps(), 200);

        trigger.reset();
        assert_eq!(trigger.counter(), 0);
        assert!(!trigger.should_update());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(UpdateMode::parse("time_steps"), Some(UpdateMode::TimeSteps));
        assert_eq!(UpdateMode::parse("episodes"), Some(UpdateMode::Episodes));
        assert_eq!(UpdateMode::parse("steps"), None);
    }
}
