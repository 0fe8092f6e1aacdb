//! Classic cart-pole balancing task.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rl_trainer::environment::{EnvError, Environment, StepOutcome};
use rl_trainer::{Action, Observation};

const GRAVITY: f32 = 9.8;
const CART_MASS: f32 = 1.0;
const POLE_MASS: f32 = 0.1;
const POLE_HALF_LENGTH: f32 = 0.5;
const FORCE: f32 = 10.0;
const TAU: f32 = 0.02;
const THETA_LIMIT: f32 = 12.0 * 2.0 * std::f32::consts::PI / 360.0;
const X_LIMIT: f32 = 2.4;

pub struct CartPole {
    state: [f32; 4],
    rng: StdRng,
}

impl CartPole {
    pub const OBS_SIZE: usize = 4;
    pub const N_ACTIONS: usize = 2;

    pub fn new(seed: u64) -> Self {
        Self {
            state: [0.0; 4],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn observation(&self) -> Observation {
        Observation::vector(self.state.to_vec())
    }
}

impl Environment for CartPole {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        for value in self.state.iter_mut() {
            *value = self.rng.gen_range(-0.05..0.05);
        }
        Ok(self.observation())
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError> {
        let force = match action {
            Action::Discrete(0) => -FORCE,
            Action::Discrete(1) => FORCE,
            other => return Err(EnvError::InvalidAction(format!("{:?}", other))),
        };

        let [x, x_dot, theta, theta_dot] = self.state;
        let total_mass = CART_MASS + POLE_MASS;
        let pole_moment = POLE_MASS * POLE_HALF_LENGTH;
        let (sin, cos) = theta.sin_cos();

        let temp = (force + pole_moment * theta_dot * theta_dot * sin) / total_mass;
        let theta_acc = (GRAVITY * sin - cos * temp)
            / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos * cos / total_mass));
        let x_acc = temp - pole_moment * theta_acc * cos / total_mass;

        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];

        let terminal = self.state[0].abs() > X_LIMIT || self.state[2].abs() > THETA_LIMIT;
        Ok(StepOutcome::new(self.observation(), 1.0, terminal))
    }
}
