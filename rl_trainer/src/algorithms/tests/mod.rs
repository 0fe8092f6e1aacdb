//! Tests for the algorithms module.
//!
//! - `support`: tiny policy/value networks shared by the tests
//! - `gae_tests`: Generalized Advantage Estimation
//! - `engine_tests`: PPO update rounds on an autodiff backend

pub mod support;
