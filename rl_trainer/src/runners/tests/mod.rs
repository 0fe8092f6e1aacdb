//! Trainer tests.

pub mod trainer_tests;
