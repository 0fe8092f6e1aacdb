//! Core data types shared by workers, memory and the learner.

pub mod compression;
pub mod transition;

pub use compression::{CompressedStates, CompressionError, StatePayload};
pub use transition::{Action, Transition, TransitionBatch};
