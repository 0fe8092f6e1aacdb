//! Experience memory.
//!
//! Memory is written by the trainer after each collection round and read
//! (or drained) by the update phase. The phases never overlap in the
//! synchronous trainer, so `RingBuffer` takes `&mut self`; `SharedMemory`
//! adds a single mutex for setups that collect while updating. It is itself
//! an `ExperienceMemory`, so a `Trainer` can own one handle while other
//! threads keep clones.

pub mod ring_buffer;
pub mod shared;

pub use ring_buffer::{RingBuffer, SamplingMode};
pub use shared::SharedMemory;

use thiserror::Error;

/// Errors raised by experience memories.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory capacity must be positive, got {0}")]
    Capacity(usize),
    #[error("cannot sample {requested} items without replacement from {available}")]
    InsufficientItems { requested: usize, available: usize },
}

/// Interface shared by experience memories.
pub trait ExperienceMemory: Send {
    /// The type of stored experience.
    type Item: Clone + Send;

    /// Store one item, evicting the oldest if full.
    fn push(&mut self, item: Self::Item);

    /// Store items in order.
    fn push_batch(&mut self, items: Vec<Self::Item>) {
        for item in items {
            self.push(item);
        }
    }

    /// Number of stored items.
    fn size(&self) -> usize;

    /// Check if the memory holds nothing.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Maximum number of items.
    fn capacity(&self) -> usize;

    /// Fill level in `[0, 1]`.
    fn utilization(&self) -> f32 {
        self.size() as f32 / self.capacity() as f32
    }

    /// Remove and return every item, oldest first.
    fn drain(&mut self) -> Vec<Self::Item>;

    /// The newest `k` items (all if fewer), oldest first, left in place.
    fn latest(&self, k: usize) -> Vec<Self::Item>;

    /// Draw `k` items according to the configured sampling mode.
    fn sample(&mut self, k: usize) -> Result<Vec<Self::Item>, MemoryError>;

    /// Remove everything.
    fn clear(&mut self);
}
