//! Mutex-guarded memory for collecting while an update runs.

use super::{ExperienceMemory, MemoryError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Experience memory shared between a collection thread and the learner.
///
/// Each phase transition takes the lock once: a collection round appends
/// all of its items under one lock, and the update phase takes its batch
/// under one lock, so a reader never observes half of a round.
pub struct SharedMemory<M: ExperienceMemory> {
    inner: Arc<Mutex<M>>,
}

impl<M: ExperienceMemory> Clone for SharedMemory<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ExperienceMemory> SharedMemory<M> {
    /// Wrap a memory.
    pub fn new(memory: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(memory)),
        }
    }

    /// Append a whole collection round.
    pub fn append_round(&self, items: Vec<M::Item>) {
        self.inner.lock().push_batch(items);
    }

    /// Take the newest `batch_size` items; drain everything afterwards when
    /// `on_policy` is set.
    pub fn take_batch(&self, batch_size: usize, on_policy: bool) -> Vec<M::Item> {
        let mut memory = self.inner.lock();
        let batch = memory.latest(batch_size);
        if on_policy {
            memory.clear();
        }
        batch
    }

    /// Sample under the lock.
    pub fn sample(&self, k: usize) -> Result<Vec<M::Item>, MemoryError> {
        self.inner.lock().sample(k)
    }

    /// Current number of items.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<M: ExperienceMemory> ExperienceMemory for SharedMemory<M> {
    type Item = M::Item;

    fn push(&mut self, item: Self::Item) {
        self.inner.lock().push(item);
    }

    fn push_batch(&mut self, items: Vec<Self::Item>) {
        self.append_round(items);
    }

    fn size(&self) -> usize {
        self.inner.lock().size()
    }

    fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    fn drain(&mut self) -> Vec<Self::Item> {
        self.inner.lock().drain()
    }

    fn latest(&self, k: usize) -> Vec<Self::Item> {
        self.inner.lock().latest(k)
    }

    fn sample(&mut self, k: usize) -> Result<Vec<Self::Item>, MemoryError> {
        self.inner.lock().sample(k)
    }

    fn clear(&mut self) {
        self.inner.lock().clear();
    }
}
