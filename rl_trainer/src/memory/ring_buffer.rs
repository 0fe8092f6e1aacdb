//! Fixed-capacity ring buffer with FIFO eviction.

use super::{ExperienceMemory, MemoryError};

/// How `sample` draws items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMode {
    /// Indices are drawn independently; `k` may exceed the stored count.
    WithReplacement,
    /// Indices are distinct; `k` must not exceed the stored count.
    #[default]
    WithoutReplacement,
}

/// Ring of transitions (or any other item) that overwrites the oldest entry
/// once full.
///
/// Storage grows up to `capacity` and then wraps: `index` is the slot the
/// next push writes to, which is also the oldest item when full.
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    index: usize,
    sampling: SamplingMode,
    rng: fastrand::Rng,
}

impl<T: Clone + Send> RingBuffer<T> {
    /// Create an empty ring. Fails if `capacity` is zero.
    pub fn new(capacity: usize, sampling: SamplingMode) -> Result<Self, MemoryError> {
        Self::with_rng(capacity, sampling, fastrand::Rng::new())
    }

    /// Create an empty ring whose sampling is seeded.
    pub fn with_seed(capacity: usize, sampling: SamplingMode, seed: u64) -> Result<Self, MemoryError> {
        Self::with_rng(capacity, sampling, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(capacity: usize, sampling: SamplingMode, rng: fastrand::Rng) -> Result<Self, MemoryError> {
        if capacity == 0 {
            return Err(MemoryError::Capacity(capacity));
        }
        Ok(Self {
            items: Vec::with_capacity(capacity.min(1 << 20)),
            capacity,
            index: 0,
            sampling,
            rng,
        })
    }

    /// Slot the next push writes to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the ring has reached capacity.
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Physical position of the `i`-th oldest item.
    fn physical(&self, i: usize) -> usize {
        if self.is_full() {
            (self.index + i) % self.capacity
        } else {
            i
        }
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.items.len()).map(move |i| &self.items[self.physical(i)])
    }
}

impl<T: Clone + Send> ExperienceMemory for RingBuffer<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.index] = item;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn drain(&mut self) -> Vec<T> {
        if self.is_full() {
            self.items.rotate_left(self.index);
        }
        self.index = 0;
        std::mem::take(&mut self.items)
    }

    fn latest(&self, k: usize) -> Vec<T> {
        let n = self.items.len();
        let start = n.saturating_sub(k);
        (start..n).map(|i| self.items[self.physical(i)].clone()).collect()
    }

    fn sample(&mut self, k: usize) -> Result<Vec<T>, MemoryError> {
        let n = self.items.len();
        if n == 0 || k == 0 {
            return Ok(Vec::new());
        }
        match self.sampling {
            SamplingMode::WithReplacement => {
                Ok((0..k).map(|_| self.items[self.rng.usize(..n)].clone()).collect())
            }
            SamplingMode::WithoutReplacement => {
                if k > n {
                    return Err(MemoryError::InsufficientItems { requested: k, available: n });
                }
                // Partial Fisher-Yates over the index space.
                let mut indices: Vec<usize> = (0..n).collect();
                for i in 0..k {
                    let j = self.rng.usize(i..n);
                    indices.swap(i, j);
                }
                Ok(indices[..k].iter().map(|&i| self.items[i].clone()).collect())
            }
        }
    }

    fn clear(&mut self) {
        self.items.clear();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn filled(capacity: usize, n: usize) -> RingBuffer<usize> {
        let mut ring = RingBuffer::with_seed(capacity, SamplingMode::WithoutReplacement, 7).unwrap();
        for i in 0..n {
            ring.push(i);
        }
        ring
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RingBuffer::<u8>::new(0, SamplingMode::WithReplacement).err();
        assert_eq!(err, Some(MemoryError::Capacity(0)));
    }

    #[test]
    fn test_insert_past_capacity_wraps_index() {
        let ring = filled(10, 11);
        assert_eq!(ring.size(), 10);
        assert_eq!(ring.index(), 1);
        assert!(ring.is_full());
    }

    #[test]
    fn test_eviction_keeps_last_capacity_in_order() {
        let ring = filled(5, 8);
        let kept: Vec<usize> = ring.iter().copied().collect();
        assert_eq!(kept, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_drain_returns_oldest_first_and_empties() {
        let mut ring = filled(4, 6);
        assert_eq!(ring.drain(), vec![2, 3, 4, 5]);
        assert!(ring.is_empty());
        assert_eq!(ring.index(), 0);

        ring.push(9);
        assert_eq!(ring.drain(), vec![9]);
    }

    #[test]
    fn test_latest() {
        let ring = filled(4, 6);
        assert_eq!(ring.latest(2), vec![4, 5]);
        assert_eq!(ring.latest(10), vec![2, 3, 4, 5]);
        assert!(ring.latest(0).is_empty());
        assert_eq!(ring.size(), 4);
    }

    #[test]
    fn test_sample_without_replacement_is_distinct() {
        let mut ring = filled(20, 20);
        let drawn = ring.sample(20).unwrap();
        let unique: HashSet<usize> = drawn.iter().copied().collect();
        assert_eq!(unique.len(), 20);

        assert_eq!(
            ring.sample(21).err(),
            Some(MemoryError::InsufficientItems { requested: 21, available: 20 })
        );
    }

    #[test]
    fn test_sample_with_replacement_may_exceed_size() {
        let mut ring = RingBuffer::with_seed(3, SamplingMode::WithReplacement, 1).unwrap();
        ring.push_batch(vec![1, 2, 3]);
        let drawn = ring.sample(50).unwrap();
        assert_eq!(drawn.len(), 50);
        assert!(drawn.iter().all(|v| (1..=3).contains(v)));
    }

    #[test]
    fn test_sample_from_empty_is_noop() {
        let mut ring = RingBuffer::<u8>::new(3, SamplingMode::WithoutReplacement).unwrap();
        assert!(ring.sample(5).unwrap().is_empty());
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let mut a = filled(50, 50);
        let mut b = filled(50, 50);
        assert_eq!(a.sample(10).unwrap(), b.sample(10).unwrap());
    }

    proptest! {
        #[test]
        fn prop_overflow_keeps_last_capacity(capacity in 1usize..64, extra in 1usize..64) {
            let ring = filled(capacity, capacity + extra);
            let kept: Vec<usize> = ring.iter().copied().collect();
            let expected: Vec<usize> = (extra..capacity + extra).collect();
            prop_assert_eq!(ring.size(), capacity);
            prop_assert_eq!(kept, expected);
        }
    }
}
