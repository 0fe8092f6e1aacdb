//! Frame stacking.

use super::{Observation, PreprocessError, Transform};
use std::collections::VecDeque;

/// Stack the last `length` observations, oldest first, along a new leading
/// axis. After a reset the first observation fills every slot.
#[derive(Debug, Clone)]
pub struct Sequence {
    length: usize,
    frames: VecDeque<Observation>,
}

impl Sequence {
    pub fn new(length: usize) -> Result<Self, PreprocessError> {
        if length == 0 {
            return Err(PreprocessError::InvalidStage {
                stage: "sequence",
                reason: "length must be at least 1".into(),
            });
        }
        Ok(Self {
            length,
            frames: VecDeque::with_capacity(length),
        })
    }
}

impl Transform for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn transform(&mut self, observation: Observation) -> Result<Observation, PreprocessError> {
        if let Some(last) = self.frames.back() {
            if last.shape != observation.shape {
                return Err(PreprocessError::Shape {
                    stage: self.name(),
                    shape: observation.shape,
                });
            }
        }

        if self.frames.is_empty() {
            for _ in 1..self.length {
                self.frames.push_back(observation.clone());
            }
        } else if self.frames.len() == self.length {
            self.frames.pop_front();
        }
        let mut shape = Vec::with_capacity(observation.rank() + 1);
        shape.push(self.length);
        shape.extend_from_slice(&observation.shape);
        self.frames.push_back(observation);

        let data = self.frames.iter().flat_map(|f| f.data.iter().copied()).collect();
        Ok(Observation { data, shape })
    }

    fn reset(&mut self) {
        self.frames.clear();
    }
}
