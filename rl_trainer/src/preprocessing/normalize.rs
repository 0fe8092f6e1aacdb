//! Min-max normalization.

use super::{Observation, PreprocessError, Transform};

/// Rescale each observation to `[0, 1]` using its own minimum and maximum.
///
/// A constant observation maps to zeros.
#[derive(Debug, Clone, Default)]
pub struct Normalize;

impl Normalize {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn transform(&mut self, mut observation: Observation) -> Result<Observation, PreprocessError> {
        if observation.is_empty() {
            return Ok(observation);
        }
        let (min, max) = observation
            .data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;

        if range > 0.0 && range.is_finite() {
            for v in &mut observation.data {
                *v = (*v - min) / range;
            }
        } else {
            observation.data.iter_mut().for_each(|v| *v = 0.0);
        }
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_range() {
        let obs = Observation::vector(vec![2.0, 4.0, 6.0]);
        let out = Normalize::new().transform(obs).unwrap();
        assert_eq!(out.data, vec![0.0, 0.5, 1.0]);
        assert_eq!(out.shape, vec![3]);
    }

    #[test]
    fn test_normalize_constant_is_zero() {
        let out = Normalize::new()
            .transform(Observation::vector(vec![7.0; 4]))
            .unwrap();
        assert_eq!(out.data, vec![0.0; 4]);
    }
}
