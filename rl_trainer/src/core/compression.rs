//! Lossless observation compression for worker → collector transport.
//!
//! Each observation is XOR-ed word by word against the previous observation
//! of the same environment (consecutive frames are usually similar), then
//! runs of zero words are collapsed:
//!
//! ```text
//! 0x00 <varint n>      n zero words
//! 0x01 <u32 le>        one literal word
//! ```
//!
//! Decoding reverses both steps and restores the exact `f32` bit patterns,
//! including NaN payloads and signed zeros.

use crate::core::transition::TransitionBatch;
use std::collections::HashMap;
use thiserror::Error;

const TAG_ZERO_RUN: u8 = 0x00;
const TAG_LITERAL: u8 = 0x01;

/// Errors from decoding a compressed payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompressionError {
    #[error("compressed payload truncated at byte {0}")]
    Truncated(usize),
    #[error("unknown token tag {tag:#04x} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("zero run overflows observation {index} ({expected} words)")]
    RunOverflow { index: usize, expected: usize },
    #[error("observation count mismatch: {observations} observations, {keys} keys")]
    CountMismatch { observations: usize, keys: usize },
}

/// A batch of observations in compressed form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedStates {
    /// Word count of each observation
    lengths: Vec<u32>,
    /// Delta reference key of each observation (usually the env id)
    keys: Vec<u64>,
    /// Token stream
    payload: Vec<u8>,
}

impl CompressedStates {
    /// Compress `states`, delta-coding each against the previous state with
    /// the same key and length.
    pub fn compress(states: &[&[f32]], keys: &[u64]) -> Result<Self, CompressionError> {
        if states.len() != keys.len() {
            return Err(CompressionError::CountMismatch {
                observations: states.len(),
                keys: keys.len(),
            });
        }

        let mut payload = Vec::new();
        let mut previous: HashMap<u64, &[f32]> = HashMap::new();

        for (&state, &key) in states.iter().zip(keys) {
            let reference = previous.get(&key).copied().filter(|r| r.len() == state.len());
            let mut zeros = 0usize;
            for (i, value) in state.iter().enumerate() {
                let base = reference.map_or(0, |r| r[i].to_bits());
                let word = value.to_bits() ^ base;
                if word == 0 {
                    zeros += 1;
                    continue;
                }
                flush_zeros(&mut payload, &mut zeros);
                payload.push(TAG_LITERAL);
                payload.extend_from_slice(&word.to_le_bytes());
            }
            flush_zeros(&mut payload, &mut zeros);
            previous.insert(key, state);
        }

        Ok(Self {
            lengths: states.iter().map(|s| s.len() as u32).collect(),
            keys: keys.to_vec(),
            payload,
        })
    }

    /// Restore the original observations bit for bit.
    pub fn decompress(&self) -> Result<Vec<Vec<f32>>, CompressionError> {
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(self.lengths.len());
        let mut previous: HashMap<u64, usize> = HashMap::new();
        let mut pos = 0usize;

        for (index, (&len, &key)) in self.lengths.iter().zip(&self.keys).enumerate() {
            let len = len as usize;
            let mut words: Vec<u32> = Vec::with_capacity(len);
            while words.len() < len {
                let tag = *self.payload.get(pos).ok_or(CompressionError::Truncated(pos))?;
                pos += 1;
                match tag {
                    TAG_ZERO_RUN => {
                        let run = read_varint(&self.payload, &mut pos)?;
                        if words.len() + run > len {
                            return Err(CompressionError::RunOverflow { index, expected: len });
                        }
                        words.resize(words.len() + run, 0);
                    }
                    TAG_LITERAL => {
                        let bytes = self
                            .payload
                            .get(pos..pos + 4)
                            .ok_or(CompressionError::Truncated(pos))?;
                        words.push(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
                        pos += 4;
                    }
                    other => return Err(CompressionError::UnknownTag { tag: other, offset: pos - 1 }),
                }
            }

            let reference = previous
                .get(&key)
                .map(|&i| &out[i])
                .filter(|r| r.len() == len);
            let state: Vec<f32> = words
                .iter()
                .enumerate()
                .map(|(i, &w)| f32::from_bits(w ^ reference.map_or(0, |r| r[i].to_bits())))
                .collect();
            previous.insert(key, out.len());
            out.push(state);
        }

        Ok(out)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Size of the encoded token stream in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.payload.len()
    }
}

fn flush_zeros(payload: &mut Vec<u8>, zeros: &mut usize) {
    if *zeros == 0 {
        return;
    }
    payload.push(TAG_ZERO_RUN);
    let mut n = *zeros;
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            payload.push(byte);
            break;
        }
        payload.push(byte | 0x80);
    }
    *zeros = 0;
}

fn read_varint(payload: &[u8], pos: &mut usize) -> Result<usize, CompressionError> {
    let mut value = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *payload.get(*pos).ok_or(CompressionError::Truncated(*pos))?;
        *pos += 1;
        value |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= usize::BITS {
            return Err(CompressionError::Truncated(*pos));
        }
    }
}

/// A round's transitions as shipped over the worker channel.
#[derive(Debug, Clone)]
pub enum StatePayload {
    /// Observations travel inline.
    Plain(TransitionBatch),
    /// Observations were stripped from `batch` and travel in `states`.
    Compressed {
        batch: TransitionBatch,
        states: CompressedStates,
    },
}

impl StatePayload {
    /// Pack a batch, compressing observations when `compress` is set.
    pub fn pack(mut batch: TransitionBatch, compress: bool) -> Result<Self, CompressionError> {
        if !compress {
            return Ok(StatePayload::Plain(batch));
        }
        let states = {
            let views: Vec<&[f32]> = batch.transitions.iter().map(|t| t.observation.as_slice()).collect();
            let keys: Vec<u64> = batch.transitions.iter().map(|t| t.env_id).collect();
            CompressedStates::compress(&views, &keys)?
        };
        for t in &mut batch.transitions {
            t.observation = Vec::new();
        }
        Ok(StatePayload::Compressed { batch, states })
    }

    /// Restore the transition batch exactly as it was packed.
    pub fn unpack(self) -> Result<TransitionBatch, CompressionError> {
        match self {
            StatePayload::Plain(batch) => Ok(batch),
            StatePayload::Compressed { mut batch, states } => {
                let observations = states.decompress()?;
                if observations.len() != batch.transitions.len() {
                    return Err(CompressionError::CountMismatch {
                        observations: observations.len(),
                        keys: batch.transitions.len(),
                    });
                }
                for (t, obs) in batch.transitions.iter_mut().zip(observations) {
                    t.observation = obs;
                }
                Ok(batch)
            }
        }
    }

    /// Number of transitions carried.
    pub fn len(&self) -> usize {
        match self {
            StatePayload::Plain(batch) | StatePayload::Compressed { batch, .. } => batch.len(),
        }
    }

    /// Check if no transitions are carried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transition::{Action, Transition};
    use proptest::prelude::*;

    fn bits(states: &[Vec<f32>]) -> Vec<Vec<u32>> {
        states.iter().map(|s| s.iter().map(|v| v.to_bits()).collect()).collect()
    }

    #[test]
    fn test_repeated_frames_compress_well() {
        let frame: Vec<f32> = (0..256).map(|i| (i % 7) as f32 * 0.25).collect();
        let states = vec![frame.clone(), frame.clone(), frame];
        let views: Vec<&[f32]> = states.iter().map(|s| s.as_slice()).collect();
        let packed = CompressedStates::compress(&views, &[3, 3, 3]).unwrap();

        // Second and third frame are a single zero run each.
        assert!(packed.payload_bytes() < 256 * 5 + 8);
        assert_eq!(packed.decompress().unwrap(), states);
    }

    #[test]
    fn test_special_values_survive() {
        let states = vec![
            vec![f32::NAN, -0.0, 0.0, f32::INFINITY, f32::NEG_INFINITY, f32::MIN_POSITIVE],
            vec![f32::from_bits(0x7fc0_1234), -0.0, 1.0, 0.0, f32::NEG_INFINITY, 0.0],
        ];
        let views: Vec<&[f32]> = states.iter().map(|s| s.as_slice()).collect();
        let packed = CompressedStates::compress(&views, &[0, 0]).unwrap();
        assert_eq!(bits(&packed.decompress().unwrap()), bits(&states));
    }

    #[test]
    fn test_mixed_lengths_and_keys() {
        let states = vec![vec![1.0, 2.0], vec![5.0; 3], vec![1.0, 2.5], vec![]];
        let views: Vec<&[f32]> = states.iter().map(|s| s.as_slice()).collect();
        let packed = CompressedStates::compress(&views, &[0, 0, 0, 1]).unwrap();
        assert_eq!(packed.len(), 4);
        assert_eq!(packed.decompress().unwrap(), states);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let states = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let views: Vec<&[f32]> = states.iter().map(|s| s.as_slice()).collect();
        let mut packed = CompressedStates::compress(&views, &[0]).unwrap();
        packed.payload.truncate(3);
        assert!(matches!(packed.decompress(), Err(CompressionError::Truncated(_))));

        packed.payload = vec![0x07];
        assert!(matches!(
            packed.decompress(),
            Err(CompressionError::UnknownTag { tag: 0x07, offset: 0 })
        ));
    }

    #[test]
    fn test_key_count_mismatch() {
        let s = [1.0f32];
        assert!(matches!(
            CompressedStates::compress(&[&s[..]], &[]),
            Err(CompressionError::CountMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_unpack_restores_batch() {
        let transitions: Vec<Transition> = (0..6)
            .map(|i| Transition {
                observation: vec![i as f32, 0.5, -1.0],
                action: Action::Discrete(i as u32 % 2),
                reward: 1.0,
                terminal: i == 5,
                log_prob_old: -0.69,
                value_old: 0.1,
                env_id: (i % 2) as u64,
                episode_id: 0,
                step: (i / 2) as u64,
                policy_version: 2,
                bootstrap_value: None,
            })
            .collect();
        let batch = TransitionBatch {
            transitions: transitions.clone(),
            episodes_completed: 1,
            episode_returns: vec![6.0],
            env_frames: 6,
        };

        let payload = StatePayload::pack(batch, true).unwrap();
        match &payload {
            StatePayload::Compressed { batch, .. } => {
                assert!(batch.transitions.iter().all(|t| t.observation.is_empty()));
            }
            StatePayload::Plain(_) => panic!("expected compressed payload"),
        }
        assert_eq!(payload.len(), 6);
        let restored = payload.unpack().unwrap();
        assert_eq!(restored.transitions, transitions);
        assert_eq!(restored.episode_returns, vec![6.0]);
    }

    proptest! {
        #[test]
        fn prop_compression_is_lossless(
            frames in prop::collection::vec(prop::collection::vec(any::<u32>(), 0..40), 0..12),
            key_mod in 1u64..4,
        ) {
            let states: Vec<Vec<f32>> = frames
                .iter()
                .map(|f| f.iter().map(|&w| f32::from_bits(w)).collect())
                .collect();
            let keys: Vec<u64> = (0..states.len() as u64).map(|i| i % key_mod).collect();
            let views: Vec<&[f32]> = states.iter().map(|s| s.as_slice()).collect();
            let packed = CompressedStates::compress(&views, &keys).unwrap();
            prop_assert_eq!(bits(&packed.decompress().unwrap()), bits(&states));
        }
    }
}
