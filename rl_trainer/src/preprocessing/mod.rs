//! Observation preprocessing.
//!
//! A [`Pipeline`] is an ordered list of [`Transform`] stages that maps a raw
//! environment observation to the feature vector the policy consumes. Stages
//! are independent siblings; each one only agrees with its neighbours on the
//! observation shape.
//!
//! Image stages expect `[height, width]` or `[height, width, channels]`
//! (channels last).
//!
//! # Usage
//!
//! ```ignore
//! let specs: Vec<PreprocessingStageSpec> = serde_json::from_str(r#"[
//!     {"type": "grayscale"},
//!     {"type": "image_resize", "width": 84, "height": 84},
//!     {"type": "sequence", "length": 4}
//! ]"#)?;
//! let mut pipeline = Pipeline::from_specs(&specs)?;
//! let features = pipeline.process(raw)?;
//! ```

mod image;
mod normalize;
mod sequence;

pub use image::{GrayScale, ImageCrop, ImageResize};
pub use normalize::Normalize;
pub use sequence::Sequence;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dense `f32` observation with its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Observation {
    /// Build an observation, checking that `shape` matches `data`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self, PreprocessError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(PreprocessError::DataLength {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// A rank-1 observation.
    pub fn vector(data: Vec<f32>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Errors raised by preprocessing stages.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("shape {shape:?} does not hold {len} values")]
    DataLength { shape: Vec<usize>, len: usize },
    #[error("{stage}: unsupported observation shape {shape:?}")]
    Shape { stage: &'static str, shape: Vec<usize> },
    #[error("{stage}: {reason}")]
    InvalidStage { stage: &'static str, reason: String },
}

/// One preprocessing stage.
pub trait Transform: Send {
    /// Short stage name for logs and errors.
    fn name(&self) -> &'static str;

    fn transform(&mut self, observation: Observation) -> Result<Observation, PreprocessError>;

    /// Forget per-episode state. Called when the environment resets.
    fn reset(&mut self) {}
}

/// Serialized description of one stage, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreprocessingStageSpec {
    ImageCrop {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        #[serde(default)]
        scope: Option<String>,
    },
    ImageResize {
        width: usize,
        height: usize,
        #[serde(default)]
        scope: Option<String>,
    },
    #[serde(alias = "gray_scale")]
    Grayscale {
        #[serde(default)]
        weights: Option<Vec<f32>>,
        #[serde(default)]
        keep_rank: bool,
        #[serde(default)]
        scope: Option<String>,
    },
    Normalize {
        #[serde(default)]
        scope: Option<String>,
    },
    Sequence {
        length: usize,
        #[serde(default)]
        scope: Option<String>,
    },
}

impl PreprocessingStageSpec {
    pub fn scope(&self) -> Option<&str> {
        match self {
            PreprocessingStageSpec::ImageCrop { scope, .. }
            | PreprocessingStageSpec::ImageResize { scope, .. }
            | PreprocessingStageSpec::Grayscale { scope, .. }
            | PreprocessingStageSpec::Normalize { scope }
            | PreprocessingStageSpec::Sequence { scope, .. } => scope.as_deref(),
        }
    }

    /// Instantiate the stage.
    pub fn build(&self) -> Result<Box<dyn Transform>, PreprocessError> {
        Ok(match self {
            PreprocessingStageSpec::ImageCrop {
                x,
                y,
                width,
                height,
                ..
            } => Box::new(ImageCrop::new(*x, *y, *width, *height)?),
            PreprocessingStageSpec::ImageResize { width, height, .. } => {
                Box::new(ImageResize::new(*width, *height)?)
            }
            PreprocessingStageSpec::Grayscale {
                weights, keep_rank, ..
            } => {
                let stage = match weights {
                    Some(w) => GrayScale::with_weights(w.clone())?,
                    None => GrayScale::new(),
                };
                Box::new(stage.with_keep_rank(*keep_rank))
            }
            PreprocessingStageSpec::Normalize { .. } => Box::new(Normalize::new()),
            PreprocessingStageSpec::Sequence { length, .. } => Box::new(Sequence::new(*length)?),
        })
    }
}

/// Ordered preprocessing stages for one environment.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    /// Pipeline that passes observations through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[PreprocessingStageSpec]) -> Result<Self, PreprocessError> {
        let stages = specs
            .iter()
            .map(PreprocessingStageSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    pub fn push(&mut self, stage: Box<dyn Transform>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order.
    pub fn process(&mut self, observation: Observation) -> Result<Observation, PreprocessError> {
        self.stages
            .iter_mut()
            .try_fold(observation, |obs, stage| stage.transform(obs))
    }

    /// Reset all stages at an episode boundary.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
