//! Image stages: crop, nearest-neighbour resize and grayscale.

use super::{Observation, PreprocessError, Transform};

/// Split an image shape into (height, width, channels).
fn image_dims(stage: &'static str, shape: &[usize]) -> Result<(usize, usize, usize), PreprocessError> {
    match *shape {
        [h, w] => Ok((h, w, 1)),
        [h, w, c] => Ok((h, w, c)),
        _ => Err(PreprocessError::Shape {
            stage,
            shape: shape.to_vec(),
        }),
    }
}

fn image_shape(h: usize, w: usize, c: usize, rank: usize) -> Vec<usize> {
    if rank == 2 {
        vec![h, w]
    } else {
        vec![h, w, c]
    }
}

/// Crop a `width`×`height` window with its top-left corner at (`x`, `y`).
#[derive(Debug, Clone)]
pub struct ImageCrop {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl ImageCrop {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Result<Self, PreprocessError> {
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidStage {
                stage: "image_crop",
                reason: "crop window must be non-empty".into(),
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }
}

impl Transform for ImageCrop {
    fn name(&self) -> &'static str {
        "image_crop"
    }

    fn transform(&mut self, observation: Observation) -> Result<Observation, PreprocessError> {
        let (h, w, c) = image_dims(self.name(), &observation.shape)?;
        if self.y + self.height > h || self.x + self.width > w {
            return Err(PreprocessError::InvalidStage {
                stage: self.name(),
                reason: format!(
                    "window {}x{} at ({}, {}) exceeds {}x{} image",
                    self.width, self.height, self.x, self.y, w, h
                ),
            });
        }

        let mut data = Vec::with_capacity(self.width * self.height * c);
        for row in self.y..self.y + self.height {
            let start = (row * w + self.x) * c;
            data.extend_from_slice(&observation.data[start..start + self.width * c]);
        }
        Ok(Observation {
            data,
            shape: image_shape(self.height, self.width, c, observation.rank()),
        })
    }
}

/// Nearest-neighbour resize to `width`×`height`.
#[derive(Debug, Clone)]
pub struct ImageResize {
    width: usize,
    height: usize,
}

impl ImageResize {
    pub fn new(width: usize, height: usize) -> Result<Self, PreprocessError> {
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidStage {
                stage: "image_resize",
                reason: "target size must be non-zero".into(),
            });
        }
        Ok(Self { width, height })
    }
}

impl Transform for ImageResize {
    fn name(&self) -> &'static str {
        "image_resize"
    }

    fn transform(&mut self, observation: Observation) -> Result<Observation, PreprocessError> {
        let (h, w, c) = image_dims(self.name(), &observation.shape)?;
        if h == 0 || w == 0 {
            return Err(PreprocessError::Shape {
                stage: self.name(),
                shape: observation.shape,
            });
        }

        let mut data = Vec::with_capacity(self.width * self.height * c);
        for row in 0..self.height {
            let src_row = row * h / self.height;
            for col in 0..self.width {
                let src_col = col * w / self.width;
                let start = (src_row * w + src_col) * c;
                data.extend_from_slice(&observation.data[start..start + c]);
            }
        }
        Ok(Observation {
            data,
            shape: image_shape(self.height, self.width, c, observation.rank()),
        })
    }
}

/// Weighted channel sum. Defaults to ITU-R 601 luma weights for RGB.
#[derive(Debug, Clone)]
pub struct GrayScale {
    weights: Vec<f32>,
    keep_rank: bool,
}

impl Default for GrayScale {
    fn default() -> Self {
        Self::new()
    }
}

impl GrayScale {
    pub fn new() -> Self {
        Self {
            weights: vec![0.299, 0.587, 0.114],
            keep_rank: false,
        }
    }

    pub fn with_weights(weights: Vec<f32>) -> Result<Self, PreprocessError> {
        if weights.is_empty() {
            return Err(PreprocessError::InvalidStage {
                stage: "grayscale",
                reason: "weights must be non-empty".into(),
            });
        }
        Ok(Self {
            weights,
            keep_rank: false,
        })
    }

    /// Keep a trailing channel axis of size 1.
    pub fn with_keep_rank(mut self, keep_rank: bool) -> Self {
        self.keep_rank = keep_rank;
        self
    }
}

impl Transform for GrayScale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn transform(&mut self, observation: Observation) -> Result<Observation, PreprocessError> {
        let (h, w, c) = match *observation.shape {
            [h, w, c] => (h, w, c),
            _ => {
                return Err(PreprocessError::Shape {
                    stage: self.name(),
                    shape: observation.shape.clone(),
                })
            }
        };
        if c != self.weights.len() {
            return Err(PreprocessError::InvalidStage {
                stage: self.name(),
                reason: format!("{} channels but {} weights", c, self.weights.len()),
            });
        }

        let data = observation
            .data
            .chunks_exact(c)
            .map(|px| px.iter().zip(&self.weights).map(|(v, k)| v * k).sum::<f32>())
            .collect();
        let shape = if self.keep_rank { vec![h, w, 1] } else { vec![h, w] };
        Ok(Observation { data, shape })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(h: usize, w: usize) -> Observation {
        Observation::new((0..h * w).map(|i| i as f32).collect(), vec![h, w]).unwrap()
    }

    #[test]
    fn test_crop_window() {
        let mut crop = ImageCrop::new(1, 1, 2, 2).unwrap();
        let out = crop.transform(gray(4, 4)).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.data, vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let mut crop = ImageCrop::new(3, 0, 2, 2).unwrap();
        assert!(crop.transform(gray(4, 4)).is_err());
    }

    #[test]
    fn test_crop_keeps_channels() {
        let obs = Observation::new((0..2 * 2 * 3).map(|i| i as f32).collect(), vec![2, 2, 3]).unwrap();
        let mut crop = ImageCrop::new(1, 0, 1, 2).unwrap();
        let out = crop.transform(obs).unwrap();
        assert_eq!(out.shape, vec![2, 1, 3]);
        assert_eq!(out.data, vec![3.0, 4.0, 5.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_resize_downsample_nearest() {
        let mut resize = ImageResize::new(2, 2).unwrap();
        let out = resize.transform(gray(4, 4)).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.data, vec![0.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn test_resize_upsample_repeats_pixels() {
        let mut resize = ImageResize::new(4, 2).unwrap();
        let out = resize.transform(gray(1, 2)).unwrap();
        assert_eq!(out.data, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_grayscale_weights() {
        let obs = Observation::new(vec![1.0, 1.0, 1.0, 0.0, 2.0, 0.0], vec![1, 2, 3]).unwrap();
        let mut stage = GrayScale::new();
        let out = stage.transform(obs.clone()).unwrap();
        assert_eq!(out.shape, vec![1, 2]);
        assert!((out.data[0] - 1.0).abs() < 1e-6);
        assert!((out.data[1] - 1.174).abs() < 1e-6);

        let out = GrayScale::new().with_keep_rank(true).transform(obs).unwrap();
        assert_eq!(out.shape, vec![1, 2, 1]);
    }

    #[test]
    fn test_grayscale_rejects_channel_mismatch() {
        let obs = Observation::new(vec![0.0; 8], vec![2, 2, 2]).unwrap();
        assert!(GrayScale::new().transform(obs).is_err());
        assert!(GrayScale::new().transform(gray(2, 2)).is_err());
    }
}
