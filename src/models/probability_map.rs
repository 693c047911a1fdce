use image::{GrayImage, Luma};

use crate::error::ScanError;

/// Dense grid of per-pixel document probabilities in `[0, 1]`
///
/// Produced by a segmentation model at its fixed output resolution and
/// consumed read-only by the quad detector.
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ProbabilityMap {
    /// Create a zero-filled map
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Wrap row-major model output. Non-finite values become 0 and the rest
    /// are clamped into `[0, 1]`.
    pub fn from_vec(width: usize, height: usize, mut data: Vec<f32>) -> Result<Self, ScanError> {
        if width == 0 || height == 0 {
            return Err(ScanError::invalid_input("probability map has zero size"));
        }
        if data.len() != width * height {
            return Err(ScanError::invalid_input(format!(
                "probability map expects {} cells, got {}",
                width * height,
                data.len()
            )));
        }
        for v in &mut data {
            *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a map from an 8-bit mask image (255 = probability 1.0)
    pub fn from_gray_image(image: &GrayImage) -> Self {
        let data = image.pixels().map(|p| p[0] as f32 / 255.0).collect();
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data,
        }
    }

    /// Get map width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Get map height
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of cells
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True for a zero-sized map
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Probability at (x, y); 0 outside the map
    pub fn get(&self, x: usize, y: usize) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[y * self.width + x]
    }

    /// Set probability at (x, y); out-of-range writes are ignored
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        self.data[y * self.width + x] = value.clamp(0.0, 1.0);
    }

    /// Raw row-major values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mean of all cells strictly above `threshold`, or 0 when none are
    pub fn mean_above(&self, threshold: f32) -> f32 {
        let (sum, count) = self
            .data
            .iter()
            .filter(|&&v| v > threshold)
            .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }

    /// Quantize to an 8-bit image for the morphology/contour stages
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let v = self.data[y as usize * self.width + x as usize];
            Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }
}
