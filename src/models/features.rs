use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Detected local feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Column
    pub x: f32,
    /// Row
    pub y: f32,
    /// Diameter of the meaningful neighbourhood
    pub size: f32,
    /// Orientation in degrees, -1 if not applicable
    pub angle: f32,
    /// Detector response strength
    pub response: f32,
    /// Pyramid octave
    pub octave: i32,
    /// Object class, -1 if unused
    pub class_id: i32,
}

impl KeyPoint {
    /// Keypoint at a position with neutral attributes
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 31.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }

    /// Position as a point
    pub fn point(&self) -> super::Point {
        super::Point::new(self.x, self.y)
    }
}

/// Element type of a descriptor matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Packed binary descriptors compared by Hamming distance
    Binary,
    /// Float descriptors compared by Euclidean distance
    Float,
}

/// Row-major N×D descriptor matrix
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorMatrix {
    /// `cols` bytes per row
    Binary {
        /// Number of descriptors
        rows: usize,
        /// Bytes per descriptor
        cols: usize,
        /// Row-major storage
        data: Vec<u8>,
    },
    /// `cols` floats per row
    Float {
        /// Number of descriptors
        rows: usize,
        /// Floats per descriptor
        cols: usize,
        /// Row-major storage
        data: Vec<f32>,
    },
}

impl DescriptorMatrix {
    /// Binary matrix, checking the buffer length
    pub fn binary(rows: usize, cols: usize, data: Vec<u8>) -> Result<Self, ScanError> {
        if data.len() != rows * cols {
            return Err(ScanError::invalid_input(format!(
                "binary descriptors: {} bytes for {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self::Binary { rows, cols, data })
    }

    /// Float matrix, checking the buffer length
    pub fn float(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, ScanError> {
        if data.len() != rows * cols {
            return Err(ScanError::invalid_input(format!(
                "float descriptors: {} values for {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self::Float { rows, cols, data })
    }

    /// Empty binary matrix
    pub fn empty() -> Self {
        Self::Binary {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    /// Number of descriptors
    pub fn rows(&self) -> usize {
        match self {
            Self::Binary { rows, .. } | Self::Float { rows, .. } => *rows,
        }
    }

    /// Descriptor length in elements
    pub fn cols(&self) -> usize {
        match self {
            Self::Binary { cols, .. } | Self::Float { cols, .. } => *cols,
        }
    }

    /// Element type
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Binary { .. } => DescriptorKind::Binary,
            Self::Float { .. } => DescriptorKind::Float,
        }
    }

    /// True when there are no descriptors
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// True when the two matrices can be compared row-by-row
    pub fn is_compatible(&self, other: &DescriptorMatrix) -> bool {
        self.kind() == other.kind() && self.cols() == other.cols()
    }

    /// Approximate heap usage in bytes
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Binary { data, .. } => data.len(),
            Self::Float { data, .. } => data.len() * std::mem::size_of::<f32>(),
        }
    }

    /// True when the buffer holds exactly `rows * cols` elements
    pub fn is_consistent(&self) -> bool {
        match self {
            Self::Binary { rows, cols, data } => Some(data.len()) == rows.checked_mul(*cols),
            Self::Float { rows, cols, data } => Some(data.len()) == rows.checked_mul(*cols),
        }
    }

    /// Distance between row `i` of `self` and row `j` of `other`.
    ///
    /// Hamming for binary, L2 for float. Returns `None` for incompatible matrices or
    /// rows outside the buffers.
    pub fn distance(&self, i: usize, other: &DescriptorMatrix, j: usize) -> Option<f32> {
        match (self, other) {
            (
                Self::Binary { rows, cols, data },
                Self::Binary {
                    rows: rows_b,
                    cols: cols_b,
                    data: data_b,
                },
            ) if cols == cols_b && i < *rows && j < *rows_b => Some(hamming(
                data.get(i * cols..(i + 1) * cols)?,
                data_b.get(j * cols..(j + 1) * cols)?,
            ) as f32),
            (
                Self::Float { rows, cols, data },
                Self::Float {
                    rows: rows_b,
                    cols: cols_b,
                    data: data_b,
                },
            ) if cols == cols_b && i < *rows && j < *rows_b => Some(l2(
                data.get(i * cols..(i + 1) * cols)?,
                data_b.get(j * cols..(j + 1) * cols)?,
            )),
            _ => None,
        }
    }
}

/// Hamming distance between two byte strings of equal length
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Euclidean distance
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Keypoints plus their descriptors, as produced by a feature extractor.
///
/// Owned by whoever extracted it. Call [`FeatureSet::release`] (or drop it) once matching
/// is done; the descriptor buffer is the dominant memory cost of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// One per descriptor row
    pub keypoints: Vec<KeyPoint>,
    /// N×D descriptors
    pub descriptors: DescriptorMatrix,
    /// Wall time spent extracting
    pub extraction_time_ms: f64,
}

impl FeatureSet {
    /// Build a feature set, checking that keypoints and descriptor rows line up
    pub fn new(
        keypoints: Vec<KeyPoint>,
        descriptors: DescriptorMatrix,
        extraction_time_ms: f64,
    ) -> Result<Self, ScanError> {
        if keypoints.len() != descriptors.rows() {
            return Err(ScanError::invalid_input(format!(
                "{} keypoints but {} descriptor rows",
                keypoints.len(),
                descriptors.rows()
            )));
        }
        Ok(Self {
            keypoints,
            descriptors,
            extraction_time_ms,
        })
    }

    /// Feature set with no features
    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: DescriptorMatrix::empty(),
            extraction_time_ms: 0.0,
        }
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// True when keypoints line up with descriptor rows and the buffer matches its shape
    pub fn is_consistent(&self) -> bool {
        self.keypoints.len() == self.descriptors.rows() && self.descriptors.is_consistent()
    }

    /// True when nothing was extracted
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty() || self.descriptors.is_empty()
    }

    /// Free the buffers now
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_and_l2() {
        assert_eq!(hamming(&[0b1111_0000, 0xFF], &[0b0000_0000, 0xFF]), 4);
        assert!((l2(&[0.0, 3.0], &[4.0, 0.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_requires_compatible_matrices() {
        let a = DescriptorMatrix::binary(2, 2, vec![0, 0, 255, 255]).unwrap();
        let b = DescriptorMatrix::binary(1, 2, vec![255, 0]).unwrap();
        assert_eq!(a.distance(0, &b, 0), Some(8.0));
        assert_eq!(a.distance(1, &b, 0), Some(8.0));
        assert_eq!(a.distance(2, &b, 0), None);

        let f = DescriptorMatrix::float(1, 2, vec![0.0, 0.0]).unwrap();
        assert!(!a.is_compatible(&f));
        assert_eq!(a.distance(0, &f, 0), None);
    }

    #[test]
    fn test_feature_set_shape_check() {
        let d = DescriptorMatrix::binary(2, 1, vec![1, 2]).unwrap();
        assert!(FeatureSet::new(vec![KeyPoint::at(0.0, 0.0)], d.clone(), 0.0).is_err());
        let fs = FeatureSet::new(
            vec![KeyPoint::at(0.0, 0.0), KeyPoint::at(1.0, 1.0)],
            d,
            1.5,
        )
        .unwrap();
        assert_eq!(fs.len(), 2);
        assert!(!fs.is_empty());
        assert!(FeatureSet::empty().is_empty());
    }

    #[test]
    fn test_inconsistent_buffers() {
        let bad = DescriptorMatrix::Binary {
            rows: 20,
            cols: 32,
            data: vec![0; 10],
        };
        assert!(!bad.is_consistent());
        let good = DescriptorMatrix::binary(1, 32, vec![0; 32]).unwrap();
        assert!(good.is_consistent());
        assert_eq!(bad.distance(5, &good, 0), None);

        let fs = FeatureSet {
            keypoints: vec![KeyPoint::at(0.0, 0.0); 3],
            descriptors: good,
            extraction_time_ms: 0.0,
        };
        assert!(!fs.is_consistent());
    }
}
