//! Versioned binary codec for persisted feature sets.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic "LSFS" | version u32
//! rows u32 | cols u32 | type i32 (0 = u8, 5 = f32)
//! rows * cols descriptor elements, row-major
//! keypoint count u32
//! count * { x f32, y f32, size f32, angle f32, response f32, octave i32, class_id i32 }
//! extraction time f64 (ms)
//! ```

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::FeatureStoreError;
use crate::models::{DescriptorMatrix, FeatureSet, KeyPoint};

/// Leading bytes of every blob
pub const MAGIC: [u8; 4] = *b"LSFS";
/// Current format version
pub const VERSION: u32 = 1;
/// Element type code for byte descriptors
pub const TYPE_U8: i32 = 0;
/// Element type code for float descriptors
pub const TYPE_F32: i32 = 5;

const KEYPOINT_RECORD_LEN: usize = 28;

/// Serialize a feature set
pub fn encode(features: &FeatureSet) -> Vec<u8> {
    let d = &features.descriptors;
    let mut out = Vec::with_capacity(
        24 + d.byte_len() + 4 + features.keypoints.len() * KEYPOINT_RECORD_LEN + 8,
    );
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(d.rows() as u32).to_le_bytes());
    out.extend_from_slice(&(d.cols() as u32).to_le_bytes());
    match d {
        DescriptorMatrix::Binary { data, .. } => {
            out.extend_from_slice(&TYPE_U8.to_le_bytes());
            out.extend_from_slice(data);
        }
        DescriptorMatrix::Float { data, .. } => {
            out.extend_from_slice(&TYPE_F32.to_le_bytes());
            for v in data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }

    out.extend_from_slice(&(features.keypoints.len() as u32).to_le_bytes());
    for kp in &features.keypoints {
        for v in [kp.x, kp.y, kp.size, kp.angle, kp.response] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&kp.octave.to_le_bytes());
        out.extend_from_slice(&kp.class_id.to_le_bytes());
    }
    out.extend_from_slice(&features.extraction_time_ms.to_le_bytes());
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FeatureStoreError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(FeatureStoreError::Truncated {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FeatureStoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, FeatureStoreError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, FeatureStoreError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, FeatureStoreError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, FeatureStoreError> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

/// Parse a blob produced by [`encode`]
pub fn decode(bytes: &[u8]) -> Result<FeatureSet, FeatureStoreError> {
    let mut r = Reader::new(bytes);

    let magic: [u8; 4] = r.array()?;
    if magic != MAGIC {
        return Err(FeatureStoreError::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }
    let version = r.u32()?;
    if version == 0 || version > VERSION {
        return Err(FeatureStoreError::UnsupportedVersion(version));
    }

    let rows = r.u32()? as usize;
    let cols = r.u32()? as usize;
    let kind = r.i32()?;
    let elements = rows
        .checked_mul(cols)
        .ok_or_else(|| FeatureStoreError::InvalidHeader(format!("{}x{} overflows", rows, cols)))?;

    let descriptors = match kind {
        TYPE_U8 => DescriptorMatrix::Binary {
            rows,
            cols,
            data: r.take(elements)?.to_vec(),
        },
        TYPE_F32 => {
            let byte_len = elements.checked_mul(4).ok_or_else(|| {
                FeatureStoreError::InvalidHeader(format!("{}x{} overflows", rows, cols))
            })?;
            let raw = r.take(byte_len)?;
            let data = raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            DescriptorMatrix::Float { rows, cols, data }
        }
        other => {
            return Err(FeatureStoreError::InvalidHeader(format!(
                "unknown descriptor type {}",
                other
            )));
        }
    };

    let count = r.u32()? as usize;
    if count != rows {
        return Err(FeatureStoreError::InvalidHeader(format!(
            "{} keypoints for {} descriptor rows",
            count, rows
        )));
    }
    let mut keypoints = Vec::with_capacity(count.min(bytes.len() / KEYPOINT_RECORD_LEN));
    for _ in 0..count {
        keypoints.push(KeyPoint {
            x: r.f32()?,
            y: r.f32()?,
            size: r.f32()?,
            angle: r.f32()?,
            response: r.f32()?,
            octave: r.i32()?,
            class_id: r.i32()?,
        });
    }
    let extraction_time_ms = r.f64()?;

    Ok(FeatureSet {
        keypoints,
        descriptors,
        extraction_time_ms,
    })
}

/// Write a feature set to `path`
pub fn save(features: &FeatureSet, path: &Path) -> Result<(), FeatureStoreError> {
    let bytes = encode(features);
    fs::write(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "feature set saved");
    Ok(())
}

/// Read a feature set from `path`
pub fn load(path: &Path) -> Result<FeatureSet, FeatureStoreError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}
