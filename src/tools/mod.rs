use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use image::{GenericImageView, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::matcher::feature_store;
use crate::models::{DescriptorMatrix, FeatureSet, KeyPoint, ProbabilityMap, Template};
use crate::pipeline::InMemoryTemplateSource;
use crate::utils::homography::Homography;

fn max_dim_from_env() -> Option<u32> {
    match env::var("LABEL_SCAN_MAX_DIM") {
        Ok(value) => match value.trim().parse::<u32>() {
            Ok(0) => None,
            Ok(v) => Some(v),
            Err(_) => None,
        },
        Err(_) => None,
    }
}

/// Load an image as RGB, downscaled to `LABEL_SCAN_MAX_DIM` when set.
pub fn load_rgb<P: AsRef<Path>>(path: P) -> Result<RgbImage, ScanError> {
    let img = image::open(path)?;
    let rgb = match max_dim_from_env() {
        Some(max_dim) if img.dimensions().0.max(img.dimensions().1) > max_dim => img
            .resize(max_dim, max_dim, image::imageops::FilterType::Triangle)
            .to_rgb8(),
        _ => img.to_rgb8(),
    };
    Ok(rgb)
}

/// Load a saved probability map (8-bit grayscale, 255 = 1.0).
pub fn load_probability_map<P: AsRef<Path>>(path: P) -> Result<ProbabilityMap, ScanError> {
    let gray = image::open(path)?.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(ScanError::invalid_input("probability map image is empty"));
    }
    Ok(ProbabilityMap::from_gray_image(&gray))
}

#[derive(Debug, Deserialize)]
struct Manifest {
    templates: Vec<Template>,
}

/// Load a JSON template manifest and the feature blobs it references.
///
/// Feature paths are resolved relative to the manifest. Templates without a feature
/// path are skipped; unreadable blobs are errors.
pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<InMemoryTemplateSource, ScanError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        ScanError::config(format!("failed to read manifest {}: {e}", path.display()))
    })?;
    let manifest: Manifest = serde_json::from_str(&contents).map_err(|e| {
        ScanError::config(format!("failed to parse manifest {}: {e}", path.display()))
    })?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut source = InMemoryTemplateSource::new();
    for template in manifest.templates {
        let Some(rel) = template.feature_path.clone() else {
            warn!(template = template.id, "manifest entry has no feature path");
            continue;
        };
        let blob: PathBuf = base.join(rel);
        let features = feature_store::load(&blob)?;
        debug!(template = template.id, features = features.len(), "template loaded");
        source.insert(template, features);
    }
    Ok(source)
}

/// Probability map with a filled axis-aligned rectangle.
pub fn synthetic_label_map(
    width: usize,
    height: usize,
    rect: (usize, usize, usize, usize),
    foreground: f32,
    background: f32,
) -> ProbabilityMap {
    let (x0, y0, x1, y1) = rect;
    let mut map = ProbabilityMap::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let inside = (x0..x1).contains(&x) && (y0..y1).contains(&y);
            map.set(x, y, if inside { foreground } else { background });
        }
    }
    map
}

/// Random 32-byte binary features spread over `width x height`.
pub fn synthetic_features(seed: u64, count: usize, width: f32, height: f32) -> FeatureSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let keypoints = (0..count)
        .map(|_| KeyPoint::at(rng.gen_range(0.0..width), rng.gen_range(0.0..height)))
        .collect();
    let data = (0..count * 32).map(|_| rng.gen_range(0..=255u8)).collect();
    FeatureSet {
        keypoints,
        descriptors: DescriptorMatrix::Binary {
            rows: count,
            cols: 32,
            data,
        },
        extraction_time_ms: 0.0,
    }
}

/// Same descriptors with keypoints moved through `transform`.
pub fn warp_features(features: &FeatureSet, transform: &Homography) -> FeatureSet {
    FeatureSet {
        keypoints: features
            .keypoints
            .iter()
            .map(|k| {
                let p = transform.transform(&k.point());
                KeyPoint { x: p.x, y: p.y, ..*k }
            })
            .collect(),
        descriptors: features.descriptors.clone(),
        extraction_time_ms: features.extraction_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TemplateSource;

    #[test]
    fn test_synthetic_map() {
        let map = synthetic_label_map(20, 10, (5, 2, 15, 8), 0.9, 0.1);
        assert_eq!(map.get(0, 0), 0.1);
        assert_eq!(map.get(5, 2), 0.9);
        assert_eq!(map.get(15, 8), 0.1);
    }

    #[test]
    fn test_manifest_loads_features() {
        let dir = env::temp_dir().join(format!("label_scan_manifest_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        feature_store::save(&synthetic_features(1, 8, 100.0, 50.0), &dir.join("t1.lsfs")).unwrap();
        fs::write(
            dir.join("manifest.json"),
            r#"{"templates": [
                {"id": 1, "name": "one", "reference_width": 100, "reference_height": 50,
                 "feature_path": "t1.lsfs"},
                {"id": 2, "name": "no features", "reference_width": 100, "reference_height": 50}
            ]}"#,
        )
        .unwrap();

        let source = load_manifest(dir.join("manifest.json")).unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(source.features(1).unwrap().unwrap().len(), 8);
        let _ = fs::remove_dir_all(&dir);
    }
}
