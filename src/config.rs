//! Tunable knobs for every pipeline stage.
//!
//! Defaults carry the production constants. A JSON file can override any subset of
//! fields (`ScannerConfig::load`), and a handful of `LABEL_SCAN_*` environment variables
//! can override the knobs most often tuned in the field.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Quad detector knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Probability threshold for the primary binarization
    pub binarize_threshold: f32,
    /// Morphology kernel radius (2 gives a 5x5 disc)
    pub morphology_radius: u8,
    /// Minimum quad area as a fraction of the map
    pub min_area_fraction: f32,
    /// Gaussian sigma applied before edge detection
    pub blur_sigma: f32,
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Polygon approximation tolerance as a fraction of the contour perimeter
    pub approx_epsilon_fraction: f32,
    /// Threshold levels swept in live mode (Otsu is always added)
    pub live_levels: Vec<f32>,
    /// Number of evenly spaced levels swept in offline mode
    pub offline_level_count: usize,
    /// Lowest offline sweep level
    pub offline_level_min: f32,
    /// Highest offline sweep level
    pub offline_level_max: f32,
    /// Lower bound of a "right" angle, degrees
    pub right_angle_min: f32,
    /// Upper bound of a "right" angle, degrees
    pub right_angle_max: f32,
    /// Outward growth of the display quad
    pub display_expansion: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            binarize_threshold: 0.5,
            morphology_radius: 2,
            min_area_fraction: 0.02,
            blur_sigma: 1.0,
            canny_low: 30.0,
            canny_high: 90.0,
            approx_epsilon_fraction: 0.02,
            live_levels: vec![0.25, 0.5, 0.75],
            offline_level_count: 13,
            offline_level_min: 0.2,
            offline_level_max: 0.8,
            right_angle_min: 60.0,
            right_angle_max: 120.0,
            display_expansion: 0.03,
        }
    }
}

impl DetectorConfig {
    /// Sweep levels for offline mode, evenly spaced and inclusive
    pub fn offline_levels(&self) -> Vec<f32> {
        match self.offline_level_count {
            0 => Vec::new(),
            1 => vec![(self.offline_level_min + self.offline_level_max) * 0.5],
            n => {
                let step = (self.offline_level_max - self.offline_level_min) / (n - 1) as f32;
                (0..n)
                    .map(|i| self.offline_level_min + step * i as f32)
                    .collect()
            }
        }
    }
}

/// Plausibility limits for a projected template outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryLimits {
    /// Minimum outline area as a fraction of the frame
    pub min_area_fraction: f32,
    /// Maximum outline area as a fraction of the frame
    pub max_area_fraction: f32,
    /// Maximum relative deviation from the template's aspect ratio
    pub max_aspect_deviation: f32,
    /// Smallest interior angle, degrees
    pub min_angle: f32,
    /// Largest interior angle, degrees
    pub max_angle: f32,
    /// Longest over shortest side
    pub max_side_ratio: f32,
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.01,
            max_area_fraction: 0.95,
            max_aspect_deviation: 0.5,
            min_angle: 30.0,
            max_angle: 150.0,
            max_side_ratio: 5.0,
        }
    }
}

/// Template matcher knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Lowe ratio
    pub ratio_test: f32,
    /// Absolute distance cutoff for a good match
    pub distance_cutoff: f32,
    /// Good matches required before estimating a homography
    pub min_match_count: usize,
    /// RANSAC reprojection threshold, pixels
    pub ransac_threshold: f64,
    /// RANSAC iterations
    pub ransac_iterations: usize,
    /// RANSAC sampling seed
    pub ransac_seed: u64,
    /// Acceptance floor
    pub min_confidence: f32,
    /// Inlier ratio assumed when the frame is already rectified
    pub label_mode_inlier_ratio: f32,
    /// Outline plausibility limits (coarse mode)
    pub geometry: GeometryLimits,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ratio_test: 0.8,
            distance_cutoff: 250.0,
            min_match_count: 3,
            ransac_threshold: 7.0,
            ransac_iterations: 2000,
            ransac_seed: 0x5eed,
            min_confidence: 0.3,
            label_mode_inlier_ratio: 0.85,
            geometry: GeometryLimits::default(),
        }
    }
}

/// Region projection validity limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Width and height must exceed this
    pub min_side: f32,
    /// Width and height may not exceed this multiple of the larger frame dimension
    pub max_side_factor: f32,
    /// Longest over shortest bound side
    pub max_aspect: f32,
    /// Minimum polygon area, px²
    pub min_area: f32,
    /// Maximum polygon area as a multiple of the larger frame dimension squared
    pub max_area_factor: f32,
    /// Minimum distance between any two corners
    pub min_corner_gap: f32,
    /// Minimum signed polygon area, px²
    pub min_signed_area: f32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            min_side: 10.0,
            max_side_factor: 5.0,
            max_aspect: 50.0,
            min_area: 10.0,
            max_area_factor: 5.0,
            min_corner_gap: 2.0,
            min_signed_area: 25.0,
        }
    }
}

/// Region recognition knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Crop growth as a fraction of region size (text doubles it vertically)
    pub crop_expansion: f32,
    /// Worker cap, further limited by available parallelism
    pub max_workers: usize,
    /// Per-region wait for the barcode and OCR branches
    pub region_timeout_ms: u64,
    /// Wall-time bound for a whole batch
    pub batch_timeout_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            crop_expansion: 0.1,
            max_workers: 4,
            region_timeout_ms: 3_000,
            batch_timeout_ms: 10_000,
        }
    }
}

impl RecognitionConfig {
    /// Per-region timeout
    pub fn region_timeout(&self) -> Duration {
        Duration::from_millis(self.region_timeout_ms)
    }

    /// Whole-batch timeout
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Worker count actually used
    pub fn effective_workers(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.clamp(1, available.max(1))
    }
}

/// Live scan session knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay after a match attempt before the next may start
    pub cooldown_ms: u64,
    /// Consecutive misses before guidance should be shown
    pub miss_guidance_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 300,
            miss_guidance_threshold: 30,
        }
    }
}

/// Complete scanner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Quad detection
    pub detector: DetectorConfig,
    /// Template matching
    pub matcher: MatcherConfig,
    /// Region projection
    pub projector: ProjectorConfig,
    /// Region recognition
    pub recognition: RecognitionConfig,
    /// Live session
    pub session: SessionConfig,
}

fn parse_var<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl ScannerConfig {
    /// Load a JSON config; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ScanError::config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let config: ScannerConfig = serde_json::from_str(&contents).map_err(|e| {
            ScanError::config(format!("failed to parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LABEL_SCAN_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(&|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides(mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let d = &mut self.detector;
        d.display_expansion =
            parse_var(lookup, "LABEL_SCAN_DISPLAY_EXPANSION", d.display_expansion);

        let m = &mut self.matcher;
        m.ratio_test = parse_var(lookup, "LABEL_SCAN_RATIO_TEST", m.ratio_test);
        m.distance_cutoff = parse_var(lookup, "LABEL_SCAN_DISTANCE_CUTOFF", m.distance_cutoff);
        m.min_confidence = parse_var(lookup, "LABEL_SCAN_MIN_CONFIDENCE", m.min_confidence);
        m.ransac_threshold = parse_var(lookup, "LABEL_SCAN_RANSAC_THRESHOLD", m.ransac_threshold);
        m.ransac_seed = parse_var(lookup, "LABEL_SCAN_RANSAC_SEED", m.ransac_seed);

        let r = &mut self.recognition;
        r.max_workers = parse_var(lookup, "LABEL_SCAN_MAX_WORKERS", r.max_workers).clamp(1, 16);
        r.region_timeout_ms = parse_var(lookup, "LABEL_SCAN_REGION_TIMEOUT_MS", r.region_timeout_ms);
        r.batch_timeout_ms = parse_var(lookup, "LABEL_SCAN_BATCH_TIMEOUT_MS", r.batch_timeout_ms);

        let s = &mut self.session;
        s.cooldown_ms = parse_var(lookup, "LABEL_SCAN_COOLDOWN_MS", s.cooldown_ms);
        self
    }

    /// Reject internally inconsistent settings
    pub fn validate(&self) -> Result<(), ScanError> {
        let d = &self.detector;
        if !(0.0..1.0).contains(&d.binarize_threshold) {
            return Err(ScanError::config("detector.binarize_threshold must be in [0, 1)"));
        }
        if d.right_angle_min >= d.right_angle_max {
            return Err(ScanError::config("detector right-angle window is empty"));
        }
        if d.offline_level_min > d.offline_level_max {
            return Err(ScanError::config("detector offline level range is inverted"));
        }
        let m = &self.matcher;
        if m.ratio_test <= 0.0 || m.ratio_test > 1.0 {
            return Err(ScanError::config("matcher.ratio_test must be in (0, 1]"));
        }
        if m.ransac_threshold <= 0.0 {
            return Err(ScanError::config("matcher.ransac_threshold must be positive"));
        }
        let g = &m.geometry;
        if g.min_area_fraction >= g.max_area_fraction || g.min_angle >= g.max_angle {
            return Err(ScanError::config("matcher.geometry ranges are empty"));
        }
        if self.recognition.max_workers == 0 {
            return Err(ScanError::config("recognition.max_workers must be at least 1"));
        }
        Ok(())
    }
}
