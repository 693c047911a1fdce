use serde::Serialize;

/// Detector stage that produced the accepted quad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStage {
    /// Largest edge contour was already a quad
    Direct,
    /// Best-scoring quad across the threshold sweep
    ThresholdSweep,
    /// Fourth corner rebuilt from three right angles
    RightAngle,
    /// Minimum-area bounding rectangle (offline only)
    MinAreaRect,
}

/// Per-call stage counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionTelemetry {
    /// Binarize + morphology passes
    pub refine_runs: usize,
    /// Edge-contour attempts
    pub direct_attempts: usize,
    /// Outer edge contours found
    pub contours_found: usize,
    /// Threshold sweeps started
    pub sweep_attempts: usize,
    /// Individual sweep thresholds evaluated
    pub sweep_levels_tried: usize,
    /// Right-angle completion attempts
    pub right_angle_attempts: usize,
    /// Bounding-rectangle attempts
    pub min_rect_attempts: usize,
    /// Stage that produced the result
    pub accepted_stage: Option<DetectionStage>,
}

impl DetectionTelemetry {
    /// True when any fallback stage ran
    pub fn used_fallback(&self) -> bool {
        self.sweep_attempts > 0 || self.right_angle_attempts > 0 || self.min_rect_attempts > 0
    }
}
