use image::GrayImage;
use imageproc::filter;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::contours::{self, PolygonCandidate};
use super::telemetry::{DetectionStage, DetectionTelemetry};
use crate::config::DetectorConfig;
use crate::models::{CoordinateSpace, Point, ProbabilityMap, Quad};
use crate::utils::binarization::{calculate_otsu_threshold, threshold_binarize};
use crate::utils::geometry;

/// How much fallback search a call can afford
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Per camera frame: short threshold sweep, no bounding-rect fallback
    Live,
    /// One-shot still image: full sweep plus the bounding-rect fallback
    Offline,
}

/// Outcome of one detection call. Not detecting a document is the normal idle state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Whether a quad was found
    pub detected: bool,
    /// Tight quad, used for cropping
    pub quad: Option<Quad>,
    /// Quad grown for display, clamped to the source bounds
    pub display_quad: Option<Quad>,
    /// Mean probability over confident cells
    pub confidence: f32,
    /// Rotation of the top edge in degrees
    pub rotation_angle_deg: f32,
    /// Width and height of the space the quads live in
    pub source_size: (u32, u32),
    /// Stage that produced the quad
    pub stage: Option<DetectionStage>,
}

impl DetectionResult {
    /// Nothing found
    pub fn none(width: u32, height: u32) -> Self {
        Self {
            detected: false,
            quad: None,
            display_quad: None,
            confidence: 0.0,
            rotation_angle_deg: 0.0,
            source_size: (width, height),
            stage: None,
        }
    }

    /// Rescale the quads to an image of `width x height`
    pub fn in_image_space(&self, width: u32, height: u32) -> Self {
        let (sw, sh) = self.source_size;
        if sw == 0 || sh == 0 {
            return Self::none(width, height);
        }
        let sx = width as f32 / sw as f32;
        let sy = height as f32 / sh as f32;
        let quad = self
            .quad
            .map(|q| q.to_space(CoordinateSpace::Image, sx, sy));
        let display_quad = self
            .display_quad
            .map(|q| q.to_space(CoordinateSpace::Image, sx, sy));
        Self {
            detected: self.detected,
            rotation_angle_deg: quad.map_or(self.rotation_angle_deg, |q| q.rotation_degrees()),
            quad,
            display_quad,
            confidence: self.confidence,
            source_size: (width, height),
            stage: self.stage,
        }
    }
}

/// Finds the document outline in a segmentation probability map.
///
/// Stages run in order and the first one that yields a qualifying quad wins:
/// direct contour, threshold sweep, right-angle completion, and (offline only)
/// the minimum-area bounding rectangle.
pub struct DocumentQuadDetector {
    config: DetectorConfig,
}

impl Default for DocumentQuadDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl DocumentQuadDetector {
    /// Create a detector
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect a document quad in model space
    pub fn detect(&self, map: &ProbabilityMap, mode: DetectionMode) -> DetectionResult {
        self.detect_with_telemetry(map, mode).0
    }

    /// Detect and report which stages ran
    pub fn detect_with_telemetry(
        &self,
        map: &ProbabilityMap,
        mode: DetectionMode,
    ) -> (DetectionResult, DetectionTelemetry) {
        let mut tel = DetectionTelemetry::default();
        let (width, height) = (map.width() as u32, map.height() as u32);
        if map.is_empty() {
            return (DetectionResult::none(width, height), tel);
        }
        let cfg = &self.config;
        let min_area = cfg.min_area_fraction * map.area() as f32;

        // Step 1: Binarize and refine
        tel.refine_runs += 1;
        let refined = contours::refine_mask(map, cfg.binarize_threshold, cfg.morphology_radius);

        // Step 2: Edge contours, largest approximated polygon
        tel.direct_attempts += 1;
        let edges = contours::edge_map(&refined, cfg.blur_sigma, cfg.canny_low, cfg.canny_high);
        let edge_contours = contours::outer_contours(&edges);
        tel.contours_found += edge_contours.len();
        let largest = contours::largest_polygon(&edge_contours, cfg.approx_epsilon_fraction);
        if let Some(quad) = largest
            .as_ref()
            .and_then(PolygonCandidate::as_quad)
            .and_then(|q| accept_quad(q, min_area))
        {
            return (self.finish(map, quad, DetectionStage::Direct, &mut tel), tel);
        }

        // Step 3: Threshold sweep on the smoothed map
        tel.sweep_attempts += 1;
        if let Some(quad) = self.threshold_sweep(map, mode, min_area, &mut tel) {
            return (self.finish(map, quad, DetectionStage::ThresholdSweep, &mut tel), tel);
        }

        // Step 4: Complete a quad from three right angles
        if let Some(candidate) = largest.as_ref().filter(|c| c.polygon.len() > 4) {
            tel.right_angle_attempts += 1;
            if let Some(quad) = complete_from_right_angles(
                &candidate.polygon,
                map.width() as f32,
                map.height() as f32,
                min_area,
                cfg.right_angle_min,
                cfg.right_angle_max,
            ) {
                return (self.finish(map, quad, DetectionStage::RightAngle, &mut tel), tel);
            }
        }

        // Step 5: Bounding rectangle, offline only
        if mode == DetectionMode::Offline
            && let Some(candidate) = largest.as_ref()
        {
            tel.min_rect_attempts += 1;
            if let Some(quad) =
                geometry::min_area_rect(&candidate.contour).and_then(|q| accept_quad(q, min_area))
            {
                return (self.finish(map, quad, DetectionStage::MinAreaRect, &mut tel), tel);
            }
        }

        debug!(?mode, contours = tel.contours_found, "no document quad");
        (DetectionResult::none(width, height), tel)
    }

    fn threshold_sweep(
        &self,
        map: &ProbabilityMap,
        mode: DetectionMode,
        min_area: f32,
        tel: &mut DetectionTelemetry,
    ) -> Option<[Point; 4]> {
        let cfg = &self.config;
        let gray = map.to_gray_image();
        let smoothed: GrayImage = if cfg.blur_sigma > 0.0 {
            filter::gaussian_blur_f32(&gray, cfg.blur_sigma)
        } else {
            gray
        };

        let levels = match mode {
            DetectionMode::Live => cfg.live_levels.clone(),
            DetectionMode::Offline => cfg.offline_levels(),
        };
        let mut thresholds = vec![calculate_otsu_threshold(smoothed.as_raw()).max(1)];
        thresholds.extend(
            levels
                .iter()
                .map(|l| (l * 255.0).round().clamp(1.0, 255.0) as u8),
        );
        tel.sweep_levels_tried += thresholds.len();

        let map_area = map.area() as f32;
        let eps = cfg.approx_epsilon_fraction;
        let scored: Vec<(usize, f32, [Point; 4])> = thresholds
            .par_iter()
            .enumerate()
            .filter_map(|(i, &t)| {
                let mask = threshold_binarize(&smoothed, t);
                let found = contours::outer_contours(&mask);
                let (quad, area) = contours::largest_quad(&found, eps)?;
                let quad = accept_quad(quad, min_area)?;
                let inside = contours::mean_probability_inside(map, &quad);
                let score = inside * (0.7 + 0.3 * area / map_area);
                Some((i, score, quad))
            })
            .collect();

        // Highest score; ties go to the earlier threshold
        let best = scored.into_iter().fold(None, |best: Option<(usize, f32, [Point; 4])>, c| {
            match best {
                Some(b) if b.1 > c.1 || (b.1 == c.1 && b.0 < c.0) => Some(b),
                _ => Some(c),
            }
        });
        if let Some((i, score, _)) = &best {
            debug!(threshold = thresholds[*i], score, "sweep picked quad");
        }
        best.map(|b| b.2)
    }

    fn finish(
        &self,
        map: &ProbabilityMap,
        corners: [Point; 4],
        stage: DetectionStage,
        tel: &mut DetectionTelemetry,
    ) -> DetectionResult {
        let (w, h) = (map.width() as f32, map.height() as f32);
        let quad = Quad::new(corners, CoordinateSpace::Model).clamped(w, h);
        let display = quad.expanded(self.config.display_expansion, w, h);
        tel.accepted_stage = Some(stage);
        debug!(?stage, area = quad.area(), "document quad accepted");
        DetectionResult {
            detected: true,
            quad: Some(quad),
            display_quad: Some(display),
            confidence: map.mean_above(0.5),
            rotation_angle_deg: quad.rotation_degrees(),
            source_size: (map.width() as u32, map.height() as u32),
            stage: Some(stage),
        }
    }
}

/// Sort the corners and apply the area floor and self-intersection check
fn accept_quad(mut quad: [Point; 4], min_area: f32) -> Option<[Point; 4]> {
    geometry::sort_by_centroid_angle(&mut quad);
    if geometry::polygon_area(&quad) < min_area || geometry::is_self_intersecting(&quad) {
        return None;
    }
    Some(quad)
}

/// Rebuild a quad from three consecutive near-right angles of a polygon.
///
/// The missing corner is where the edge entering the triple meets the edge leaving it.
/// Among all candidates the one closest to a true rectangle wins.
pub fn complete_from_right_angles(
    polygon: &[Point],
    width: f32,
    height: f32,
    min_area: f32,
    angle_min: f32,
    angle_max: f32,
) -> Option<[Point; 4]> {
    let n = polygon.len();
    if n < 4 {
        return None;
    }
    let angles = geometry::interior_angles(polygon);
    let in_window = |a: f32| (angle_min..=angle_max).contains(&a);
    let tolerance = 1.0;

    let mut best: Option<([Point; 4], f32)> = None;
    for i in 0..n {
        let (a, b, c) = (i, (i + 1) % n, (i + 2) % n);
        if !(in_window(angles[a]) && in_window(angles[b]) && in_window(angles[c])) {
            continue;
        }
        let prev = polygon[(i + n - 1) % n];
        let next = polygon[(i + 3) % n];
        let Some(d) = geometry::line_intersection(&prev, &polygon[a], &polygon[c], &next) else {
            continue;
        };
        let in_bounds = d.x >= -tolerance
            && d.y >= -tolerance
            && d.x <= width - 1.0 + tolerance
            && d.y <= height - 1.0 + tolerance;
        if !in_bounds {
            continue;
        }
        let mut quad = [polygon[a], polygon[b], polygon[c], d];
        geometry::sort_by_centroid_angle(&mut quad);
        if !geometry::is_convex(&quad)
            || geometry::is_self_intersecting(&quad)
            || geometry::polygon_area(&quad) < min_area
        {
            continue;
        }
        let deviation: f32 = geometry::interior_angles(&quad)
            .iter()
            .map(|a| (a - 90.0).abs())
            .sum();
        if best.as_ref().is_none_or(|(_, dev)| deviation < *dev) {
            best = Some((quad, deviation));
        }
    }
    best.map(|(q, _)| q)
}
