use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use super::confidence;
use super::knn::{BruteForceMatcher, DescriptorMatch, DescriptorMatcher, filter_good_matches};
use super::validation::validate_template_quad;
use crate::config::{GeometryLimits, MatcherConfig};
use crate::models::{
    CoordinateSpace, FeatureSet, MatchFailure, MatchOutcome, Point, Quad, Rect, Template,
};
use crate::utils::homography::{RansacConfig, fit_homography_ransac};

/// Parameters owned by the homography-based strategy
#[derive(Debug, Clone)]
pub struct CoarseParams {
    /// RANSAC settings
    pub ransac: RansacConfig,
    /// Outline plausibility limits
    pub limits: GeometryLimits,
    /// Frame width in pixels
    pub frame_width: u32,
    /// Frame height in pixels
    pub frame_height: u32,
}

/// How a match turns into frame coordinates
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Raw frame: estimate a homography and check the projected outline
    Coarse(CoarseParams),
    /// Frame already rectified to the template's reference size
    LabelDetectionRectified,
}

impl MatchStrategy {
    /// Coarse strategy for a frame of the given size
    pub fn coarse(config: &MatcherConfig, frame_width: u32, frame_height: u32) -> Self {
        Self::Coarse(CoarseParams {
            ransac: RansacConfig {
                max_iters: config.ransac_iterations,
                inlier_threshold: config.ransac_threshold,
                min_inliers: 4,
                seed: config.ransac_seed,
            },
            limits: config.geometry.clone(),
            frame_width,
            frame_height,
        })
    }
}

/// Candidate template with its persisted features
#[derive(Debug, Clone, Copy)]
pub struct TemplateCandidate<'a> {
    /// Template metadata and regions
    pub template: &'a Template,
    /// Features extracted from the reference capture
    pub features: &'a FeatureSet,
}

/// Matches frame features against template features and validates the result
pub struct TemplateMatcher {
    config: MatcherConfig,
    matcher: Arc<dyn DescriptorMatcher>,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl TemplateMatcher {
    /// Matcher using brute-force descriptor search
    pub fn new(config: MatcherConfig) -> Self {
        Self::with_matcher(config, Arc::new(BruteForceMatcher))
    }

    /// Matcher using a caller-supplied descriptor primitive
    pub fn with_matcher(config: MatcherConfig, matcher: Arc<dyn DescriptorMatcher>) -> Self {
        Self { config, matcher }
    }

    /// Active configuration
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Match one template
    pub fn match_template(
        &self,
        frame: &FeatureSet,
        candidate: TemplateCandidate<'_>,
        strategy: &MatchStrategy,
    ) -> MatchOutcome {
        let start = Instant::now();
        let outcome = self.match_inner(frame, candidate, strategy);
        outcome.with_time(start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Match every enabled candidate and keep the most confident success
    pub fn match_best(
        &self,
        frame: &FeatureSet,
        candidates: &[TemplateCandidate<'_>],
        strategy: &MatchStrategy,
    ) -> MatchOutcome {
        let start = Instant::now();
        let enabled: Vec<TemplateCandidate<'_>> =
            candidates.iter().copied().filter(|c| c.template.enabled).collect();
        if enabled.is_empty() {
            return MatchOutcome::failed(MatchFailure::NoTemplates, None)
                .with_time(start.elapsed().as_secs_f64() * 1000.0);
        }

        let outcomes: Vec<MatchOutcome> = enabled
            .par_iter()
            .map(|c| self.match_inner(frame, *c, strategy))
            .collect();

        // Highest confidence wins; ties keep the earlier candidate
        let best = outcomes
            .into_iter()
            .filter(|o| o.success)
            .fold(None, |best: Option<MatchOutcome>, o| match best {
                Some(b) if b.confidence >= o.confidence => Some(b),
                _ => Some(o),
            });

        let outcome = best.unwrap_or_else(|| MatchOutcome::failed(MatchFailure::NoMatch, None));
        outcome.with_time(start.elapsed().as_secs_f64() * 1000.0)
    }

    fn match_inner(
        &self,
        frame: &FeatureSet,
        candidate: TemplateCandidate<'_>,
        strategy: &MatchStrategy,
    ) -> MatchOutcome {
        let cfg = &self.config;
        let template = candidate.template;
        let fail = |failure: MatchFailure| MatchOutcome::failed(failure, Some(template.clone()));

        // Step 1: Input checks
        if frame.is_empty() {
            return fail(MatchFailure::InvalidInput {
                reason: "frame has no features".into(),
            });
        }
        if candidate.features.is_empty() {
            return fail(MatchFailure::InvalidInput {
                reason: format!("template {} has no features", template.id),
            });
        }
        if !frame.is_consistent() {
            return fail(MatchFailure::InvalidInput {
                reason: "frame descriptors do not match their shape".into(),
            });
        }
        if !candidate.features.is_consistent() {
            return fail(MatchFailure::InvalidInput {
                reason: format!("template {} descriptors do not match their shape", template.id),
            });
        }
        if !frame.descriptors.is_compatible(&candidate.features.descriptors) {
            return fail(MatchFailure::DescriptorMismatch);
        }

        // Step 2: k-NN with ratio test and cutoff
        let knn = self
            .matcher
            .knn_match(&frame.descriptors, &candidate.features.descriptors, 2);
        let good = filter_good_matches(&knn, cfg.ratio_test, cfg.distance_cutoff);
        if good.len() < cfg.min_match_count {
            debug!(template = template.id, good = good.len(), "too few matches");
            return fail(MatchFailure::InsufficientMatches {
                found: good.len(),
                required: cfg.min_match_count,
            });
        }
        let avg_distance = good.iter().map(|m| m.distance).sum::<f32>() / good.len() as f32;

        // Step 3: Geometry per strategy
        let (transform, inlier_ratio) = match strategy {
            MatchStrategy::Coarse(params) => {
                let (src, dst) = correspondences(&good, frame, candidate.features);
                match fit_homography_ransac(&src, &dst, &params.ransac) {
                    Ok(fit) => (Some(fit.homography), fit.inlier_ratio() as f32),
                    Err(e) => {
                        debug!(template = template.id, error = %e, "homography failed");
                        let mut outcome = fail(MatchFailure::HomographyFailed);
                        outcome.match_count = good.len();
                        outcome.avg_descriptor_distance = avg_distance;
                        return outcome;
                    }
                }
            }
            MatchStrategy::LabelDetectionRectified => (None, cfg.label_mode_inlier_ratio),
        };

        // Step 4: Confidence
        let breakdown = confidence::score(good.len(), inlier_ratio, avg_distance, cfg.distance_cutoff);
        let stats = |mut o: MatchOutcome| {
            o.confidence = breakdown.confidence;
            o.inlier_ratio = inlier_ratio;
            o.match_count = good.len();
            o.avg_descriptor_distance = avg_distance;
            o.transform = transform;
            o
        };
        if breakdown.confidence < cfg.min_confidence {
            debug!(template = template.id, ?breakdown, "confidence too low");
            return stats(fail(MatchFailure::LowConfidence {
                confidence: breakdown.confidence,
                minimum: cfg.min_confidence,
            }));
        }

        // Step 5: Template outline in the frame
        let outline = Quad::from_rect(
            &Rect::new(
                0.0,
                0.0,
                template.reference_width as f32,
                template.reference_height as f32,
            ),
            CoordinateSpace::Template,
        );
        let corners_in_frame = match (strategy, transform) {
            (MatchStrategy::Coarse(params), Some(h)) => {
                let Some(inverse) = h.inverse() else {
                    return stats(fail(MatchFailure::HomographyFailed));
                };
                let mapped: [Point; 4] = outline.corners().map(|p| inverse.transform(&p));
                let quad = Quad::new(mapped, CoordinateSpace::Image);
                if let Err(rejection) = validate_template_quad(
                    &quad,
                    params.frame_width,
                    params.frame_height,
                    template.aspect_ratio(),
                    &params.limits,
                ) {
                    debug!(template = template.id, %rejection, "outline rejected");
                    return stats(fail(MatchFailure::ImplausibleGeometry {
                        reason: rejection.to_string(),
                    }));
                }
                quad
            }
            _ => outline.to_space(CoordinateSpace::Image, 1.0, 1.0),
        };

        info!(
            template = template.id,
            confidence = breakdown.confidence,
            matches = good.len(),
            inlier_ratio,
            "template matched"
        );
        let mut outcome = stats(MatchOutcome::matched(template.clone()));
        outcome.template_corners_in_frame = Some(corners_in_frame);
        outcome
    }
}

/// Matched keypoint positions: frame side (source) and template side (destination)
fn correspondences(
    good: &[DescriptorMatch],
    frame: &FeatureSet,
    template: &FeatureSet,
) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    good.iter()
        .filter_map(|m| {
            let q = frame.keypoints.get(m.query_idx)?;
            let t = template.keypoints.get(m.train_idx)?;
            Some(([q.x as f64, q.y as f64], [t.x as f64, t.y as f64]))
        })
        .unzip()
}
