//! Integration tests for template matching
//!
//! Synthetic feature sets stand in for a real extractor: frame keypoints are the
//! template keypoints pushed through a known transform, descriptors are shared.

use label_scan::error::FeatureStoreError;
use label_scan::matcher::confidence::compute_confidence;
use label_scan::matcher::{MatchStrategy, TemplateCandidate, TemplateMatcher, feature_store};
use label_scan::models::{FeatureSet, MatchFailure, Point, Rect, Template};
use label_scan::tools::{synthetic_features, warp_features};
use label_scan::utils::homography::Homography;
use nalgebra::Matrix3;

fn similarity(angle_deg: f64, scale: f64, tx: f64, ty: f64) -> Homography {
    let (s, c) = angle_deg.to_radians().sin_cos();
    Homography::from_matrix(Matrix3::new(
        scale * c,
        -scale * s,
        tx,
        scale * s,
        scale * c,
        ty,
        0.0,
        0.0,
        1.0,
    ))
}

fn candidate<'a>(template: &'a Template, features: &'a FeatureSet) -> TemplateCandidate<'a> {
    TemplateCandidate { template, features }
}

fn has_corner_near(corners: &[Point; 4], x: f32, y: f32) -> bool {
    corners.iter().any(|c| (c.x - x).abs() < 1.0 && (c.y - y).abs() < 1.0)
}

#[test]
fn test_confidence_reference_values() {
    assert!((compute_confidence(20, 0.6, 100.0, 250.0) - 1.0).abs() < 1e-6);
    assert!((compute_confidence(5, 0.15, 200.0, 250.0) - 0.17625).abs() < 1e-4);
    // Only the distance term, halved by the low-inlier penalty
    assert!((compute_confidence(0, 0.0, 0.0, 250.0) - 0.1).abs() < 1e-6);
}

#[test]
fn test_coarse_match_under_rotation_and_scale() {
    let template = Template::new(9, "shipping label", 400, 300);
    let tf = synthetic_features(42, 80, 400.0, 300.0);
    let to_frame = similarity(10.0, 0.9, 150.0, 100.0);
    let frame = warp_features(&tf, &to_frame);

    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);
    let outcome = matcher.match_template(&frame, candidate(&template, &tf), &strategy);

    assert!(outcome.success, "{:?}", outcome.failure);
    assert_eq!(outcome.match_count, 80);
    assert!(outcome.inlier_ratio > 0.99);
    assert!(outcome.confidence >= 0.3);
    assert!(outcome.transform.is_some());

    let outline = outcome.template_corners_in_frame.unwrap();
    for p in Rect::new(0.0, 0.0, 400.0, 300.0).corners() {
        let expected = to_frame.transform(&p);
        assert!(
            has_corner_near(outline.corners(), expected.x, expected.y),
            "missing corner near {:?}",
            expected
        );
    }
}

#[test]
fn test_outline_outside_frame_is_rejected() {
    // Template shrunk to a sliver: fails the minimum area check
    let template = Template::new(1, "label", 400, 300);
    let tf = synthetic_features(5, 60, 400.0, 300.0);
    let frame = warp_features(&tf, &similarity(0.0, 0.05, 300.0, 200.0));

    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);
    let outcome = matcher.match_template(&frame, candidate(&template, &tf), &strategy);

    assert!(!outcome.success);
    assert_eq!(outcome.failure_code(), Some("implausible-geometry"));
    assert!(outcome.template_corners_in_frame.is_none());
}

#[test]
fn test_unrelated_frame_does_not_match() {
    let template = Template::new(1, "label", 400, 300);
    let tf = synthetic_features(11, 60, 400.0, 300.0);
    let frame = synthetic_features(12, 60, 640.0, 480.0);

    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);
    let outcome = matcher.match_best(&frame, &[candidate(&template, &tf)], &strategy);

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(MatchFailure::NoMatch));
}

#[test]
fn test_best_of_several_templates() {
    let templates: Vec<Template> = (1..=4)
        .map(|i| Template::new(i, format!("label {i}"), 400, 300))
        .collect();
    let features: Vec<FeatureSet> = (1..=4)
        .map(|i| synthetic_features(200 + i as u64, 50, 400.0, 300.0))
        .collect();
    let frame = warp_features(&features[2], &similarity(0.0, 1.0, 80.0, 60.0));
    let candidates: Vec<TemplateCandidate<'_>> = templates
        .iter()
        .zip(&features)
        .map(|(t, f)| candidate(t, f))
        .collect();

    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);
    let outcome = matcher.match_best(&frame, &candidates, &strategy);

    assert!(outcome.success);
    assert_eq!(outcome.template.map(|t| t.id), Some(3));
}

#[test]
fn test_disabled_templates_are_skipped() {
    let mut template = Template::new(1, "label", 400, 300);
    template.enabled = false;
    let tf = synthetic_features(1, 30, 400.0, 300.0);

    let matcher = TemplateMatcher::default();
    let outcome = matcher.match_best(
        &tf,
        &[candidate(&template, &tf)],
        &MatchStrategy::LabelDetectionRectified,
    );
    assert_eq!(outcome.failure, Some(MatchFailure::NoTemplates));
}

#[test]
fn test_stored_features_survive_the_codec() {
    let template = Template::new(1, "label", 400, 300);
    let tf = synthetic_features(3, 40, 400.0, 300.0);
    let restored = feature_store::decode(&feature_store::encode(&tf)).unwrap();

    let matcher = TemplateMatcher::default();
    let outcome = matcher.match_template(
        &tf,
        candidate(&template, &restored),
        &MatchStrategy::LabelDetectionRectified,
    );
    assert!(outcome.success);
    assert_eq!(outcome.match_count, 40);
}

#[test]
fn test_corrupted_store_is_an_error() {
    let blob = feature_store::encode(&synthetic_features(3, 10, 100.0, 100.0));

    let truncated = &blob[..blob.len() - 3];
    assert!(matches!(
        feature_store::decode(truncated),
        Err(FeatureStoreError::Truncated { .. })
    ));

    let mut wrong_magic = blob.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        feature_store::decode(&wrong_magic),
        Err(FeatureStoreError::BadMagic { .. })
    ));
}
