//! End-to-end tests for the scan orchestrator
//!
//! Segmentation, feature extraction, OCR and barcode decoding are stubbed; everything
//! between them is the real pipeline.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, Rgb, RgbImage};
use label_scan::config::{RecognitionConfig, ScannerConfig, SessionConfig};
use label_scan::detector::DetectionMode;
use label_scan::error::ScanError;
use label_scan::models::{FeatureSet, MatchFailure, ProbabilityMap, Rect, RegionKind, Template, TemplateRegion, TransformedRegion};
use label_scan::pipeline::{
    FeatureExtractor, FrameDecision, InMemoryTemplateSource, LiveScanner, MatchingOrchestrator,
    ScanMode, SegmentationModel,
};
use label_scan::regions::{BarcodeDecoder, BarcodeResult, OcrEngine, RegionContentRecognizer, TextFragment};
use label_scan::tools::{synthetic_features, synthetic_label_map, warp_features};
use label_scan::utils::homography::Homography;
use nalgebra::Matrix3;

struct FixedExtractor {
    features: FeatureSet,
    delay: Duration,
}

impl FeatureExtractor for FixedExtractor {
    fn extract(&self, _image: &GrayImage) -> Result<FeatureSet, ScanError> {
        thread::sleep(self.delay);
        Ok(self.features.clone())
    }
}

struct RectSegmenter {
    rect: (usize, usize, usize, usize),
}

impl SegmentationModel for RectSegmenter {
    fn infer(&self, image: &RgbImage) -> Result<ProbabilityMap, ScanError> {
        Ok(synthetic_label_map(
            image.width() as usize,
            image.height() as usize,
            self.rect,
            0.95,
            0.02,
        ))
    }
}

struct FixedOcr {
    delay: Duration,
}

impl OcrEngine for FixedOcr {
    fn recognize(&self, _image: &RgbImage) -> Result<Vec<TextFragment>, ScanError> {
        thread::sleep(self.delay);
        Ok(vec![
            TextFragment {
                text: "LOT".into(),
                bounding_box: Rect::default(),
                confidence: 0.8,
            },
            TextFragment {
                text: " 42 ".into(),
                bounding_box: Rect::default(),
                confidence: 1.0,
            },
        ])
    }
}

/// Reads a barcode wherever the crop center is dark
struct DarkCenterBarcode;

impl BarcodeDecoder for DarkCenterBarcode {
    fn decode(&self, image: &RgbImage, _rotation: i32) -> Result<Vec<BarcodeResult>, ScanError> {
        let center = image.get_pixel(image.width() / 2, image.height() / 2);
        if center[0] > 64 {
            return Ok(Vec::new());
        }
        Ok(vec![BarcodeResult {
            content: "0123456789".into(),
            format: "CODE_128".into(),
            bounding_box: None,
            corners: Vec::new(),
        }])
    }
}

fn region(id: i64, kind: RegionKind, bounds: Rect, sort_order: i32) -> TemplateRegion {
    let mut r = TemplateRegion::new(id, format!("region-{id}"), kind, bounds);
    r.sort_order = sort_order;
    r
}

fn label_template() -> Template {
    Template::new(7, "parcel label", 400, 300)
        .with_region(region(2, RegionKind::Barcode, Rect::new(200.0, 200.0, 150.0, 60.0), 1))
        .with_region(region(1, RegionKind::Text, Rect::new(20.0, 20.0, 150.0, 40.0), 0))
        .with_region(region(3, RegionKind::Text, Rect::new(300.0, 20.0, 5.0, 5.0), 2))
}

fn translation(dx: f64, dy: f64) -> Homography {
    Homography::from_matrix(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
}

fn white_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
}

fn orchestrator(
    config: &ScannerConfig,
    frame_features: FeatureSet,
    template_features: FeatureSet,
) -> MatchingOrchestrator {
    let mut source = InMemoryTemplateSource::new();
    source.insert(label_template(), template_features);
    let extractor = Arc::new(FixedExtractor {
        features: frame_features,
        delay: Duration::ZERO,
    });
    MatchingOrchestrator::new(config, extractor, Arc::new(source))
}

#[test]
fn test_coarse_scan_projects_and_reads_regions() {
    let config = ScannerConfig::default();
    let tf = synthetic_features(21, 60, 400.0, 300.0);
    let frame_features = warp_features(&tf, &translation(100.0, 80.0));
    let scanner = orchestrator(&config, frame_features, tf)
        .with_engines(
            &config,
            Arc::new(FixedOcr {
                delay: Duration::ZERO,
            }),
            Arc::new(DarkCenterBarcode),
        )
        .unwrap();

    // Barcode region lands at (300, 280) in the frame
    let mut frame = white_frame(640, 480);
    for y in 280..340 {
        for x in 300..450 {
            frame.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }

    let result = scanner.scan(&frame, ScanMode::Coarse).unwrap();
    let outcome = &result.outcome;
    assert!(outcome.success, "{:?}", outcome.failure);
    assert_eq!(outcome.template.as_ref().map(|t| t.id), Some(7));

    // The 5x5 region is dropped, the rest keep presentation order
    let ids: Vec<i64> = outcome
        .transformed_regions
        .iter()
        .map(|r| r.source_region.id)
        .collect();
    assert_eq!(ids, vec![1, 2]);

    let text = &outcome.transformed_regions[0];
    assert!((text.bounds_in_frame.x - 120.0).abs() < 0.5);
    assert!((text.bounds_in_frame.y - 100.0).abs() < 0.5);
    assert_eq!(text.recognized_content.as_deref(), Some("LOT 42"));
    assert_eq!(text.recognized_format, None);
    assert!((text.recognition_confidence - 0.9).abs() < 1e-6);

    let barcode = &outcome.transformed_regions[1];
    assert_eq!(barcode.recognized_content.as_deref(), Some("0123456789"));
    assert_eq!(barcode.recognized_format.as_deref(), Some("CODE_128"));
    assert_eq!(barcode.recognition_confidence, 1.0);

    let summary = result.recognition.unwrap();
    assert_eq!(summary.submitted, 2);
    assert_eq!(summary.recognized, 2);
    assert_eq!(summary.timed_out, 0);
}

#[test]
fn test_label_scan_uses_rectified_template_space() {
    let config = ScannerConfig::default();
    let tf = synthetic_features(33, 60, 400.0, 300.0);
    let scanner = orchestrator(&config, tf.clone(), tf)
        .with_segmenter(Arc::new(RectSegmenter {
            rect: (40, 30, 280, 210),
        }));

    let result = scanner
        .scan(&white_frame(320, 240), ScanMode::LabelDetection(DetectionMode::Live))
        .unwrap();

    let detection = result.detection.unwrap();
    assert!(detection.detected);
    assert_eq!(result.rectified.as_ref().map(|r| r.dimensions()), Some((400, 300)));

    let outcome = result.outcome;
    assert!(outcome.success, "{:?}", outcome.failure);
    assert!((outcome.inlier_ratio - config.matcher.label_mode_inlier_ratio).abs() < 1e-6);
    assert!(outcome.transform.is_none());
    assert_eq!(outcome.transformed_regions.len(), 2);
    assert_eq!(outcome.transformed_regions[0].bounds_in_frame, Rect::new(20.0, 20.0, 150.0, 40.0));
    // No recognizer configured
    assert!(result.recognition.is_none());
}

#[test]
fn test_label_scan_without_document() {
    let config = ScannerConfig::default();
    let tf = synthetic_features(33, 30, 400.0, 300.0);
    let scanner = orchestrator(&config, tf.clone(), tf)
        .with_segmenter(Arc::new(RectSegmenter { rect: (0, 0, 0, 0) }));

    let result = scanner
        .scan(&white_frame(320, 240), ScanMode::LabelDetection(DetectionMode::Offline))
        .unwrap();
    assert_eq!(result.outcome.failure, Some(MatchFailure::NoDocument));
    assert!(result.detection.is_some_and(|d| !d.detected));
    assert!(result.rectified.is_none());
}

#[test]
fn test_label_scan_needs_a_segmenter() {
    let config = ScannerConfig::default();
    let tf = synthetic_features(1, 10, 400.0, 300.0);
    let scanner = orchestrator(&config, tf.clone(), tf);
    let err = scanner
        .scan(&white_frame(64, 64), ScanMode::LabelDetection(DetectionMode::Live))
        .unwrap_err();
    assert!(matches!(err, ScanError::Config { .. }));
}

#[test]
fn test_empty_library_and_empty_frame() {
    let config = ScannerConfig::default();
    let extractor = Arc::new(FixedExtractor {
        features: FeatureSet::empty(),
        delay: Duration::ZERO,
    });
    let scanner = MatchingOrchestrator::new(&config, extractor, Arc::new(InMemoryTemplateSource::new()));

    let result = scanner.scan(&white_frame(64, 64), ScanMode::Coarse).unwrap();
    assert_eq!(result.outcome.failure, Some(MatchFailure::NoTemplates));

    let result = scanner.scan(&RgbImage::new(0, 0), ScanMode::Coarse).unwrap();
    assert_eq!(result.outcome.failure_code(), Some("invalid-input"));
}

#[test]
fn test_batch_deadline_bounds_recognition() {
    let config = RecognitionConfig {
        max_workers: 2,
        region_timeout_ms: 5_000,
        batch_timeout_ms: 100,
        ..RecognitionConfig::default()
    };
    let recognizer = RegionContentRecognizer::new(
        Arc::new(FixedOcr {
            delay: Duration::from_secs(1),
        }),
        Arc::new(DarkCenterBarcode),
        config,
    )
    .unwrap();

    let mut regions: Vec<TransformedRegion> = [10.0, 80.0]
        .into_iter()
        .enumerate()
        .map(|(i, x)| {
            let bounds = Rect::new(x, 10.0, 50.0, 20.0);
            TransformedRegion::new(
                TemplateRegion::new(i as i64, "text", RegionKind::Text, bounds),
                bounds,
                bounds.corners(),
            )
        })
        .collect();

    let start = Instant::now();
    let summary = recognizer.recognize_all(&white_frame(200, 100), &mut regions);
    assert!(start.elapsed() < Duration::from_millis(900));
    assert_eq!(summary.submitted, 2);
    assert_eq!(summary.timed_out, 2);
    assert!(regions.iter().all(|r| r.recognized_content.is_none()));
}

#[test]
fn test_live_scanner_drops_frames_while_busy() {
    let config = ScannerConfig::default();
    let mut source = InMemoryTemplateSource::new();
    source.insert(label_template(), synthetic_features(5, 20, 400.0, 300.0));
    let extractor = Arc::new(FixedExtractor {
        features: synthetic_features(6, 20, 640.0, 480.0),
        delay: Duration::from_millis(300),
    });
    let orchestrator = Arc::new(MatchingOrchestrator::new(&config, extractor, Arc::new(source)));
    let session = SessionConfig {
        cooldown_ms: 0,
        miss_guidance_threshold: 2,
    };
    let live = LiveScanner::new(orchestrator, &session, ScanMode::Coarse);
    let frame = white_frame(640, 480);

    thread::scope(|s| {
        let first = s.spawn(|| live.submit(&frame));
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(live.submit(&frame), Ok(FrameDecision::Dropped)));
        match first.join().unwrap() {
            Ok(FrameDecision::Processed { result, guidance_due }) => {
                assert!(!result.outcome.success);
                assert!(!guidance_due);
            }
            other => panic!("unexpected {other:?}"),
        }
    });

    // Second miss in a row reaches the guidance threshold
    match live.submit(&frame).unwrap() {
        FrameDecision::Processed { guidance_due, .. } => assert!(guidance_due),
        FrameDecision::Dropped => panic!("gate should be free"),
    }
}
