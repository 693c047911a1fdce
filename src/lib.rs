//! label_scan - document and label scanning core
//!
//! Locates a label in a camera frame, matches it against stored templates and reads
//! the content of each template region.
//!
//! ```text
//! frame ─┬─ segmentation ─ quad detection ─ rectify ─┐
//!        └──────────────── features ─────────────────┴─ match ─ project ─ recognize
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

/// Tunable knobs for every stage
pub mod config;
/// Document quad detection from probability maps
pub mod detector;
/// Error types
pub mod error;
/// Feature matching, homography and confidence
pub mod matcher;
/// Core data structures (Quad, FeatureSet, Template, MatchOutcome, etc.)
pub mod models;
/// Orchestration and live-session helpers
pub mod pipeline;
/// Region projection and content recognition
pub mod regions;
/// Helpers shared by the CLI, benches and tests
pub mod tools;
/// Utility functions (binarization, geometry, homography, warp)
pub mod utils;

pub use config::ScannerConfig;
pub use detector::{DetectionMode, DetectionResult, DocumentQuadDetector};
pub use error::{FeatureStoreError, ScanError};
pub use matcher::{MatchStrategy, TemplateMatcher};
pub use models::{
    CoordinateSpace, FeatureSet, MatchFailure, MatchOutcome, Point, ProbabilityMap, Quad, Rect,
    Template, TemplateRegion, TransformedRegion,
};
pub use pipeline::{
    FeatureExtractor, InMemoryTemplateSource, LiveScanner, MatchingOrchestrator, ScanMode,
    ScanResult, SegmentationModel, TemplateSource,
};
pub use regions::{BarcodeDecoder, OcrEngine, RegionContentRecognizer, RegionProjector};

/// Detect a document quad in a probability map with default settings
///
/// # Arguments
/// * `map` - Segmentation output
/// * `mode` - Live (per frame) or offline (one-shot) search depth
///
/// # Returns
/// Detection in model-space coordinates
pub fn detect_document(map: &ProbabilityMap, mode: DetectionMode) -> DetectionResult {
    DocumentQuadDetector::default().detect(map, mode)
}
