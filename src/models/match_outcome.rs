use std::fmt;

use serde::Serialize;

use super::{Point, Quad, Rect, Template, TemplateRegion};
use crate::utils::homography::Homography;

/// Why a match attempt did not succeed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum MatchFailure {
    /// Frame or template feature set unusable
    InvalidInput {
        /// Detail
        reason: String,
    },
    /// Nothing to match against
    NoTemplates,
    /// Descriptor types or lengths differ
    DescriptorMismatch,
    /// Too few matches survived the ratio test and cutoff
    InsufficientMatches {
        /// Good matches found
        found: usize,
        /// Required minimum
        required: usize,
    },
    /// RANSAC could not produce a homography
    HomographyFailed,
    /// Confidence below the acceptance floor
    LowConfidence {
        /// Computed confidence
        confidence: f32,
        /// Acceptance floor
        minimum: f32,
    },
    /// Projected template outline is implausible
    ImplausibleGeometry {
        /// Which check failed
        reason: String,
    },
    /// Label mode found no document in the frame
    NoDocument,
    /// No template produced a successful match
    NoMatch,
}

impl MatchFailure {
    /// Stable kebab-case identifier
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid-input",
            Self::NoTemplates => "no-templates",
            Self::DescriptorMismatch => "descriptor-mismatch",
            Self::InsufficientMatches { .. } => "insufficient-matches",
            Self::HomographyFailed => "homography-failed",
            Self::LowConfidence { .. } => "low-confidence",
            Self::ImplausibleGeometry { .. } => "implausible-geometry",
            Self::NoDocument => "no-document",
            Self::NoMatch => "no-match",
        }
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { reason } => write!(f, "invalid input: {}", reason),
            Self::NoTemplates => write!(f, "no templates available"),
            Self::DescriptorMismatch => write!(f, "descriptor type or length mismatch"),
            Self::InsufficientMatches { found, required } => {
                write!(f, "insufficient matches: {} < {}", found, required)
            }
            Self::HomographyFailed => write!(f, "homography estimation failed"),
            Self::LowConfidence {
                confidence,
                minimum,
            } => write!(f, "confidence {:.3} below {:.3}", confidence, minimum),
            Self::ImplausibleGeometry { reason } => write!(f, "implausible geometry: {}", reason),
            Self::NoDocument => write!(f, "no document detected"),
            Self::NoMatch => write!(f, "no matching template"),
        }
    }
}

/// Template region placed in frame coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedRegion {
    /// Region as defined on the template
    pub source_region: TemplateRegion,
    /// Axis-aligned bounds in the frame
    pub bounds_in_frame: Rect,
    /// Projected corners `[TL, TR, BR, BL]`
    pub corners_in_frame: [Point; 4],
    /// Filled by recognition
    pub recognized_content: Option<String>,
    /// Barcode symbology, when content came from a barcode
    pub recognized_format: Option<String>,
    /// 1.0 for barcodes, mean fragment confidence for OCR
    pub recognition_confidence: f32,
}

impl TransformedRegion {
    /// Region with empty recognition fields
    pub fn new(source_region: TemplateRegion, bounds_in_frame: Rect, corners_in_frame: [Point; 4]) -> Self {
        Self {
            source_region,
            bounds_in_frame,
            corners_in_frame,
            recognized_content: None,
            recognized_format: None,
            recognition_confidence: 0.0,
        }
    }

    /// True once recognition produced content
    pub fn is_recognized(&self) -> bool {
        self.recognized_content.is_some()
    }
}

/// Result of one match attempt. Built once, read-only afterwards except for the
/// recognition fields of its regions.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    /// Whether a template was accepted
    pub success: bool,
    /// Matched (or best attempted) template
    pub template: Option<Template>,
    /// Combined confidence in [0, 1]
    pub confidence: f32,
    /// RANSAC inliers over good matches
    pub inlier_ratio: f32,
    /// Good matches after the ratio test
    pub match_count: usize,
    /// Mean descriptor distance over good matches
    pub avg_descriptor_distance: f32,
    /// Frame to template homography
    #[serde(skip)]
    pub transform: Option<Homography>,
    /// Regions in frame coordinates
    pub transformed_regions: Vec<TransformedRegion>,
    /// Template outline in frame coordinates
    pub template_corners_in_frame: Option<Quad>,
    /// Wall time of the attempt
    pub match_time_ms: f64,
    /// Why the attempt failed
    pub failure: Option<MatchFailure>,
}

impl MatchOutcome {
    /// Failed outcome carrying a reason
    pub fn failed(failure: MatchFailure, template: Option<Template>) -> Self {
        Self {
            success: false,
            template,
            confidence: 0.0,
            inlier_ratio: 0.0,
            match_count: 0,
            avg_descriptor_distance: 0.0,
            transform: None,
            transformed_regions: Vec::new(),
            template_corners_in_frame: None,
            match_time_ms: 0.0,
            failure: Some(failure),
        }
    }

    /// Successful outcome for `template`; statistics are filled in by the matcher
    pub fn matched(template: Template) -> Self {
        Self {
            success: true,
            failure: None,
            ..Self::failed(MatchFailure::NoMatch, Some(template))
        }
    }

    /// Human-readable failure message
    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }

    /// Failure code, if any
    pub fn failure_code(&self) -> Option<&'static str> {
        self.failure.as_ref().map(MatchFailure::code)
    }

    /// Stamp the elapsed time
    pub fn with_time(mut self, match_time_ms: f64) -> Self {
        self.match_time_ms = match_time_ms;
        self
    }

    /// Release owned buffers
    pub fn release(self) {}
}
