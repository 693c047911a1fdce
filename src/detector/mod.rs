//! Document quadrilateral detection
//!
//! Turns a segmentation probability map into a four-corner outline:
//! - Mask refinement (threshold, close, open)
//! - Edge contours and polygon approximation
//! - Fallbacks: threshold sweep, right-angle completion, bounding rectangle

/// Mask post-processing and contour helpers
pub mod contours;
/// Layered quad detector
pub mod quad_detector;
/// Stage counters
pub mod telemetry;

pub use quad_detector::{DetectionMode, DetectionResult, DocumentQuadDetector};
pub use telemetry::{DetectionStage, DetectionTelemetry};
