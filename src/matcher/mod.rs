//! Template matching
//!
//! Descriptor k-NN with ratio filtering, RANSAC homography, confidence scoring
//! and outline plausibility checks, plus the persisted feature codec.

/// Match confidence formula
pub mod confidence;
/// Feature set codec
pub mod feature_store;
/// k-NN descriptor matching
pub mod knn;
/// Template matcher and strategies
pub mod template_matcher;
/// Projected outline plausibility
pub mod validation;

pub use knn::{BruteForceMatcher, DescriptorMatch, DescriptorMatcher};
pub use template_matcher::{CoarseParams, MatchStrategy, TemplateCandidate, TemplateMatcher};
pub use validation::GeometryRejection;
