/// Keypoints and descriptor matrices
pub mod features;
/// Match results and failure reasons
pub mod match_outcome;
/// Points and rectangles
pub mod point;
/// Segmentation probability grid
pub mod probability_map;
/// Four-corner outlines tagged with their coordinate space
pub mod quad;
/// Templates and their regions
pub mod template;

pub use features::{DescriptorKind, DescriptorMatrix, FeatureSet, KeyPoint};
pub use match_outcome::{MatchFailure, MatchOutcome, TransformedRegion};
pub use point::{Point, Rect};
pub use probability_map::ProbabilityMap;
pub use quad::{CoordinateSpace, Quad};
pub use template::{RegionKind, Template, TemplateRegion};
