//! Utility functions for image processing
//!
//! This module provides the numeric helpers the pipeline stages share:
//! - Binarization (fixed threshold and Otsu's method)
//! - Geometry (polygon math, quad ordering, simplification)
//! - Homography (4-point solve, DLT, RANSAC)
//! - Perspective warp (quad rectification)

/// Mask thresholding
pub mod binarization;
/// Polygon and quad geometry
pub mod geometry;
/// Projective transforms and fitting
pub mod homography;
/// Quad rectification
pub mod warp;
