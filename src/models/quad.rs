use serde::{Deserialize, Serialize};

use super::{Point, Rect};
use crate::error::ScanError;
use crate::utils::geometry;

/// Coordinate space a quad was computed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// Segmentation model output resolution
    Model,
    /// Full-resolution camera frame / still image
    Image,
    /// Template reference pixels
    Template,
}

/// Four corners ordered by angle around their centroid.
///
/// Once roughly axis-aligned the order reads `[TL, TR, BR, BL]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    corners: [Point; 4],
    space: CoordinateSpace,
}

impl Quad {
    /// Build a quad, sorting the corners into canonical order
    pub fn new(mut corners: [Point; 4], space: CoordinateSpace) -> Self {
        geometry::sort_by_centroid_angle(&mut corners);
        Self { corners, space }
    }

    /// Build from exactly four points
    pub fn from_points(points: &[Point], space: CoordinateSpace) -> Option<Self> {
        let corners: [Point; 4] = points.try_into().ok()?;
        Some(Self::new(corners, space))
    }

    /// Build from a rectangle
    pub fn from_rect(rect: &Rect, space: CoordinateSpace) -> Self {
        Self::new(rect.corners(), space)
    }

    /// Corners in canonical order
    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    /// Space the corners live in
    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    /// First corner (top-left for an upright quad)
    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    /// Second corner (top-right for an upright quad)
    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    /// Third corner (bottom-right for an upright quad)
    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    /// Fourth corner (bottom-left for an upright quad)
    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    /// Enclosed area
    pub fn area(&self) -> f32 {
        geometry::polygon_area(&self.corners)
    }

    /// Centroid of the corners
    pub fn centroid(&self) -> Point {
        geometry::centroid(&self.corners)
    }

    /// Convexity test
    pub fn is_convex(&self) -> bool {
        geometry::is_convex(&self.corners)
    }

    /// True when opposite edges cross
    pub fn is_self_intersecting(&self) -> bool {
        geometry::is_self_intersecting(&self.corners)
    }

    /// Interior angles in degrees, one per corner
    pub fn interior_angles(&self) -> [f32; 4] {
        let a = geometry::interior_angles(&self.corners);
        [a[0], a[1], a[2], a[3]]
    }

    /// Edge lengths TL→TR, TR→BR, BR→BL, BL→TL
    pub fn side_lengths(&self) -> [f32; 4] {
        let c = &self.corners;
        [
            c[0].distance(&c[1]),
            c[1].distance(&c[2]),
            c[2].distance(&c[3]),
            c[3].distance(&c[0]),
        ]
    }

    /// Mean horizontal extent over mean vertical extent
    pub fn aspect_ratio(&self) -> f32 {
        let s = self.side_lengths();
        let horizontal = (s[0] + s[2]) * 0.5;
        let vertical = (s[1] + s[3]) * 0.5;
        if vertical <= f32::EPSILON {
            f32::INFINITY
        } else {
            horizontal / vertical
        }
    }

    /// Rotation of the TL→TR edge in degrees, `(-180, 180]`
    pub fn rotation_degrees(&self) -> f32 {
        let v = self.corners[0].to(&self.corners[1]);
        v.y.atan2(v.x).to_degrees()
    }

    /// Axis-aligned bounds
    pub fn bounds(&self) -> Rect {
        geometry::bounds_from_corners(&self.corners)
    }

    /// Grow outward from the centroid by `ratio`, then clamp into `width x height`
    pub fn expanded(&self, ratio: f32, width: f32, height: f32) -> Self {
        let grown = geometry::expand_from_centroid(&self.corners, ratio);
        let mut corners = [grown[0], grown[1], grown[2], grown[3]];
        geometry::clamp_points(&mut corners, width, height);
        Self::new(corners, self.space)
    }

    /// Clamp into `width x height`
    pub fn clamped(&self, width: f32, height: f32) -> Self {
        let mut corners = self.corners;
        geometry::clamp_points(&mut corners, width, height);
        Self::new(corners, self.space)
    }

    /// Rescale into another coordinate space
    pub fn to_space(&self, target: CoordinateSpace, sx: f32, sy: f32) -> Self {
        let corners = self.corners.map(|p| p.scale(sx, sy));
        Self::new(corners, target)
    }

    /// Guard for callers that must not mix spaces
    pub fn expect_space(&self, space: CoordinateSpace) -> Result<&Self, ScanError> {
        if self.space == space {
            Ok(self)
        } else {
            Err(ScanError::invalid_input(format!(
                "quad is in {:?} space, expected {:?}",
                self.space, space
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upright() -> Quad {
        Quad::new(
            [
                Point::new(90.0, 60.0),
                Point::new(10.0, 10.0),
                Point::new(90.0, 10.0),
                Point::new(10.0, 60.0),
            ],
            CoordinateSpace::Model,
        )
    }

    #[test]
    fn test_canonical_order() {
        let q = upright();
        assert_eq!(q.top_left(), Point::new(10.0, 10.0));
        assert_eq!(q.top_right(), Point::new(90.0, 10.0));
        assert_eq!(q.bottom_right(), Point::new(90.0, 60.0));
        assert_eq!(q.bottom_left(), Point::new(10.0, 60.0));
        assert!(!q.is_self_intersecting());
        assert!(q.is_convex());
        assert_eq!(q.rotation_degrees(), 0.0);
        assert!((q.aspect_ratio() - 1.6).abs() < 1e-5);
    }

    #[test]
    fn test_resorting_is_idempotent() {
        let q = upright();
        let again = Quad::new(*q.corners(), q.space());
        assert_eq!(q, again);
    }

    #[test]
    fn test_to_space_and_guard() {
        let q = upright().to_space(CoordinateSpace::Image, 2.0, 3.0);
        assert_eq!(q.top_left(), Point::new(20.0, 30.0));
        assert!(q.expect_space(CoordinateSpace::Image).is_ok());
        assert!(q.expect_space(CoordinateSpace::Model).is_err());
    }

    #[test]
    fn test_expanded_is_clamped() {
        let q = upright().expanded(0.5, 95.0, 65.0);
        for c in q.corners() {
            assert!(c.x >= 0.0 && c.x <= 94.0);
            assert!(c.y >= 0.0 && c.y <= 64.0);
        }
        assert!(q.area() > upright().area());
    }
}
