use std::fmt;

use tracing::{debug, warn};

use crate::config::ProjectorConfig;
use crate::models::{Point, TemplateRegion, TransformedRegion};
use crate::utils::geometry;
use crate::utils::homography::Homography;

/// Why a projected region was dropped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionRejection {
    /// Bounds contain NaN or infinity
    NonFinite,
    /// Width or height at or below the minimum
    TooSmall {
        /// Bound width
        width: f32,
        /// Bound height
        height: f32,
    },
    /// Width or height beyond the frame-relative maximum
    TooLarge {
        /// Bound width
        width: f32,
        /// Bound height
        height: f32,
    },
    /// Longest over shortest bound side
    Aspect(f32),
    /// Polygon area outside the accepted range
    Area(f32),
    /// Two corners nearly coincide
    CollapsedCorners(f32),
    /// Signed polygon area too small
    Degenerate(f32),
    /// The transform could not be inverted
    SingularTransform,
}

impl fmt::Display for RegionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite => write!(f, "non-finite bounds"),
            Self::TooSmall { width, height } => write!(f, "too small: {:.1}x{:.1}", width, height),
            Self::TooLarge { width, height } => write!(f, "too large: {:.1}x{:.1}", width, height),
            Self::Aspect(a) => write!(f, "aspect {:.1}:1", a),
            Self::Area(a) => write!(f, "area {:.1}px²", a),
            Self::CollapsedCorners(d) => write!(f, "corners {:.2}px apart", d),
            Self::Degenerate(a) => write!(f, "signed area {:.1}px²", a),
            Self::SingularTransform => write!(f, "singular transform"),
        }
    }
}

/// Places template regions into frame coordinates and drops implausible ones
#[derive(Debug, Clone, Default)]
pub struct RegionProjector {
    config: ProjectorConfig,
}

impl RegionProjector {
    /// Create a projector
    pub fn new(config: ProjectorConfig) -> Self {
        Self { config }
    }

    /// Project every region.
    ///
    /// `transform` maps frame to template, so corners go through its inverse. Without a
    /// transform the frame is taken to be rectified and the stored bounds are used as-is.
    /// Invalid regions are dropped; the rest are returned in input order.
    pub fn project(
        &self,
        regions: &[TemplateRegion],
        transform: Option<&Homography>,
        frame_size: (u32, u32),
    ) -> Vec<TransformedRegion> {
        let inverse = match transform {
            Some(h) => match h.inverse() {
                Some(inv) => Some(inv),
                None => {
                    warn!(regions = regions.len(), "transform not invertible, dropping all regions");
                    return Vec::new();
                }
            },
            None => None,
        };

        regions
            .iter()
            .filter_map(|region| {
                let source = region.bounds.corners();
                let corners: [Point; 4] = match &inverse {
                    Some(inv) => source.map(|p| inv.transform(&p)),
                    None => source,
                };
                match self.validate(&corners, frame_size) {
                    Ok(()) => {
                        let bounds = geometry::bounds_from_corners(&corners);
                        Some(TransformedRegion::new(region.clone(), bounds, corners))
                    }
                    Err(rejection) => {
                        warn!(region = %region.name, %rejection, "region dropped");
                        None
                    }
                }
            })
            .inspect(|r| debug!(region = %r.source_region.name, bounds = ?r.bounds_in_frame, "region projected"))
            .collect()
    }

    /// Validity checks on projected corners `[TL, TR, BR, BL]`
    pub fn validate(&self, corners: &[Point; 4], frame_size: (u32, u32)) -> Result<(), RegionRejection> {
        let cfg = &self.config;
        let bounds = geometry::bounds_from_corners(corners);
        if !bounds.is_finite() || !corners.iter().all(Point::is_finite) {
            return Err(RegionRejection::NonFinite);
        }

        let (w, h) = (bounds.width, bounds.height);
        if w <= cfg.min_side || h <= cfg.min_side {
            return Err(RegionRejection::TooSmall { width: w, height: h });
        }
        let max_dim = frame_size.0.max(frame_size.1) as f32;
        let max_side = cfg.max_side_factor * max_dim;
        if w > max_side || h > max_side {
            return Err(RegionRejection::TooLarge { width: w, height: h });
        }

        let aspect = w.max(h) / w.min(h);
        if aspect > cfg.max_aspect {
            return Err(RegionRejection::Aspect(aspect));
        }

        let area = geometry::polygon_area(corners);
        if area < cfg.min_area || area > cfg.max_area_factor * max_dim * max_dim {
            return Err(RegionRejection::Area(area));
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                let d = corners[i].distance(&corners[j]);
                if d < cfg.min_corner_gap {
                    return Err(RegionRejection::CollapsedCorners(d));
                }
            }
        }

        let signed = geometry::signed_area(corners);
        if signed < cfg.min_signed_area {
            return Err(RegionRejection::Degenerate(signed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Rect, RegionKind};
    use nalgebra::Matrix3;

    fn region(id: i64, w: f32, h: f32) -> TemplateRegion {
        TemplateRegion::new(id, format!("r{}", id), RegionKind::Text, Rect::new(20.0, 20.0, w, h))
    }

    #[test]
    fn test_size_boundary() {
        let projector = RegionProjector::default();
        assert!(projector.project(&[region(1, 5.0, 5.0)], None, (640, 480)).is_empty());
        assert_eq!(
            projector
                .project(&[region(2, 10.01, 10.01)], None, (640, 480))
                .len(),
            1
        );
    }

    #[test]
    fn test_soft_failure_keeps_the_rest() {
        let projector = RegionProjector::default();
        let regions = [region(1, 100.0, 40.0), region(2, 5.0, 200.0), region(3, 60.0, 60.0)];
        let out = projector.project(&regions, None, (640, 480));
        let ids: Vec<i64> = out.iter().map(|r| r.source_region.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_projection_uses_inverse() {
        // Frame -> template is a shift by (-100, -50)
        let h = Homography::from_matrix(Matrix3::new(1.0, 0.0, -100.0, 0.0, 1.0, -50.0, 0.0, 0.0, 1.0));
        let out = RegionProjector::default().project(&[region(1, 100.0, 40.0)], Some(&h), (640, 480));
        assert_eq!(out.len(), 1);
        let b = out[0].bounds_in_frame;
        assert!((b.x - 120.0).abs() < 1e-3);
        assert!((b.y - 70.0).abs() < 1e-3);
        assert!((b.width - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_singular_transform_drops_everything() {
        let h = Homography::from_matrix(Matrix3::zeros());
        assert!(RegionProjector::default()
            .project(&[region(1, 100.0, 40.0)], Some(&h), (640, 480))
            .is_empty());
    }

    #[test]
    fn test_extreme_aspect_rejected() {
        let projector = RegionProjector::default();
        let corners = Rect::new(0.0, 0.0, 600.0, 11.0).corners();
        assert!(matches!(
            projector.validate(&corners, (640, 480)),
            Err(RegionRejection::Aspect(_))
        ));
    }
}
