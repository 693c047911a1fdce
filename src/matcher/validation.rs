use std::fmt;

use crate::config::GeometryLimits;
use crate::models::Quad;

/// Why a projected template outline was judged implausible
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryRejection {
    /// Some corner is NaN or infinite
    NonFinite,
    /// Outline area as a fraction of the frame is out of range
    Area(f32),
    /// Relative deviation from the template's aspect ratio
    Aspect(f32),
    /// Outline is not convex
    NotConvex,
    /// An interior angle, degrees
    Angle(f32),
    /// Longest over shortest side
    SideRatio(f32),
}

impl fmt::Display for GeometryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite => write!(f, "non-finite corners"),
            Self::Area(frac) => write!(f, "area fraction {:.3} out of range", frac),
            Self::Aspect(dev) => write!(f, "aspect deviation {:.2}", dev),
            Self::NotConvex => write!(f, "outline not convex"),
            Self::Angle(a) => write!(f, "interior angle {:.1}°", a),
            Self::SideRatio(r) => write!(f, "side ratio {:.2}", r),
        }
    }
}

/// Check the template outline mapped into the frame
pub fn validate_template_quad(
    quad: &Quad,
    frame_width: u32,
    frame_height: u32,
    template_aspect: f32,
    limits: &GeometryLimits,
) -> Result<(), GeometryRejection> {
    if !quad.corners().iter().all(|p| p.is_finite()) {
        return Err(GeometryRejection::NonFinite);
    }

    let frame_area = frame_width as f32 * frame_height as f32;
    let fraction = if frame_area > 0.0 {
        quad.area() / frame_area
    } else {
        0.0
    };
    if fraction < limits.min_area_fraction || fraction > limits.max_area_fraction {
        return Err(GeometryRejection::Area(fraction));
    }

    if template_aspect > 0.0 {
        let deviation = (quad.aspect_ratio() - template_aspect).abs() / template_aspect;
        if !deviation.is_finite() || deviation > limits.max_aspect_deviation {
            return Err(GeometryRejection::Aspect(deviation));
        }
    }

    if !quad.is_convex() {
        return Err(GeometryRejection::NotConvex);
    }

    if let Some(&a) = quad
        .interior_angles()
        .iter()
        .find(|&&a| a < limits.min_angle || a > limits.max_angle)
    {
        return Err(GeometryRejection::Angle(a));
    }

    let sides = quad.side_lengths();
    let longest = sides.iter().copied().fold(0.0f32, f32::max);
    let shortest = sides.iter().copied().fold(f32::INFINITY, f32::min);
    let ratio = if shortest > 0.0 {
        longest / shortest
    } else {
        f32::INFINITY
    };
    if ratio > limits.max_side_ratio {
        return Err(GeometryRejection::SideRatio(ratio));
    }
    Ok(())
}
