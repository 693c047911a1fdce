//! Mask post-processing and polygon extraction shared by the detector stages.

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::{edges, filter, morphology};

use crate::models::{Point, ProbabilityMap};
use crate::utils::binarization::binarize_map;
use crate::utils::geometry;

/// Contour together with its simplified polygon
#[derive(Debug, Clone)]
pub struct PolygonCandidate {
    /// Raw border pixels
    pub contour: Vec<Point>,
    /// Douglas-Peucker approximation
    pub polygon: Vec<Point>,
    /// Area of `polygon`
    pub area: f32,
}

impl PolygonCandidate {
    /// Polygon as a quad if it has exactly four vertices
    pub fn as_quad(&self) -> Option<[Point; 4]> {
        self.polygon.as_slice().try_into().ok()
    }
}

/// Binarize at `threshold`, then close and open with a disc of `radius`
pub fn refine_mask(map: &ProbabilityMap, threshold: f32, radius: u8) -> GrayImage {
    let mask = binarize_map(map, threshold);
    if radius == 0 {
        return mask;
    }
    let closed = morphology::close(&mask, Norm::L2, radius);
    morphology::open(&closed, Norm::L2, radius)
}

/// Blur, Canny, and thicken edges by one pixel so small corner gaps close
pub fn edge_map(mask: &GrayImage, sigma: f32, low: f32, high: f32) -> GrayImage {
    let blurred = if sigma > 0.0 {
        filter::gaussian_blur_f32(mask, sigma)
    } else {
        mask.clone()
    };
    let edges = edges::canny(&blurred, low, high);
    morphology::dilate(&edges, Norm::LInf, 1)
}

/// Outer borders of every foreground component
pub fn outer_contours(binary: &GrayImage) -> Vec<Vec<Point>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|c| {
            c.points
                .iter()
                .map(|p| Point::new(p.x as f32, p.y as f32))
                .collect()
        })
        .collect()
}

/// Simplify every contour and return the one whose polygon encloses the most area
pub fn largest_polygon(contours: &[Vec<Point>], epsilon_fraction: f32) -> Option<PolygonCandidate> {
    contours
        .iter()
        .map(|contour| {
            let epsilon = epsilon_fraction * geometry::perimeter(contour);
            let polygon = geometry::approx_poly_dp(contour, epsilon);
            let area = geometry::polygon_area(&polygon);
            PolygonCandidate {
                contour: contour.clone(),
                polygon,
                area,
            }
        })
        .fold(None, |best: Option<PolygonCandidate>, cand| match best {
            Some(b) if b.area >= cand.area => Some(b),
            _ => Some(cand),
        })
}

/// Largest exactly-four-vertex polygon among the contours
pub fn largest_quad(contours: &[Vec<Point>], epsilon_fraction: f32) -> Option<([Point; 4], f32)> {
    contours
        .iter()
        .filter_map(|contour| {
            let epsilon = epsilon_fraction * geometry::perimeter(contour);
            let polygon = geometry::approx_poly_dp(contour, epsilon);
            let quad: [Point; 4] = polygon.as_slice().try_into().ok()?;
            Some((quad, geometry::polygon_area(&quad)))
        })
        .fold(None, |best: Option<([Point; 4], f32)>, cand| match best {
            Some(b) if b.1 >= cand.1 => Some(b),
            _ => Some(cand),
        })
}

/// Mean map value over the cells whose centres fall inside `polygon`
pub fn mean_probability_inside(map: &ProbabilityMap, polygon: &[Point]) -> f32 {
    let bounds = geometry::bounds_from_corners(polygon);
    let x0 = bounds.x.floor().max(0.0) as usize;
    let y0 = bounds.y.floor().max(0.0) as usize;
    let x1 = (bounds.right().ceil().max(0.0) as usize).min(map.width().saturating_sub(1));
    let y1 = (bounds.bottom().ceil().max(0.0) as usize).min(map.height().saturating_sub(1));

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if geometry::point_in_polygon(&Point::new(x as f32, y as f32), polygon) {
                sum += map.get(x, y) as f64;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_map() -> ProbabilityMap {
        let mut map = ProbabilityMap::new(100, 80);
        for y in 20..60 {
            for x in 20..80 {
                map.set(x, y, 0.9);
            }
        }
        map
    }

    #[test]
    fn test_refine_removes_speckle() {
        let mut map = rect_map();
        map.set(5, 5, 1.0);
        let mask = refine_mask(&map, 0.5, 2);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
        assert_eq!(mask.get_pixel(50, 40)[0], 255);
    }

    #[test]
    fn test_mask_contour_is_a_quad() {
        let mask = refine_mask(&rect_map(), 0.5, 2);
        let contours = outer_contours(&mask);
        let (mut quad, area) = largest_quad(&contours, 0.02).unwrap();
        assert!(area > 2000.0 && area < 2500.0, "area {}", area);
        geometry::sort_by_centroid_angle(&mut quad);
        assert!(!geometry::is_self_intersecting(&quad));
    }

    #[test]
    fn test_mean_probability_inside() {
        let map = rect_map();
        let inner = [
            Point::new(25.0, 25.0),
            Point::new(75.0, 25.0),
            Point::new(75.0, 55.0),
            Point::new(25.0, 55.0),
        ];
        assert!((mean_probability_inside(&map, &inner) - 0.9).abs() < 1e-4);
    }
}
