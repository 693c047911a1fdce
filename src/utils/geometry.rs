//! Pure polygon and quadrilateral math
//!
//! Everything here works on `Point` slices in whatever coordinate space the
//! caller uses; nothing holds state.

use crate::models::{Point, Rect};

/// Calculate distance between two points
pub fn distance(p1: &Point, p2: &Point) -> f32 {
    let dx = p1.x - p2.x;
    let dy = p1.y - p2.y;
    (dx * dx + dy * dy).sqrt()
}

/// Calculate angle in radians between three points (p1-p2-p3)
pub fn angle(p1: &Point, p2: &Point, p3: &Point) -> f32 {
    let v1 = Point::new(p1.x - p2.x, p1.y - p2.y);
    let v2 = Point::new(p3.x - p2.x, p3.y - p2.y);

    let dot = v1.x * v2.x + v1.y * v2.y;
    let cross = v1.x * v2.y - v1.y * v2.x;

    cross.atan2(dot).abs()
}

/// Arithmetic mean of the points
pub fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::default();
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Sort points by polar angle around their centroid.
///
/// In image coordinates (y grows downward) an axis-aligned quad comes out as
/// `[topLeft, topRight, bottomRight, bottomLeft]`.
pub fn sort_by_centroid_angle(points: &mut [Point]) {
    let c = centroid(points);
    points.sort_by(|a, b| {
        let aa = (a.y - c.y).atan2(a.x - c.x);
        let ab = (b.y - c.y).atan2(b.x - c.x);
        aa.total_cmp(&ab)
    });
}

/// Shoelace area. Positive for `[TL, TR, BR, BL]` ordering in image coordinates.
pub fn signed_area(poly: &[Point]) -> f32 {
    let n = poly.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        sum += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    (sum * 0.5) as f32
}

/// Unsigned polygon area
pub fn polygon_area(poly: &[Point]) -> f32 {
    signed_area(poly).abs()
}

/// Closed polygon perimeter
pub fn perimeter(poly: &[Point]) -> f32 {
    let n = poly.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| poly[i].distance(&poly[(i + 1) % n])).sum()
}

/// Tests if the polygon turns consistently in one direction.
/// Collinear vertices are tolerated.
pub fn is_convex(poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut orientation = 0u8;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = a.to(&b).cross(&b.to(&c));
        if cross > 1e-6 {
            orientation |= 1;
        } else if cross < -1e-6 {
            orientation |= 2;
        }
        if orientation == 3 {
            return false;
        }
    }
    orientation != 0
}

/// Interior angle at every vertex, in degrees
pub fn interior_angles(poly: &[Point]) -> Vec<f32> {
    let n = poly.len();
    (0..n)
        .map(|i| {
            let prev = poly[(i + n - 1) % n];
            let cur = poly[i];
            let next = poly[(i + 1) % n];
            angle(&prev, &cur, &next).to_degrees()
        })
        .collect()
}

/// Intersection of the infinite lines through (p1, p2) and (p3, p4)
pub fn line_intersection(p1: &Point, p2: &Point, p3: &Point, p4: &Point) -> Option<Point> {
    let d1 = p1.to(p2);
    let d2 = p3.to(p4);
    let denom = d1.cross(&d2);
    if denom.abs() < 1e-6 {
        return None;
    }
    let t = p1.to(p3).cross(&d2) / denom;
    let p = Point::new(p1.x + t * d1.x, p1.y + t * d1.y);
    p.is_finite().then_some(p)
}

fn segments_cross(a1: &Point, a2: &Point, b1: &Point, b2: &Point) -> bool {
    let d1 = a1.to(a2).cross(&a1.to(b1));
    let d2 = a1.to(a2).cross(&a1.to(b2));
    let d3 = b1.to(b2).cross(&b1.to(a1));
    let d4 = b1.to(b2).cross(&b1.to(a2));
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// True when two non-adjacent edges of the quad cross each other
pub fn is_self_intersecting(quad: &[Point; 4]) -> bool {
    segments_cross(&quad[0], &quad[1], &quad[2], &quad[3])
        || segments_cross(&quad[1], &quad[2], &quad[3], &quad[0])
}

/// Axis-aligned bounds of a corner set
pub fn bounds_from_corners(points: &[Point]) -> Rect {
    if points.is_empty() {
        return Rect::default();
    }
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
}

/// Ray-casting point-in-polygon test
pub fn point_in_polygon(p: &Point, poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = poly[i];
        let b = poly[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Move every point away from the centroid by `ratio` of its offset
pub fn expand_from_centroid(points: &[Point], ratio: f32) -> Vec<Point> {
    let c = centroid(points);
    points
        .iter()
        .map(|p| Point::new(c.x + (p.x - c.x) * (1.0 + ratio), c.y + (p.y - c.y) * (1.0 + ratio)))
        .collect()
}

/// Clamp points into `[0, width - 1] x [0, height - 1]`
pub fn clamp_points(points: &mut [Point], width: f32, height: f32) {
    let max_x = (width - 1.0).max(0.0);
    let max_y = (height - 1.0).max(0.0);
    for p in points {
        p.x = p.x.clamp(0.0, max_x);
        p.y = p.y.clamp(0.0, max_y);
    }
}

fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f32 {
    let ab = a.to(b);
    let len = (ab.x * ab.x + ab.y * ab.y).sqrt();
    if len < 1e-6 {
        return p.distance(a);
    }
    ab.cross(&a.to(p)).abs() / len
}

/// Douglas-Peucker simplification of an open chain, endpoints kept
fn simplify_chain(chain: &[Point], epsilon: f32) -> Vec<Point> {
    let n = chain.len();
    if n < 3 {
        return chain.to_vec();
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;
    let mut stack = vec![(0usize, n - 1)];

    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_dist = 0.0f32;
        let mut max_idx = start;
        for i in (start + 1)..end {
            let d = perpendicular_distance(&chain[i], &chain[start], &chain[end]);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }
        if max_dist > epsilon {
            keep[max_idx] = true;
            stack.push((start, max_idx));
            stack.push((max_idx, end));
        }
    }

    chain
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Douglas-Peucker approximation of a closed contour.
///
/// The contour is split at its first point and the point farthest from it;
/// vertices left on a straight run by the arbitrary split are pruned afterwards.
pub fn approx_poly_dp(contour: &[Point], epsilon: f32) -> Vec<Point> {
    let n = contour.len();
    if n < 3 {
        return contour.to_vec();
    }

    let far = (1..n)
        .max_by(|&a, &b| {
            contour[0]
                .distance_squared(&contour[a])
                .total_cmp(&contour[0].distance_squared(&contour[b]))
        })
        .unwrap_or(n / 2);

    let first = simplify_chain(&contour[..=far], epsilon);
    let mut wrap: Vec<Point> = contour[far..].to_vec();
    wrap.push(contour[0]);
    let second = simplify_chain(&wrap, epsilon);

    let mut poly: Vec<Point> = first[..first.len() - 1].to_vec();
    poly.extend_from_slice(&second[..second.len() - 1]);

    // Drop vertices that sit on the line through their neighbours
    let mut changed = true;
    while changed && poly.len() > 3 {
        changed = false;
        let m = poly.len();
        for i in 0..m {
            let prev = poly[(i + m - 1) % m];
            let next = poly[(i + 1) % m];
            if perpendicular_distance(&poly[i], &prev, &next) <= epsilon {
                poly.remove(i);
                changed = true;
                break;
            }
        }
    }

    poly
}

/// Andrew's monotone chain convex hull, counter-clockwise in y-up terms
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts: Vec<Point> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2
            && lower[lower.len() - 2].to(&lower[lower.len() - 1]).cross(&lower[lower.len() - 1].to(p)) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2
            && upper[upper.len() - 2].to(&upper[upper.len() - 1]).cross(&upper[upper.len() - 1].to(p)) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Minimum-area enclosing rectangle via edge-aligned calipers on the hull
pub fn min_area_rect(points: &[Point]) -> Option<[Point; 4]> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(f32, [Point; 4])> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let edge = a.to(&b);
        let len = (edge.x * edge.x + edge.y * edge.y).sqrt();
        if len < 1e-6 {
            continue;
        }
        let u = Point::new(edge.x / len, edge.y / len);
        let v = Point::new(-u.y, u.x);

        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f32::INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::NEG_INFINITY);
        for p in &hull {
            let d = a.to(p);
            let pu = d.dot(&u);
            let pv = d.dot(&v);
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if best.as_ref().is_none_or(|(best_area, _)| area < *best_area) {
            let corner = |su: f32, sv: f32| Point::new(a.x + u.x * su + v.x * sv, a.y + u.y * su + v.y * sv);
            best = Some((
                area,
                [
                    corner(min_u, min_v),
                    corner(max_u, min_v),
                    corner(max_u, max_v),
                    corner(min_u, max_v),
                ],
            ));
        }
    }

    best.map(|(_, rect)| rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f32, y: f32, s: f32) -> Vec<Point> {
        vec![
            Point::new(x, y),
            Point::new(x + s, y),
            Point::new(x + s, y + s),
            Point::new(x, y + s),
        ]
    }

    #[test]
    fn test_distance() {
        let p1 = Point::new(0.0, 0.0);
        let p2 = Point::new(3.0, 4.0);
        assert!((distance(&p1, &p2) - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_angle() {
        let p1 = Point::new(0.0, 0.0);
        let p2 = Point::new(1.0, 0.0);
        let p3 = Point::new(1.0, 1.0);

        let a = angle(&p1, &p2, &p3);
        assert!((a - std::f32::consts::PI / 2.0).abs() < 0.001);
    }

    #[test]
    fn test_sort_by_centroid_angle_orders_tl_tr_br_bl() {
        let mut pts = vec![
            Point::new(100.0, 80.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 80.0),
            Point::new(100.0, 10.0),
        ];
        sort_by_centroid_angle(&mut pts);
        assert_eq!(pts, square_rect(10.0, 10.0, 100.0, 80.0));

        // Idempotent
        let before = pts.clone();
        sort_by_centroid_angle(&mut pts);
        assert_eq!(pts, before);
    }

    fn square_rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn test_area_and_convexity() {
        let sq = square(0.0, 0.0, 10.0);
        assert!((signed_area(&sq) - 100.0).abs() < 1e-4);
        assert!(is_convex(&sq));

        let concave = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 3.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!is_convex(&concave));
    }

    #[test]
    fn test_self_intersection() {
        let bowtie = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        assert!(is_self_intersecting(&bowtie));
        let sq = square(0.0, 0.0, 10.0);
        assert!(!is_self_intersecting(&[sq[0], sq[1], sq[2], sq[3]]));
    }

    #[test]
    fn test_interior_angles_of_square() {
        for a in interior_angles(&square(5.0, 5.0, 20.0)) {
            assert!((a - 90.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_line_intersection() {
        let p = line_intersection(
            &Point::new(0.0, 0.0),
            &Point::new(10.0, 0.0),
            &Point::new(5.0, -5.0),
            &Point::new(5.0, 5.0),
        )
        .unwrap();
        assert!((p.x - 5.0).abs() < 1e-5 && p.y.abs() < 1e-5);

        let parallel = line_intersection(
            &Point::new(0.0, 0.0),
            &Point::new(1.0, 0.0),
            &Point::new(0.0, 1.0),
            &Point::new(1.0, 1.0),
        );
        assert!(parallel.is_none());
    }

    #[test]
    fn test_approx_poly_dp() {
        // Square with extra points on its edges
        let contour = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 1.0),
            Point::new(10.0, 10.0),
            Point::new(9.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(0.0, 9.0),
        ];
        let poly = approx_poly_dp(&contour, 2.0);
        assert_eq!(poly.len(), 4);
    }

    #[test]
    fn test_approx_poly_dp_prunes_mid_edge_start() {
        let mut contour = Vec::new();
        for x in 5..=10 {
            contour.push(Point::new(x as f32, 0.0));
        }
        for y in 1..=10 {
            contour.push(Point::new(10.0, y as f32));
        }
        for x in (0..10).rev() {
            contour.push(Point::new(x as f32, 10.0));
        }
        for y in (0..10).rev() {
            contour.push(Point::new(0.0, y as f32));
        }
        for x in 1..5 {
            contour.push(Point::new(x as f32, 0.0));
        }
        let poly = approx_poly_dp(&contour, 1.0);
        assert_eq!(poly.len(), 4);
    }

    #[test]
    fn test_min_area_rect_of_rotated_square() {
        let c = Point::new(50.0, 50.0);
        let pts: Vec<Point> = (0..4)
            .map(|i| {
                let a = std::f32::consts::FRAC_PI_4 + i as f32 * std::f32::consts::FRAC_PI_2;
                Point::new(c.x + 20.0 * a.cos(), c.y + 20.0 * a.sin())
            })
            .collect();
        let rect = min_area_rect(&pts).unwrap();
        let area = polygon_area(&rect);
        assert!((area - 800.0).abs() < 1.0, "area {}", area);
    }

    #[test]
    fn test_point_in_polygon_and_bounds() {
        let sq = square(0.0, 0.0, 10.0);
        assert!(point_in_polygon(&Point::new(5.0, 5.0), &sq));
        assert!(!point_in_polygon(&Point::new(15.0, 5.0), &sq));
        let b = bounds_from_corners(&sq);
        assert_eq!(b, Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_expand_and_clamp() {
        let mut pts = expand_from_centroid(&square(0.0, 0.0, 10.0), 0.1);
        assert!((pts[0].x + 0.5).abs() < 1e-5);
        clamp_points(&mut pts, 10.0, 10.0);
        assert_eq!(pts[0], Point::new(0.0, 0.0));
        assert_eq!(pts[2], Point::new(9.0, 9.0));
    }
}
