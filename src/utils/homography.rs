//! Planar homography estimation and application.
//!
//! Provides:
//! - Exact 4-point solve (perspective transform between two quads).
//! - Normalized DLT from ≥4 correspondences.
//! - Seeded RANSAC wrapper returning an inlier mask.

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::models::Point;

/// Errors raised by homography estimation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomographyError {
    /// Fewer correspondences than the model needs
    #[error("too few points: need {needed}, got {got}")]
    TooFewPoints {
        /// Required correspondences
        needed: usize,
        /// Supplied correspondences
        got: usize,
    },
    /// Singular system or non-finite result
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
    /// RANSAC never reached the inlier floor
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers {
        /// Inlier floor
        needed: usize,
        /// Best consensus size
        found: usize,
    },
}

/// 3x3 projective transform, normalized so `h[(2, 2)] == 1` when possible
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Wrap a raw matrix
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Underlying matrix
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Inverse transform, `None` when the matrix is singular
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.matrix.try_inverse()?;
        if !inv.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self::from_matrix(normalize_scale(inv)))
    }

    /// Project a 2D point: H * [x, y, 1]^T → [u, v].
    /// Points mapped to infinity come back as NaN.
    pub fn project(&self, x: f64, y: f64) -> [f64; 2] {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        if p[2].abs() < 1e-15 {
            return [f64::NAN, f64::NAN];
        }
        [p[0] / p[2], p[1] / p[2]]
    }

    /// Project a `Point`
    pub fn transform(&self, p: &Point) -> Point {
        let [x, y] = self.project(p.x as f64, p.y as f64);
        Point::new(x as f32, y as f32)
    }

    /// Reprojection error: ||project(H, src) - dst||
    pub fn reprojection_error(&self, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
        let p = self.project(src[0], src[1]);
        let dx = p[0] - dst[0];
        let dy = p[1] - dst[1];
        (dx * dx + dy * dy).sqrt()
    }

    /// Create transform from 4 source points to 4 destination points
    pub fn from_quad_points(src: &[Point; 4], dst: &[Point; 4]) -> Option<Self> {
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for i in 0..4 {
            let (sx, sy) = (src[i].x as f64, src[i].y as f64);
            let (dx, dy) = (dst[i].x as f64, dst[i].y as f64);

            let row = i * 2;
            a[row] = [sx, sy, 1.0, 0.0, 0.0, 0.0, -dx * sx, -dx * sy];
            b[row] = dx;

            a[row + 1] = [0.0, 0.0, 0.0, sx, sy, 1.0, -dy * sx, -dy * sy];
            b[row + 1] = dy;
        }

        // Solve using Gaussian elimination
        solve_linear_system(&a, &b).map(|s| {
            Self::from_matrix(Matrix3::new(
                s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7], 1.0,
            ))
        })
    }
}

fn normalize_scale(h: Matrix3<f64>) -> Matrix3<f64> {
    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 { h } else { h / scale }
}

/// Solve 8x8 linear system using Gaussian elimination
#[allow(clippy::needless_range_loop)]
fn solve_linear_system(a: &[[f64; 8]; 8], b: &[f64; 8]) -> Option<[f64; 8]> {
    let mut a = *a;
    let mut b = *b;
    let n = 8;

    // Forward elimination
    for i in 0..n {
        // Find pivot
        let mut max_val = a[i][i].abs();
        let mut max_row = i;

        for k in (i + 1)..n {
            if a[k][i].abs() > max_val {
                max_val = a[k][i].abs();
                max_row = k;
            }
        }

        // Check for singular matrix
        if max_val < 1e-12 {
            return None;
        }

        if max_row != i {
            a.swap(i, max_row);
            b.swap(i, max_row);
        }

        for k in (i + 1)..n {
            let factor = a[k][i] / a[i][i];
            b[k] -= factor * b[i];

            for j in i..n {
                a[k][j] -= factor * a[i][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

// ── Hartley normalization ────────────────────────────────────────────────

/// Translate centroid to origin, scale so mean distance from origin is sqrt(2)
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();

    (t, normalized)
}

/// Estimate the homography H with dst ≈ project(H, src) from ≥4 correspondences
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Homography, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() < 4 {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }
    if src.len() != dst.len() {
        return Err(HomographyError::NumericalFailure(
            "src and dst must have the same length".into(),
        ));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    // Build 2n × 9 matrix A
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of A^T A with the smallest eigenvalue
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    let mut min_idx = 0;
    let mut min_val = eig.eigenvalues[0].abs();
    for i in 1..9 {
        let v = eig.eigenvalues[i].abs();
        if v < min_val {
            min_val = v;
            min_idx = i;
        }
    }
    let h = |j: usize| eig.eigenvectors[(j, min_idx)];
    let h_norm = Matrix3::new(h(0), h(1), h(2), h(3), h(4), h(5), h(6), h(7), h(8));

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let result = normalize_scale(t_dst_inv * h_norm * t_src);

    if !result.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::NumericalFailure(
            "non-finite homography".into(),
        ));
    }
    Ok(Homography::from_matrix(result))
}

// ── RANSAC ───────────────────────────────────────────────────────────────

/// RANSAC configuration for homography fitting
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Maximum number of RANSAC iterations
    pub max_iters: usize,
    /// Inlier threshold (reprojection error in pixels)
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model
    pub min_inliers: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 7.0,
            min_inliers: 4,
            seed: 0,
        }
    }
}

/// Result of RANSAC homography fitting
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// The fitted homography
    pub homography: Homography,
    /// True for inliers, aligned with the input correspondences
    pub inlier_mask: Vec<bool>,
    /// Number of inliers
    pub n_inliers: usize,
}

impl RansacResult {
    /// Fraction of correspondences that are inliers
    pub fn inlier_ratio(&self) -> f64 {
        if self.inlier_mask.is_empty() {
            0.0
        } else {
            self.n_inliers as f64 / self.inlier_mask.len() as f64
        }
    }
}

fn collinear(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> bool {
    let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
    cross.abs() < 1e-6
}

fn is_degenerate_sample(pts: &[[f64; 2]; 4]) -> bool {
    collinear(&pts[0], &pts[1], &pts[2])
        || collinear(&pts[0], &pts[1], &pts[3])
        || collinear(&pts[0], &pts[2], &pts[3])
        || collinear(&pts[1], &pts[2], &pts[3])
}

/// Fit homography with RANSAC
///
/// `src`: source points (frame keypoints).
/// `dst`: destination points (template keypoints).
pub fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacResult, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }

    use rand::Rng;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut best_inliers = 0usize;
    let mut best_mask: Vec<bool> = vec![false; n];
    let mut best_h: Option<Homography> = None;

    for _ in 0..config.max_iters {
        // Sample 4 distinct indices
        let mut indices = [0usize; 4];
        let mut attempts = 0;
        loop {
            for idx in &mut indices {
                *idx = rng.gen_range(0..n);
            }
            let distinct = (0..4).all(|i| ((i + 1)..4).all(|j| indices[i] != indices[j]));
            if distinct {
                break;
            }
            attempts += 1;
            if attempts > 100 {
                break;
            }
        }

        let s4 = indices.map(|i| src[i]);
        let d4 = indices.map(|i| dst[i]);
        if is_degenerate_sample(&s4) || is_degenerate_sample(&d4) {
            continue;
        }

        let h = match estimate_homography_dlt(&s4, &d4) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let mut count = 0usize;
        let mut mask = vec![false; n];
        for i in 0..n {
            if h.reprojection_error(&src[i], &dst[i]) < config.inlier_threshold {
                mask[i] = true;
                count += 1;
            }
        }

        if count > best_inliers {
            best_inliers = count;
            best_mask = mask;
            best_h = Some(h);

            // Early exit if >90% inliers
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    let Some(best_h) = best_h else {
        return Err(HomographyError::NumericalFailure(
            "no non-degenerate sample".into(),
        ));
    };
    if best_inliers < config.min_inliers.max(4) {
        return Err(HomographyError::InsufficientInliers {
            needed: config.min_inliers.max(4),
            found: best_inliers,
        });
    }

    // Refit using all inliers
    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let refit = estimate_homography_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

    let mut final_mask = vec![false; n];
    let mut final_inliers = 0usize;
    for i in 0..n {
        if refit.reprojection_error(&src[i], &dst[i]) < config.inlier_threshold {
            final_mask[i] = true;
            final_inliers += 1;
        }
    }

    // Keep whichever model explains more correspondences
    let (homography, inlier_mask, n_inliers) = if final_inliers >= best_inliers {
        (refit, final_mask, final_inliers)
    } else {
        (best_h, best_mask, best_inliers)
    };

    Ok(RansacResult {
        homography,
        inlier_mask,
        n_inliers,
    })
}
