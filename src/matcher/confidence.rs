/// Match count at which the count term saturates
pub const MATCH_COUNT_SATURATION: f32 = 12.0;
/// Inlier ratio at which the inlier term saturates
pub const INLIER_RATIO_SATURATION: f32 = 0.4;
/// Inlier ratio below which the score is halved
pub const LOW_INLIER_PENALTY_RATIO: f32 = 0.2;

/// Individual terms, kept for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBreakdown {
    /// `min(matches / 12, 1)`
    pub match_score: f32,
    /// `min(inlier_ratio / 0.4, 1)`
    pub inlier_score: f32,
    /// `max(0, 1 - avg_distance / distance_scale)`
    pub distance_score: f32,
    /// Bonus for strong match sets
    pub base: f32,
    /// Whether the low-inlier penalty applied
    pub penalized: bool,
    /// Final value in [0, 1]
    pub confidence: f32,
}

/// Combine match statistics into a confidence in [0, 1].
///
/// `distance_scale` is the matcher's absolute distance cutoff.
pub fn score(match_count: usize, inlier_ratio: f32, avg_distance: f32, distance_scale: f32) -> ConfidenceBreakdown {
    let inlier_ratio = if inlier_ratio.is_finite() {
        inlier_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let match_score = (match_count as f32 / MATCH_COUNT_SATURATION).clamp(0.0, 1.0);
    let inlier_score = (inlier_ratio / INLIER_RATIO_SATURATION).clamp(0.0, 1.0);
    let distance_score = if distance_scale > 0.0 && avg_distance.is_finite() {
        (1.0 - avg_distance / distance_scale).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let base = if match_count >= 15 && inlier_ratio >= 0.5 {
        0.2
    } else if match_count >= 8 && inlier_ratio >= 0.3 {
        0.1
    } else {
        0.0
    };

    let mut confidence = 0.3 * match_score + 0.5 * inlier_score + 0.2 * distance_score + base;
    let penalized = inlier_ratio < LOW_INLIER_PENALTY_RATIO;
    if penalized {
        confidence *= 0.5;
    }

    ConfidenceBreakdown {
        match_score,
        inlier_score,
        distance_score,
        base,
        penalized,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

/// Confidence value only
pub fn compute_confidence(match_count: usize, inlier_ratio: f32, avg_distance: f32, distance_scale: f32) -> f32 {
    score(match_count, inlier_ratio, avg_distance, distance_scale).confidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_strong_match_clamps_to_one() {
        let s = score(20, 0.6, 100.0, 250.0);
        assert_abs_diff_eq!(s.match_score, 1.0);
        assert_abs_diff_eq!(s.inlier_score, 1.0);
        assert_abs_diff_eq!(s.distance_score, 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(s.base, 0.2);
        assert!(!s.penalized);
        assert_abs_diff_eq!(s.confidence, 1.0);
    }

    #[test]
    fn test_weak_match_is_penalized() {
        let s = score(5, 0.15, 200.0, 250.0);
        assert_abs_diff_eq!(s.match_score, 5.0 / 12.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.inlier_score, 0.375, epsilon = 1e-6);
        assert_abs_diff_eq!(s.distance_score, 0.2, epsilon = 1e-6);
        assert!(s.penalized);
        assert_abs_diff_eq!(s.confidence, 0.17625, epsilon = 1e-4);
        assert!(s.confidence < 0.3);
    }

    #[test]
    fn test_monotone_in_inlier_ratio() {
        for count in [3usize, 8, 15, 30] {
            for dist in [0.0f32, 120.0, 249.0] {
                let mut prev = 0.0f32;
                for step in 0..=100 {
                    let ratio = step as f32 / 100.0;
                    let c = compute_confidence(count, ratio, dist, 250.0);
                    assert!(c + 1e-6 >= prev, "count {count} dist {dist} ratio {ratio}");
                    prev = c;
                }
            }
        }
    }
}
