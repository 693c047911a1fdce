use rayon::prelude::*;

use crate::models::DescriptorMatrix;

/// One descriptor correspondence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    /// Row in the query matrix
    pub query_idx: usize,
    /// Row in the train matrix
    pub train_idx: usize,
    /// Descriptor distance
    pub distance: f32,
}

/// k-nearest-neighbour descriptor matching
pub trait DescriptorMatcher: Send + Sync {
    /// For every query row, up to `k` train rows sorted by ascending distance.
    ///
    /// Returns an empty list when the matrices cannot be compared.
    fn knn_match(
        &self,
        query: &DescriptorMatrix,
        train: &DescriptorMatrix,
        k: usize,
    ) -> Vec<Vec<DescriptorMatch>>;
}

/// Exhaustive matcher: Hamming for binary descriptors, L2 for float ones
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceMatcher;

impl DescriptorMatcher for BruteForceMatcher {
    fn knn_match(
        &self,
        query: &DescriptorMatrix,
        train: &DescriptorMatrix,
        k: usize,
    ) -> Vec<Vec<DescriptorMatch>> {
        if k == 0 || query.is_empty() || train.is_empty() || !query.is_compatible(train) {
            return Vec::new();
        }

        (0..query.rows())
            .into_par_iter()
            .map(|q| {
                let mut best: Vec<DescriptorMatch> = Vec::with_capacity(k + 1);
                for t in 0..train.rows() {
                    let Some(distance) = query.distance(q, train, t) else {
                        continue;
                    };
                    if best.len() == k && best[k - 1].distance <= distance {
                        continue;
                    }
                    let m = DescriptorMatch {
                        query_idx: q,
                        train_idx: t,
                        distance,
                    };
                    // Insertion keeps the list sorted; equal distances keep the earlier train row
                    let pos = best.partition_point(|b| b.distance <= distance);
                    best.insert(pos, m);
                    best.truncate(k);
                }
                best
            })
            .collect()
    }
}

/// Lowe's ratio test plus an absolute distance cutoff.
///
/// A query with fewer than two neighbours fails the ratio test.
pub fn filter_good_matches(
    knn: &[Vec<DescriptorMatch>],
    ratio: f32,
    max_distance: f32,
) -> Vec<DescriptorMatch> {
    knn.iter()
        .filter_map(|neighbours| match neighbours.as_slice() {
            [best, second, ..] if best.distance < ratio * second.distance && best.distance < max_distance => {
                Some(*best)
            }
            _ => None,
        })
        .collect()
}
