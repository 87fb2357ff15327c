//! Brute-force Hamming descriptor matching

use super::{DescriptorMatcher, DescriptorSet, KnnPair, DESCRIPTOR_BYTES};

/// Exhaustive k-NN matcher over binary descriptors with Hamming distance.
/// Adequate for the feature budgets this pipeline runs with (hundreds of
/// descriptors per side).
pub struct HammingMatcher;

impl DescriptorMatcher for HammingMatcher {
    fn knn_match(
        &self,
        query: &DescriptorSet,
        train: &DescriptorSet,
        k: usize,
    ) -> Vec<Vec<KnnPair>> {
        if k == 0 || query.is_empty() || train.is_empty() {
            return vec![Vec::new(); query.len()];
        }

        query
            .descriptors
            .iter()
            .enumerate()
            .map(|(qi, qd)| {
                let mut best: Vec<KnnPair> = Vec::with_capacity(k + 1);
                for (ti, td) in train.descriptors.iter().enumerate() {
                    let d = hamming(qd, td);
                    let pos = best.partition_point(|p| p.distance <= d);
                    if pos < k {
                        best.insert(
                            pos,
                            KnnPair {
                                query: qi,
                                train: ti,
                                distance: d,
                            },
                        );
                        best.truncate(k);
                    }
                }
                best
            })
            .collect()
    }
}

fn hamming(a: &[u8; DESCRIPTOR_BYTES], b: &[u8; DESCRIPTOR_BYTES]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}
