use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

/// Isolation forest over standardized feature vectors.
///
/// Anomalous points sit in sparse regions and need fewer random splits to
/// isolate, so their expected path length across the ensemble is short. The
/// forest is rebuilt from scratch every detection run with an explicit seed;
/// no fitted state survives between runs.
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

#[derive(Debug)]
enum Node {
    Internal {
        feature: usize,
        split: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationForest {
    /// Fit `n_trees` isolation trees on sub-samples of up to 256 points.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, seed: u64) -> Self {
        let n = data.len();
        let sample_size = n.min(256).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees)
            .map(|_| {
                let indices = sample_without_replacement(&mut rng, n, sample_size);
                build_tree(data, &indices, 0, height_limit, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Anomaly statistic s(x) = 2^(−E[path]/c(ψ)) ∈ (0, 1], higher = more
    /// anomalous. Comparable only within the batch the forest was fit on.
    pub fn score(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| path_length(t, point, 0)).sum();
        let avg = total / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size);
        if norm <= 0.0 {
            return 0.0;
        }
        2f64.powf(-avg / norm)
    }

    pub fn score_all(&self, data: &[Vec<f64>]) -> Vec<f64> {
        data.iter().map(|p| self.score(p)).collect()
    }
}

/// Draw `k` distinct indices from 0..n via partial Fisher-Yates.
fn sample_without_replacement(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..k.min(n) {
        let j = rng.gen_range(i..n);
        pool.swap(i, j);
    }
    pool.truncate(k.min(n));
    pool
}

fn build_tree(
    data: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let n_features = data[indices[0]].len();

    // Only features that still vary within this partition can split it.
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for &i in indices.iter() {
                let v = data[i][f];
                lo = lo.min(v);
                hi = hi.max(v);
            }
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let split = rng.gen_range(lo..hi);

    let mut left_idx: Vec<usize> = Vec::new();
    let mut right_idx: Vec<usize> = Vec::new();
    for &i in indices.iter() {
        if data[i][feature] < split {
            left_idx.push(i);
        } else {
            right_idx.push(i);
        }
    }

    Node::Internal {
        feature,
        split,
        left: Box::new(build_tree(data, &left_idx, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(data, &right_idx, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &Node, point: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Internal {
            feature,
            split,
            left,
            right,
        } => {
            if point[*feature] < *split {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search among `n` points,
/// the standard isolation-forest normalizer c(n).
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let nf = n as f64;
            let harmonic = (nf - 1.0).ln() + EULER_MASCHERONI;
            2.0 * harmonic - 2.0 * (nf - 1.0) / nf
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tight cluster around the origin plus one far-away point.
    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![(i % 5) as f64 * 0.1, (i % 7) as f64 * 0.1])
            .collect();
        data.push(vec![50.0, 50.0]);
        data
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 42);
        let scores = forest.score_all(&data);

        let outlier_score = scores[scores.len() - 1];
        let max_inlier = scores[..scores.len() - 1]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        assert!(
            outlier_score > max_inlier,
            "outlier {outlier_score} should exceed inliers (max {max_inlier})"
        );
    }

    #[test]
    fn test_deterministic_with_fixed_seed() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 50, 42).score_all(&data);
        let b = IsolationForest::fit(&data, 50, 42).score_all(&data);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 50, 1);
        for s in forest.score_all(&data) {
            assert!(s > 0.0 && s <= 1.0, "score out of range: {s}");
        }
    }

    #[test]
    fn test_identical_points_do_not_panic() {
        let data = vec![vec![1.0, 1.0]; 10];
        let forest = IsolationForest::fit(&data, 20, 3);
        let scores = forest.score_all(&data);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_average_path_length_monotone() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }
}
