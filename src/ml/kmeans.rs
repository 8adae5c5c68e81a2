use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_ITER: usize = 100;
const SHIFT_TOL: f64 = 1e-4;

/// Result of one k-means fit: a label per input row plus the final
/// centroids and inertia. Labels are per-run identifiers; the same label
/// does not mean the same behavior across runs.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Lloyd's algorithm with seeded random initialization and `n_init`
/// restarts, keeping the lowest-inertia fit. `k` is reduced to the row
/// count when fewer rows than clusters exist. Ties in assignment go to the
/// lowest centroid index, which keeps runs reproducible.
pub fn fit(data: &[Vec<f64>], k: usize, n_init: usize, seed: u64) -> KMeansFit {
    let n = data.len();
    if n == 0 || k == 0 {
        return KMeansFit {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
        };
    }

    let k = k.min(n);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Option<KMeansFit> = None;
    for _ in 0..n_init.max(1) {
        let fit = lloyd(data, k, &mut rng);
        let better = match &best {
            None => true,
            Some(b) => fit.inertia < b.inertia,
        };
        if better {
            best = Some(fit);
        }
    }

    // k >= 1 and n_init >= 1, so a fit always exists
    best.unwrap_or(KMeansFit {
        labels: vec![0; n],
        centroids: Vec::new(),
        inertia: 0.0,
    })
}

fn lloyd(data: &[Vec<f64>], k: usize, rng: &mut StdRng) -> KMeansFit {
    let n = data.len();
    let dim = data[0].len();

    // Initialize centroids on k distinct rows.
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        pool.swap(i, j);
    }
    let mut centroids: Vec<Vec<f64>> = pool[..k].iter().map(|&i| data[i].clone()).collect();

    let mut labels = vec![0usize; n];

    for _ in 0..MAX_ITER {
        for (i, point) in data.iter().enumerate() {
            labels[i] = nearest(point, &centroids);
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in data.iter().enumerate() {
            counts[labels[i]] += 1;
            for (d, v) in point.iter().enumerate() {
                sums[labels[i]][d] += v;
            }
        }

        let mut max_shift: f64 = 0.0;
        for c in 0..k {
            // An emptied cluster keeps its centroid rather than jumping.
            if counts[c] == 0 {
                continue;
            }
            let mut shift = 0.0;
            for d in 0..dim {
                let new = sums[c][d] / counts[c] as f64;
                shift += (new - centroids[c][d]).powi(2);
                centroids[c][d] = new;
            }
            max_shift = max_shift.max(shift.sqrt());
        }

        if max_shift < SHIFT_TOL {
            break;
        }
    }

    for (i, point) in data.iter().enumerate() {
        labels[i] = nearest(point, &centroids);
    }

    let inertia = data
        .iter()
        .zip(&labels)
        .map(|(p, &l)| squared_distance(p, &centroids[l]))
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<Vec<f64>> {
        let mut data = Vec::new();
        for i in 0..10 {
            data.push(vec![0.0 + (i as f64) * 0.01, 0.0]);
        }
        for i in 0..10 {
            data.push(vec![100.0 + (i as f64) * 0.01, 100.0]);
        }
        data
    }

    #[test]
    fn test_separated_blobs_get_distinct_labels() {
        let data = two_blobs();
        let fit = fit(&data, 2, 10, 42);

        let first = fit.labels[0];
        assert!(fit.labels[..10].iter().all(|&l| l == first));
        let second = fit.labels[10];
        assert!(fit.labels[10..].iter().all(|&l| l == second));
        assert_ne!(first, second);
    }

    #[test]
    fn test_k_reduced_to_row_count() {
        let data = vec![vec![1.0], vec![2.0], vec![3.0]];
        let result = fit(&data, 5, 10, 42);
        assert_eq!(result.centroids.len(), 3);
        assert!(result.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_deterministic_with_fixed_seed() {
        let data = two_blobs();
        let a = fit(&data, 2, 10, 7);
        let b = fit(&data, 2, 10, 7);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_empty_input() {
        let result = fit(&[], 5, 10, 42);
        assert!(result.labels.is_empty());
        assert!(result.centroids.is_empty());
    }

    #[test]
    fn test_labels_within_k() {
        let data = two_blobs();
        let result = fit(&data, 4, 5, 11);
        assert!(result.labels.iter().all(|&l| l < 4));
    }
}
