use crate::config::DetectionConfig;
use crate::features::extractor::WalletFeatures;

use super::forest::IsolationForest;
use super::kmeans;
use super::scaler::StandardScaler;

const KMEANS_RESTARTS: usize = 10;

/// Per-wallet output of one ML pass, index-aligned with the input rows.
#[derive(Debug, Clone)]
pub struct MlOutput {
    /// 0–100, higher = more anomalous. Min-max normalized over the current
    /// wallet population, so scores are relative to the batch: adding or
    /// removing wallets can shift everyone else's score between runs.
    pub anomaly_scores: Vec<f64>,
    /// Whether the wallet falls in the top `contamination` fraction.
    pub is_anomaly: Vec<bool>,
    /// 0..k-1, or -1 when no model was fitted. Labels are not comparable
    /// across runs.
    pub cluster_labels: Vec<i32>,
    /// False when the population was below `min_wallets` and every score
    /// fell back to neutral.
    pub fitted: bool,
}

/// Fits the anomaly and clustering models on a wallet feature table.
/// Both models are rebuilt from the explicit seed on every call; no fitted
/// state is shared between detection runs.
pub struct MlEngine {
    min_wallets: usize,
    contamination: f64,
    n_trees: usize,
    n_clusters: usize,
    seed: u64,
}

impl MlEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_wallets: config.min_wallets,
            contamination: config.contamination,
            n_trees: config.n_trees,
            n_clusters: config.n_clusters,
            seed: config.seed,
        }
    }

    pub fn run(&self, rows: &[WalletFeatures]) -> MlOutput {
        let n = rows.len();
        if n < self.min_wallets {
            tracing::debug!(
                wallets = n,
                min = self.min_wallets,
                "Too few wallets to fit ML models, returning neutral scores"
            );
            return MlOutput {
                anomaly_scores: vec![0.0; n],
                is_anomaly: vec![false; n],
                cluster_labels: vec![-1; n],
                fitted: false,
            };
        }

        let matrix: Vec<Vec<f64>> = rows.iter().map(|r| r.vector().to_vec()).collect();
        let scaler = StandardScaler::fit(&matrix);
        let scaled = scaler.transform(&matrix);

        let forest = IsolationForest::fit(&scaled, self.n_trees, self.seed);
        let raw = forest.score_all(&scaled);
        let anomaly_scores = normalize_batch(&raw);
        let is_anomaly = flag_top_fraction(&raw, self.contamination);

        // Separate rng stream so adding forest trees never reshuffles clusters.
        let clusters = kmeans::fit(
            &scaled,
            self.n_clusters,
            KMEANS_RESTARTS,
            self.seed.wrapping_add(1),
        );
        let cluster_labels = clusters.labels.iter().map(|&l| l as i32).collect();

        tracing::debug!(
            wallets = n,
            clusters = clusters.centroids.len(),
            "ML models fitted"
        );

        MlOutput {
            anomaly_scores,
            is_anomaly,
            cluster_labels,
            fitted: true,
        }
    }
}

/// Min-max map of raw forest statistics onto 0–100. A degenerate batch
/// where every wallet scores identically maps to all zeros.
fn normalize_batch(raw: &[f64]) -> Vec<f64> {
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = if max > min { max - min } else { 1.0 };
    raw.iter()
        .map(|&s| (((s - min) / range) * 100.0).clamp(0.0, 100.0))
        .collect()
}

/// Flag the top `contamination` fraction by raw score (at least one wallet).
fn flag_top_fraction(raw: &[f64], contamination: f64) -> Vec<bool> {
    let n = raw.len();
    let k = ((contamination * n as f64).ceil() as usize).clamp(1, n);

    let mut sorted = raw.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = sorted[k - 1];

    raw.iter().map(|&s| s >= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use chrono::Utc;

    fn engine(min_wallets: usize) -> MlEngine {
        let mut config = DetectionConfig::default();
        config.min_wallets = min_wallets;
        config.n_trees = 100;
        MlEngine::new(&config)
    }

    fn row(i: u8, tx_count: i64, sent: f64, received: f64, counterparties: i64) -> WalletFeatures {
        let avg = if tx_count > 0 {
            (sent + received) / tx_count as f64
        } else {
            0.0
        };
        WalletFeatures {
            address: Address::repeat_byte(i),
            tx_count,
            total_value_sent: sent,
            total_value_received: received,
            avg_value: avg,
            unique_counterparties: counterparties,
            inflow_outflow_ratio: if received > 0.0 { sent / received } else { 0.0 },
            tx_frequency: tx_count as f64 / 24.0,
            burst_score: 0.5,
            last_active: Utc::now(),
        }
    }

    /// 48 mundane wallets plus 2 extreme outliers.
    fn population() -> Vec<WalletFeatures> {
        let mut rows: Vec<WalletFeatures> = (0..48)
            .map(|i| {
                row(
                    i as u8,
                    5 + (i % 7) as i64,
                    10.0 + (i % 5) as f64,
                    8.0 + (i % 3) as f64,
                    2 + (i % 4) as i64,
                )
            })
            .collect();
        rows.push(row(200, 5000, 900_000.0, 880_000.0, 400));
        rows.push(row(201, 8000, 1_500_000.0, 20.0, 900));
        rows
    }

    #[test]
    fn test_insufficient_wallets_neutral_scores() {
        let rows = vec![row(1, 3, 5.0, 5.0, 1), row(2, 4, 6.0, 6.0, 2)];
        let out = engine(5).run(&rows);
        assert!(!out.fitted);
        assert!(out.anomaly_scores.iter().all(|&s| s == 0.0));
        assert!(out.cluster_labels.iter().all(|&l| l == -1));
        assert!(out.is_anomaly.iter().all(|&a| !a));
    }

    #[test]
    fn test_outliers_score_in_top_decile() {
        let rows = population();
        let out = engine(5).run(&rows);
        assert!(out.fitted);

        let mut sorted = out.anomaly_scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        // top decile of a 50-wallet batch = top 5 scores
        let decile_floor = sorted[4];

        let outlier_a = out.anomaly_scores[48];
        let outlier_b = out.anomaly_scores[49];
        assert!(
            outlier_a >= decile_floor && outlier_b >= decile_floor,
            "outliers scored {outlier_a} / {outlier_b}, decile floor {decile_floor}"
        );
    }

    #[test]
    fn test_scores_bounded_and_deterministic() {
        let rows = population();
        let a = engine(5).run(&rows);
        let b = engine(5).run(&rows);

        assert!(a
            .anomaly_scores
            .iter()
            .all(|&s| (0.0..=100.0).contains(&s)));
        assert_eq!(a.anomaly_scores, b.anomaly_scores);
        assert_eq!(a.cluster_labels, b.cluster_labels);
        assert_eq!(a.is_anomaly, b.is_anomaly);
    }

    #[test]
    fn test_cluster_labels_within_k() {
        let rows = population();
        let out = engine(5).run(&rows);
        assert!(out.cluster_labels.iter().all(|&l| (0..5).contains(&l)));
    }

    #[test]
    fn test_anomaly_flags_match_contamination() {
        let rows = population();
        let out = engine(5).run(&rows);
        let flagged = out.is_anomaly.iter().filter(|&&a| a).count();
        // ceil(0.05 * 50) = 3, ties may add a few more but never the majority
        assert!(flagged >= 3 && flagged < 25, "flagged {flagged}");
    }

    #[test]
    fn test_flag_top_fraction_at_least_one() {
        let flags = flag_top_fraction(&[0.1, 0.9, 0.2], 0.01);
        assert_eq!(flags.iter().filter(|&&f| f).count(), 1);
        assert!(flags[1]);
    }

    #[test]
    fn test_normalize_degenerate_batch() {
        let scores = normalize_batch(&[0.5, 0.5, 0.5]);
        assert!(scores.iter().all(|&s| s == 0.0));
    }
}
