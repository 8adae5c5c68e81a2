/// Per-column z-score standardization. Fitted on a feature matrix once per
/// run so that value totals cannot dominate the distance-based models.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    /// Constant columns get std 1.0 so transforming them yields 0, not NaN.
    pub fn fit(matrix: &[Vec<f64>]) -> Self {
        let n_rows = matrix.len();
        let n_cols = matrix.first().map_or(0, |r| r.len());

        let mut means = vec![0.0; n_cols];
        let mut stds = vec![1.0; n_cols];
        if n_rows == 0 {
            return Self { means, stds };
        }

        for row in matrix {
            for (j, &v) in row.iter().enumerate() {
                means[j] += v;
            }
        }
        for m in &mut means {
            *m /= n_rows as f64;
        }

        for (j, std) in stds.iter_mut().enumerate() {
            let variance = matrix
                .iter()
                .map(|row| (row[j] - means[j]).powi(2))
                .sum::<f64>()
                / n_rows as f64;
            let s = variance.sqrt();
            *std = if s > 0.0 { s } else { 1.0 };
        }

        Self { means, stds }
    }

    /// Return a standardized copy. The input matrix is never mutated.
    pub fn transform(&self, matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
        matrix
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, &v)| (v - self.means[j]) / self.stds[j])
                    .collect()
            })
            .collect()
    }
}
