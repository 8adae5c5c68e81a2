use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

// ============================================================
// Detection Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Seconds between scheduled detection runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Transaction lookback window in hours. 0 means the full retained
    /// history; an explicit choice, not an accident of a missing filter.
    #[serde(default)]
    pub lookback_hours: u64,
    /// Minimum wallet population before the ML models are fitted.
    #[serde(default = "default_min_wallets")]
    pub min_wallets: usize,
    /// Expected anomaly fraction for the isolation forest.
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    /// Seed for every stochastic model. Fixed so reruns on the same
    /// snapshot reproduce identical scores.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Suppress a repeat composite alert for the same wallet within this
    /// many seconds. 0 disables cross-run deduplication.
    #[serde(default)]
    pub alert_cooldown_secs: u64,
    #[serde(default)]
    pub flash_loan: FlashLoanConfig,
    #[serde(default)]
    pub wash_trade: WashTradeConfig,
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub severity: SeverityThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lookback_hours: 0,
            min_wallets: default_min_wallets(),
            contamination: default_contamination(),
            n_trees: default_n_trees(),
            n_clusters: default_n_clusters(),
            seed: default_seed(),
            run_timeout_secs: default_run_timeout_secs(),
            alert_cooldown_secs: 0,
            flash_loan: FlashLoanConfig::default(),
            wash_trade: WashTradeConfig::default(),
            weights: RiskWeights::default(),
            severity: SeverityThresholds::default(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_min_wallets() -> usize {
    5
}

fn default_contamination() -> f64 {
    0.05
}

fn default_n_trees() -> usize {
    150
}

fn default_n_clusters() -> usize {
    5
}

fn default_seed() -> u64 {
    42
}

fn default_run_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlashLoanConfig {
    /// Minimum same-block inflow before a round trip is considered (dust guard).
    #[serde(default = "default_flash_min_value")]
    pub min_value: f64,
    /// Fraction of the inflow that must leave again within the block.
    #[serde(default = "default_repay_ratio")]
    pub repay_ratio: f64,
}

impl Default for FlashLoanConfig {
    fn default() -> Self {
        Self {
            min_value: 1.0,
            repay_ratio: 0.9,
        }
    }
}

fn default_flash_min_value() -> f64 {
    1.0
}

fn default_repay_ratio() -> f64 {
    0.9
}

#[derive(Debug, Deserialize, Clone)]
pub struct WashTradeConfig {
    /// Minimum completed round trips before a bidirectional pair is emitted.
    #[serde(default = "default_min_round_trips")]
    pub min_round_trips: i64,
}

impl Default for WashTradeConfig {
    fn default() -> Self {
        Self { min_round_trips: 1 }
    }
}

fn default_min_round_trips() -> i64 {
    1
}

/// Composite weights. Must sum to 1; ML and graph carry the most weight.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskWeights {
    #[serde(default = "default_w_ml")]
    pub ml_anomaly: f64,
    #[serde(default = "default_w_graph")]
    pub graph: f64,
    #[serde(default = "default_w_flash")]
    pub flash_loan: f64,
    #[serde(default = "default_w_wash")]
    pub wash_trade: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            ml_anomaly: 0.35,
            graph: 0.25,
            flash_loan: 0.20,
            wash_trade: 0.20,
        }
    }
}

fn default_w_ml() -> f64 {
    0.35
}

fn default_w_graph() -> f64 {
    0.25
}

fn default_w_flash() -> f64 {
    0.20
}

fn default_w_wash() -> f64 {
    0.20
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeverityThresholds {
    #[serde(default = "default_sev_medium")]
    pub medium: f64,
    #[serde(default = "default_sev_high")]
    pub high: f64,
    #[serde(default = "default_sev_critical")]
    pub critical: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium: 25.0,
            high: 50.0,
            critical: 75.0,
        }
    }
}

fn default_sev_medium() -> f64 {
    25.0
}

fn default_sev_high() -> f64 {
    50.0
}

fn default_sev_critical() -> f64 {
    75.0
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        let d = &self.detection;

        if d.min_wallets < 2 {
            return Err(eyre::eyre!("detection.min_wallets must be at least 2"));
        }
        if !(d.contamination > 0.0 && d.contamination <= 0.5) {
            return Err(eyre::eyre!(
                "detection.contamination must be in (0, 0.5], got {}",
                d.contamination
            ));
        }
        if d.n_trees == 0 || d.n_clusters == 0 {
            return Err(eyre::eyre!(
                "detection.n_trees and detection.n_clusters must be nonzero"
            ));
        }
        if d.flash_loan.repay_ratio <= 0.0 {
            return Err(eyre::eyre!(
                "detection.flash_loan.repay_ratio must be positive"
            ));
        }
        if d.flash_loan.min_value <= 0.0 {
            return Err(eyre::eyre!(
                "detection.flash_loan.min_value must be positive"
            ));
        }
        if d.wash_trade.min_round_trips < 1 {
            return Err(eyre::eyre!(
                "detection.wash_trade.min_round_trips must be at least 1"
            ));
        }

        let w = &d.weights;
        let sum = w.ml_anomaly + w.graph + w.flash_loan + w.wash_trade;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(eyre::eyre!("detection.weights must sum to 1.0, got {}", sum));
        }
        if [w.ml_anomaly, w.graph, w.flash_loan, w.wash_trade]
            .iter()
            .any(|&x| x < 0.0)
        {
            return Err(eyre::eyre!("detection.weights must be non-negative"));
        }

        let s = &d.severity;
        if !(s.medium < s.high && s.high < s.critical) {
            return Err(eyre::eyre!(
                "detection.severity thresholds must be strictly increasing (medium < high < critical)"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r#"
[database]
url = "postgres://localhost/test"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[database]
url = "postgres://localhost/test"
max_connections = 5

[detection]
interval_secs = 60
contamination = 0.1
seed = 7
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.detection.interval_secs, 60);
        assert_eq!(config.detection.seed, 7);
        assert!((config.detection.contamination - 0.1).abs() < 1e-12);
        assert_eq!(config.detection.n_clusters, 5); // default
        assert_eq!(config.detection.min_wallets, 5); // default
        assert!((config.detection.weights.ml_anomaly - 0.35).abs() < 1e-12); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_weights() {
        let mut config = minimal();
        config.detection.weights.ml_anomaly = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_severity_order() {
        let mut config = minimal();
        config.detection.severity.high = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_contamination_range() {
        let mut config = minimal();
        config.detection.contamination = 0.0;
        assert!(config.validate().is_err());
        config.detection.contamination = 0.6;
        assert!(config.validate().is_err());
    }
}
