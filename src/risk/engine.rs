use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use serde::Serialize;

use crate::config::{DetectionConfig, RiskWeights, SeverityThresholds};
use crate::features::extractor::WalletFeatures;
use crate::flashloan::detector::{self as flashloan, FlashLoanEvent};
use crate::graph::wash::{self, WashTradePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Threshold table is inclusive at each boundary: a composite of
    /// exactly 25.0 is medium, 24.999 is low.
    pub fn from_score(score: f64, thresholds: &SeverityThresholds) -> Self {
        if score >= thresholds.critical {
            Self::Critical
        } else if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MlAnomaly,
    Graph,
    FlashLoan,
    WashTrade,
    Composite,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MlAnomaly => "ml_anomaly",
            Self::Graph => "graph",
            Self::FlashLoan => "flash_loan",
            Self::WashTrade => "wash_trade",
            Self::Composite => "composite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ml_anomaly" => Some(Self::MlAnomaly),
            "graph" => Some(Self::Graph),
            "flash_loan" => Some(Self::FlashLoan),
            "wash_trade" => Some(Self::WashTrade),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

/// Per-signal outputs collected for one run. `None` means that signal
/// engine failed this run; its weight is redistributed over the survivors
/// so a single broken signal degrades scoring instead of disabling it.
#[derive(Debug, Default)]
pub struct SignalOutputs {
    /// ML anomaly score (0–100) per wallet.
    pub ml_anomaly: Option<HashMap<Address, f64>>,
    /// Graph suspicion score (0–100) per wallet.
    pub graph: Option<HashMap<Address, f64>>,
    pub flash_loans: Option<Vec<FlashLoanEvent>>,
    pub wash_trades: Option<Vec<WashTradePair>>,
}

impl SignalOutputs {
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.ml_anomaly.is_none() {
            out.push("ml_anomaly");
        }
        if self.graph.is_none() {
            out.push("graph");
        }
        if self.flash_loans.is_none() {
            out.push("flash_loan");
        }
        if self.wash_trades.is_none() {
            out.push("wash_trade");
        }
        out
    }
}

/// Composite risk for one wallet with the full component breakdown.
#[derive(Debug, Clone)]
pub struct RiskBreakdown {
    pub wallet: Address,
    pub composite_score: f64,
    pub ml_anomaly_score: f64,
    pub graph_score: f64,
    pub flash_loan_score: f64,
    pub wash_trade_score: f64,
    pub severity: Severity,
    pub explanation: String,
}

/// An alert ready for insertion. Append-only once written.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub wallet: Address,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub risk_score: f64,
    pub explanation: String,
}

/// Fuses the four signal streams into one composite score per wallet and
/// decides which wallets deserve an alert.
pub struct RiskEngine {
    weights: RiskWeights,
    severity: SeverityThresholds,
}

impl RiskEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            severity: config.severity.clone(),
        }
    }

    /// Score every profiled wallet. Each component is clamped to [0,100]
    /// before weighting and the result is clamped again, so the composite
    /// always lands in [0,100].
    pub fn score_wallets(
        &self,
        wallets: &[WalletFeatures],
        signals: &SignalOutputs,
    ) -> Vec<RiskBreakdown> {
        let missing = signals.missing();
        wallets
            .iter()
            .map(|w| self.score_wallet(w.address, signals, &missing))
            .collect()
    }

    fn score_wallet(
        &self,
        wallet: Address,
        signals: &SignalOutputs,
        missing: &[&'static str],
    ) -> RiskBreakdown {
        let ml = signals
            .ml_anomaly
            .as_ref()
            .map(|m| m.get(&wallet).copied().unwrap_or(0.0));
        let graph = signals
            .graph
            .as_ref()
            .map(|m| m.get(&wallet).copied().unwrap_or(0.0));
        let flash = signals
            .flash_loans
            .as_ref()
            .map(|events| flashloan::wallet_score(events, wallet));
        let wash = signals
            .wash_trades
            .as_ref()
            .map(|pairs| wash::wallet_score(pairs, wallet));

        let ml_score = clamp(ml.unwrap_or(0.0));
        let graph_score = clamp(graph.unwrap_or(0.0));
        let flash_score = clamp(flash.flatten().map(|(s, _)| s).unwrap_or(0.0));
        let wash_score = clamp(wash.unwrap_or(0.0));
        let flash_block = flash.flatten().map(|(_, b)| b);

        // (weight, clamped score, available) per signal, in weight order
        let components = [
            (self.weights.ml_anomaly, ml_score, ml.is_some()),
            (self.weights.graph, graph_score, graph.is_some()),
            (self.weights.flash_loan, flash_score, flash.is_some()),
            (self.weights.wash_trade, wash_score, wash.is_some()),
        ];

        let available_weight: f64 = components
            .iter()
            .filter(|(_, _, ok)| *ok)
            .map(|(w, _, _)| w)
            .sum();

        let composite = if available_weight > 0.0 {
            let weighted: f64 = components
                .iter()
                .filter(|(_, _, ok)| *ok)
                .map(|(w, s, _)| w * s)
                .sum();
            clamp(weighted / available_weight)
        } else {
            0.0
        };

        let explanation = self.explain(
            composite,
            ml_score,
            graph_score,
            flash_score,
            wash_score,
            flash_block,
            missing,
        );

        RiskBreakdown {
            wallet,
            composite_score: composite,
            ml_anomaly_score: ml_score,
            graph_score,
            flash_loan_score: flash_score,
            wash_trade_score: wash_score,
            severity: Severity::from_score(composite, &self.severity),
            explanation,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn explain(
        &self,
        composite: f64,
        ml: f64,
        graph: f64,
        flash: f64,
        wash: f64,
        flash_block: Option<i64>,
        missing: &[&'static str],
    ) -> String {
        let flash_phrase = match flash_block {
            Some(block) => format!("flash-loan pattern in block {} ({:.0}/100)", block, flash),
            None => format!("flash-loan-like activity ({:.0}/100)", flash),
        };

        // (weighted contribution, mention floor, phrase)
        let candidates = [
            (
                self.weights.ml_anomaly * ml,
                ml > 50.0,
                format!("high ML anomaly score ({:.0}/100)", ml),
            ),
            (
                self.weights.graph * graph,
                graph > 30.0,
                format!("suspicious graph connectivity ({:.0}/100)", graph),
            ),
            (self.weights.flash_loan * flash, flash > 50.0, flash_phrase),
            (
                self.weights.wash_trade * wash,
                wash > 40.0,
                format!("possible wash-trading behaviour ({:.0}/100)", wash),
            ),
        ];

        let mut notable: Vec<(f64, String)> = candidates
            .iter()
            .filter(|(_, mention, _)| *mention)
            .map(|(c, _, p)| (*c, p.clone()))
            .collect();

        // An alerting score with no component over its floor still has to
        // name its dominant signal.
        if notable.is_empty() && composite > 0.0 {
            if let Some((c, _, p)) = candidates
                .iter()
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            {
                notable.push((*c, p.clone()));
            }
        }

        notable.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut text = if notable.is_empty() {
            "No significant risk factors detected.".to_string()
        } else {
            let phrases: Vec<String> = notable.into_iter().map(|(_, p)| p).collect();
            format!("Flagged primarily due to {}.", phrases.join("; "))
        };

        if !missing.is_empty() {
            text.push_str(&format!(
                " Partial result: {} signal(s) unavailable this run.",
                missing.join(", ")
            ));
        }

        text
    }

    /// One composite alert per wallet at or above the medium threshold.
    /// The wallet set is deduplicated here so multiple sub-signals can
    /// never produce a second alert within the same run.
    pub fn build_alerts(&self, breakdowns: &[RiskBreakdown]) -> Vec<NewAlert> {
        let mut seen: HashSet<Address> = HashSet::new();
        let mut alerts = Vec::new();

        for b in breakdowns {
            if b.composite_score < self.severity.medium {
                continue;
            }
            if !seen.insert(b.wallet) {
                continue;
            }
            alerts.push(NewAlert {
                wallet: b.wallet,
                alert_type: AlertType::Composite,
                severity: b.severity,
                risk_score: b.composite_score,
                explanation: b.explanation.clone(),
            });
        }

        alerts
    }
}

fn clamp(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
