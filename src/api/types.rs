use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::runner::{RunPhase, RunSummary};

// ============================================================
// Hex conversion helpers
// ============================================================

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, String> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(stripped).map_err(|e| format!("Invalid hex address: {}", e))
}

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize)]
pub struct ProfileParams {
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionParams {
    pub limit: Option<i64>,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub head_block: i64,
    pub total_transactions: i64,
    pub total_wallets: i64,
    pub total_alerts: i64,
    pub run_phase: RunPhase,
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Serialize)]
pub struct ProfilesResponse {
    pub count: usize,
    pub profiles: Vec<ProfileEntry>,
}

#[derive(Debug, Serialize)]
pub struct ProfileEntry {
    pub address: String,
    pub tx_count: i64,
    pub total_value_sent: f64,
    pub total_value_received: f64,
    pub avg_value: f64,
    pub unique_counterparties: i64,
    pub inflow_outflow_ratio: f64,
    pub tx_frequency: f64,
    pub burst_score: f64,
    pub cluster_label: i32,
    pub risk_score: f64,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RiskScoreResponse {
    pub wallet_address: String,
    pub composite_score: f64,
    pub ml_anomaly_score: f64,
    pub graph_score: f64,
    pub flash_loan_score: f64,
    pub wash_trade_score: f64,
    pub severity: String,
    pub explanation: String,
    pub tx_count: i64,
}

#[derive(Debug, Serialize)]
pub struct GraphDataResponse {
    pub nodes: Vec<GraphNodeEntry>,
    pub links: Vec<GraphLinkEntry>,
}

#[derive(Debug, Serialize)]
pub struct GraphNodeEntry {
    pub id: String,
    pub centrality: f64,
    pub degree: usize,
}

#[derive(Debug, Serialize)]
pub struct GraphLinkEntry {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct FlashLoansResponse {
    pub count: usize,
    pub events: Vec<FlashLoanEntry>,
}

#[derive(Debug, Serialize)]
pub struct FlashLoanEntry {
    pub wallet: String,
    pub block_number: i64,
    pub inflow: f64,
    pub outflow: f64,
    pub flash_loan_score: f64,
    pub explanation: String,
}

#[derive(Debug, Serialize)]
pub struct WashTradesResponse {
    pub count: usize,
    pub pairs: Vec<WashTradeEntry>,
}

#[derive(Debug, Serialize)]
pub struct WashTradeEntry {
    pub wallet_a: String,
    pub wallet_b: String,
    pub value_a_to_b: f64,
    pub value_b_to_a: f64,
    pub tx_count_a_to_b: i64,
    pub tx_count_b_to_a: i64,
    pub round_trips: i64,
    pub value_similarity: f64,
    pub suspicion_score: f64,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<AlertEntry>,
}

#[derive(Debug, Serialize)]
pub struct AlertEntry {
    pub id: i64,
    pub wallet_address: String,
    pub alert_type: String,
    pub severity: String,
    pub risk_score: f64,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub count: usize,
    pub transactions: Vec<TransactionEntry>,
}

#[derive(Debug, Serialize)]
pub struct TransactionEntry {
    pub tx_hash: String,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RunDetectionResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let hex = bytes_to_hex(&bytes);
        assert_eq!(hex, "0xdeadbeef");
        assert_eq!(hex_to_bytes(&hex).unwrap(), bytes);
        assert_eq!(hex_to_bytes("deadbeef").unwrap(), bytes);
        assert!(hex_to_bytes("0xzz").is_err());
    }
}
