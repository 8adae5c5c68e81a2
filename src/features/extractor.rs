use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::ingest::types::Transaction;

pub const FEATURE_DIM: usize = 8;

/// Behavioral profile of one wallet over the analysis window. The `vector`
/// projection of these fields is what the ML models consume; the full struct
/// is what gets upserted as the wallet profile.
#[derive(Debug, Clone)]
pub struct WalletFeatures {
    pub address: Address,
    pub tx_count: i64,
    pub total_value_sent: f64,
    pub total_value_received: f64,
    pub avg_value: f64,
    pub unique_counterparties: i64,
    /// Sent over received. 0 when the wallet never received anything.
    pub inflow_outflow_ratio: f64,
    /// Transactions per hour over the wallet's active span.
    pub tx_frequency: f64,
    /// Coefficient of variation of inter-transaction gaps. Higher means the
    /// wallet's activity comes in bot-like bursts.
    pub burst_score: f64,
    pub last_active: DateTime<Utc>,
}

impl WalletFeatures {
    /// Fixed-order feature vector. Order is part of the model contract.
    pub fn vector(&self) -> [f64; FEATURE_DIM] {
        [
            self.tx_count as f64,
            self.total_value_sent,
            self.total_value_received,
            self.avg_value,
            self.unique_counterparties as f64,
            self.inflow_outflow_ratio,
            self.tx_frequency,
            self.burst_score,
        ]
    }
}

#[derive(Default)]
struct WalletAccum {
    sent: Vec<f64>,
    received: Vec<f64>,
    counterparties: HashSet<Address>,
    timestamps: Vec<DateTime<Utc>>,
}

/// Build per-wallet feature rows from a transaction snapshot.
///
/// A transaction always contributes to its sender and, when a receiver
/// exists, to the receiver as well. Wallets with zero transactions never
/// appear. Output is sorted by address so the feature matrix is stable
/// across identical snapshots.
pub fn extract(transactions: &[Transaction]) -> Vec<WalletFeatures> {
    let mut wallets: HashMap<Address, WalletAccum> = HashMap::new();

    for tx in transactions {
        let value = tx.value_f64();

        let sender = wallets.entry(tx.from_address).or_default();
        sender.sent.push(value);
        sender.timestamps.push(tx.timestamp);
        if let Some(receiver) = tx.to_address {
            sender.counterparties.insert(receiver);
        }

        if let Some(receiver_addr) = tx.to_address {
            let receiver = wallets.entry(receiver_addr).or_default();
            receiver.received.push(value);
            receiver.timestamps.push(tx.timestamp);
            receiver.counterparties.insert(tx.from_address);
        }
    }

    let mut rows: Vec<WalletFeatures> = wallets
        .into_iter()
        .map(|(address, accum)| build_row(address, accum))
        .collect();

    rows.sort_by_key(|r| r.address);
    rows
}

fn build_row(address: Address, accum: WalletAccum) -> WalletFeatures {
    let total_sent: f64 = accum.sent.iter().sum();
    let total_received: f64 = accum.received.iter().sum();
    let tx_count = (accum.sent.len() + accum.received.len()) as i64;

    let avg_value = if tx_count > 0 {
        (total_sent + total_received) / tx_count as f64
    } else {
        0.0
    };

    let inflow_outflow_ratio = if total_received > 0.0 {
        total_sent / total_received
    } else {
        0.0
    };

    let mut timestamps = accum.timestamps;
    timestamps.sort_unstable();
    let last_active = timestamps.last().copied().unwrap_or_else(Utc::now);

    let tx_frequency = if timestamps.len() >= 2 {
        let span_secs = (timestamps[timestamps.len() - 1] - timestamps[0])
            .num_milliseconds() as f64
            / 1000.0;
        let span_hours = (span_secs / 3600.0).max(0.01);
        tx_count as f64 / span_hours
    } else {
        0.0
    };

    WalletFeatures {
        address,
        tx_count,
        total_value_sent: total_sent,
        total_value_received: total_received,
        avg_value,
        unique_counterparties: accum.counterparties.len() as i64,
        inflow_outflow_ratio,
        tx_frequency,
        burst_score: burst_score(&timestamps),
        last_active,
    }
}

/// Coefficient of variation (population std / mean) of the gaps between
/// consecutive transactions. Needs at least two gaps; a zero mean gap
/// (everything in the same instant) scores 0.
fn burst_score(sorted_timestamps: &[DateTime<Utc>]) -> f64 {
    if sorted_timestamps.len() < 3 {
        return 0.0;
    }

    let gaps: Vec<f64> = sorted_timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
        .collect();

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }

    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn tx(from: u8, to: Option<u8>, value: u64, block: i64, secs: i64) -> Transaction {
        Transaction {
            tx_hash: vec![from, to.unwrap_or(0), value as u8, block as u8, secs as u8],
            block_number: block,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            from_address: addr(from),
            to_address: to.map(addr),
            value: BigDecimal::from(value),
        }
    }

    #[test]
    fn test_empty_snapshot_yields_no_rows() {
        assert!(extract(&[]).is_empty());
    }

    #[test]
    fn test_basic_aggregation() {
        let txs = vec![tx(1, Some(2), 10, 100, 0), tx(1, Some(3), 30, 101, 3600)];
        let rows = extract(&txs);
        assert_eq!(rows.len(), 3);

        let w1 = rows.iter().find(|r| r.address == addr(1)).unwrap();
        assert_eq!(w1.tx_count, 2);
        assert!((w1.total_value_sent - 40.0).abs() < 1e-9);
        assert!((w1.total_value_received).abs() < 1e-9);
        assert_eq!(w1.unique_counterparties, 2);
        // avg over all touching transactions
        assert!((w1.avg_value - 20.0).abs() < 1e-9);
        // never received: ratio falls back to 0, not a division error
        assert!((w1.inflow_outflow_ratio).abs() < 1e-9);

        let w2 = rows.iter().find(|r| r.address == addr(2)).unwrap();
        assert_eq!(w2.tx_count, 1);
        assert!((w2.total_value_received - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_contract_creation_has_no_receiver_row() {
        let rows = extract(&[tx(1, None, 5, 100, 0)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, addr(1));
        assert_eq!(rows[0].unique_counterparties, 0);
    }

    #[test]
    fn test_inflow_outflow_ratio() {
        let txs = vec![tx(1, Some(2), 50, 100, 0), tx(2, Some(1), 25, 101, 60)];
        let rows = extract(&txs);
        let w1 = rows.iter().find(|r| r.address == addr(1)).unwrap();
        // sent 50, received 25
        assert!((w1.inflow_outflow_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tx_frequency_over_active_span() {
        // 3 txs over exactly 2 hours
        let txs = vec![
            tx(1, Some(2), 1, 100, 0),
            tx(1, Some(2), 1, 200, 3600),
            tx(1, Some(2), 1, 300, 7200),
        ];
        let rows = extract(&txs);
        let w1 = rows.iter().find(|r| r.address == addr(1)).unwrap();
        assert!((w1.tx_frequency - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_tx_frequency_is_zero() {
        let rows = extract(&[tx(1, Some(2), 1, 100, 0)]);
        let w1 = rows.iter().find(|r| r.address == addr(1)).unwrap();
        assert!((w1.tx_frequency).abs() < 1e-9);
        assert!((w1.burst_score).abs() < 1e-9);
    }

    #[test]
    fn test_burst_score_regular_vs_bursty() {
        // perfectly regular cadence: CV = 0
        let regular = vec![
            tx(1, Some(2), 1, 100, 0),
            tx(1, Some(2), 1, 101, 600),
            tx(1, Some(2), 1, 102, 1200),
            tx(1, Some(2), 1, 103, 1800),
        ];
        // clustered burst then a long quiet gap
        let bursty = vec![
            tx(3, Some(2), 1, 100, 0),
            tx(3, Some(2), 1, 100, 1),
            tx(3, Some(2), 1, 100, 2),
            tx(3, Some(2), 1, 200, 86_400),
        ];
        let r = extract(&regular);
        let b = extract(&bursty);
        let score_r = r.iter().find(|x| x.address == addr(1)).unwrap().burst_score;
        let score_b = b.iter().find(|x| x.address == addr(3)).unwrap().burst_score;
        assert!(score_r < 1e-9);
        assert!(score_b > 1.0, "bursty wallet should score high, got {score_b}");
    }

    #[test]
    fn test_rows_sorted_by_address() {
        let txs = vec![tx(9, Some(1), 1, 100, 0), tx(5, Some(3), 1, 101, 10)];
        let rows = extract(&txs);
        let addrs: Vec<Address> = rows.iter().map(|r| r.address).collect();
        let mut sorted = addrs.clone();
        sorted.sort();
        assert_eq!(addrs, sorted);
    }
}
