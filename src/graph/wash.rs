use alloy::primitives::Address;

use super::builder::TxGraph;

/// A wallet pair exchanging near-equal value in both directions.
/// `wallet_a` is always the lower address, so each pair is reported once.
#[derive(Debug, Clone)]
pub struct WashTradePair {
    pub wallet_a: Address,
    pub wallet_b: Address,
    pub value_a_to_b: f64,
    pub value_b_to_a: f64,
    pub tx_count_a_to_b: i64,
    pub tx_count_b_to_a: i64,
    /// Completed round trips: the lesser of the two directional counts.
    pub round_trips: i64,
    /// 1 − |a→b − b→a| / max(a→b, b→a), in [0,1]. 1.0 means exactly
    /// mirrored nonzero flow.
    pub value_similarity: f64,
    /// 0–100, grows with similarity and with traffic on the pair.
    pub suspicion_score: f64,
}

/// Scan every bidirectionally-connected pair in the graph and score it.
///
/// Every candidate with at least `min_round_trips` completed round trips is
/// emitted; trimming the list down to "interesting" pairs is left to the
/// API consumer. Output is sorted by suspicion score descending, then by
/// address for a stable order.
pub fn detect(graph: &TxGraph, min_round_trips: i64) -> Vec<WashTradePair> {
    let mut pairs = Vec::new();

    for (a, b) in graph.bidirectional_pairs() {
        let (Some(ab), Some(ba)) = (graph.edge(a, b), graph.edge(b, a)) else {
            continue;
        };

        let max_val = ab.value.max(ba.value);
        if max_val <= 0.0 {
            continue;
        }

        let round_trips = ab.count.min(ba.count);
        if round_trips < min_round_trips {
            continue;
        }

        let value_similarity = 1.0 - (ab.value - ba.value).abs() / max_val;
        let traffic = (ab.count + ba.count).min(10) as f64;
        let suspicion_score = (value_similarity * 50.0 + traffic * 5.0).clamp(0.0, 100.0);

        pairs.push(WashTradePair {
            wallet_a: a,
            wallet_b: b,
            value_a_to_b: ab.value,
            value_b_to_a: ba.value,
            tx_count_a_to_b: ab.count,
            tx_count_b_to_a: ba.count,
            round_trips,
            value_similarity,
            suspicion_score,
        });
    }

    pairs.sort_by(|x, y| {
        y.suspicion_score
            .partial_cmp(&x.suspicion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (x.wallet_a, x.wallet_b).cmp(&(y.wallet_a, y.wallet_b)))
    });

    if !pairs.is_empty() {
        tracing::debug!(pairs = pairs.len(), "Wash-trade candidates detected");
    }

    pairs
}

/// Highest suspicion score involving the given wallet, 0 when none.
pub fn wallet_score(pairs: &[WashTradePair], address: Address) -> f64 {
    pairs
        .iter()
        .filter(|p| p.wallet_a == address || p.wallet_b == address)
        .map(|p| p.suspicion_score)
        .fold(0.0, f64::max)
}
