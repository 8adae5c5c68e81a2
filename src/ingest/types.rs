use alloy::primitives::Address;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};

/// A native-currency value transfer, as delivered by the ingestion service.
/// Rows are append-only and never mutated; everything downstream is derived
/// from them.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub tx_hash: Vec<u8>,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub from_address: Address,
    /// None for contract-creation transactions.
    pub to_address: Option<Address>,
    pub value: BigDecimal,
}

impl Transaction {
    /// Value as f64 for the numeric engines. Amounts far beyond f64 range
    /// collapse to 0 rather than poisoning the feature matrix.
    pub fn value_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }
}

/// A consistent, bounded read of the transaction table taken at the start of
/// a detection run. Ingestion keeps appending while a run is in flight; the
/// run only ever sees blocks at or below `head_block`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub head_block: i64,
    pub taken_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_f64_conversion() {
        let tx = Transaction {
            tx_hash: vec![0xab; 32],
            block_number: 100,
            timestamp: Utc::now(),
            from_address: Address::repeat_byte(0x01),
            to_address: Some(Address::repeat_byte(0x02)),
            value: BigDecimal::try_from(1.5).unwrap(),
        };
        assert!((tx.value_f64() - 1.5).abs() < 1e-12);
    }
}
