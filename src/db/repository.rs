use std::collections::HashSet;

use alloy::primitives::Address;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::features::extractor::WalletFeatures;
use crate::ingest::types::{Snapshot, Transaction};
use crate::ml::engine::MlOutput;
use crate::risk::engine::{NewAlert, RiskBreakdown};

/// Read a consistent snapshot: every transaction at or below the current
/// head block, optionally restricted to a lookback window. The head is
/// pinned first so rows appended mid-read never leak into the run.
pub async fn load_snapshot(pool: &PgPool, lookback_hours: u64) -> eyre::Result<Snapshot> {
    let taken_at = Utc::now();

    let (head_block,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(block_number) FROM transactions")
            .fetch_one(pool)
            .await?;
    let head_block = head_block.unwrap_or(0);

    type Row = (Vec<u8>, i64, DateTime<Utc>, Vec<u8>, Option<Vec<u8>>, BigDecimal);
    let rows: Vec<Row> = if lookback_hours > 0 {
        sqlx::query_as(
            "SELECT tx_hash, block_number, block_timestamp, from_address, to_address, value
             FROM transactions
             WHERE block_number <= $1
             AND block_timestamp > NOW() - make_interval(secs => $2)
             ORDER BY block_number ASC, id ASC",
        )
        .bind(head_block)
        .bind((lookback_hours * 3600) as f64)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as(
            "SELECT tx_hash, block_number, block_timestamp, from_address, to_address, value
             FROM transactions
             WHERE block_number <= $1
             ORDER BY block_number ASC, id ASC",
        )
        .bind(head_block)
        .fetch_all(pool)
        .await?
    };

    let mut transactions = Vec::with_capacity(rows.len());
    for (tx_hash, block_number, timestamp, from, to, value) in rows {
        let Some(from_address) = parse_address(&from) else {
            tracing::warn!(tx_hash = %hex::encode(&tx_hash), "Skipping row with malformed from_address");
            continue;
        };
        let to_address = match to {
            Some(bytes) => match parse_address(&bytes) {
                Some(a) => Some(a),
                None => {
                    tracing::warn!(tx_hash = %hex::encode(&tx_hash), "Skipping row with malformed to_address");
                    continue;
                }
            },
            None => None,
        };

        transactions.push(Transaction {
            tx_hash,
            block_number,
            timestamp,
            from_address,
            to_address,
            value,
        });
    }

    Ok(Snapshot {
        head_block,
        taken_at,
        transactions,
    })
}

fn parse_address(bytes: &[u8]) -> Option<Address> {
    (bytes.len() == 20).then(|| Address::from_slice(bytes))
}

/// Overwrite wallet profiles with this run's feature rows and ML results.
/// Profiles are recomputed state, not history, so the upsert replaces every
/// column.
pub async fn upsert_wallet_profiles(
    pool: &PgPool,
    rows: &[WalletFeatures],
    ml: Option<&MlOutput>,
) -> eyre::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut count = 0u64;
    for (chunk_start, chunk) in rows.chunks(500).enumerate().map(|(i, c)| (i * 500, c)) {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO wallet_profiles (address, tx_count, total_value_sent, \
             total_value_received, avg_value, unique_counterparties, inflow_outflow_ratio, \
             tx_frequency, burst_score, cluster_label, risk_score, last_active, updated_at) ",
        );

        query_builder.push_values(chunk.iter().enumerate(), |mut b, (offset, row)| {
            let i = chunk_start + offset;
            let cluster = ml
                .map(|m| m.cluster_labels.get(i).copied().unwrap_or(-1))
                .unwrap_or(-1);
            let anomaly = ml
                .map(|m| m.anomaly_scores.get(i).copied().unwrap_or(0.0))
                .unwrap_or(0.0);

            b.push_bind(row.address.as_slice().to_vec())
                .push_bind(row.tx_count)
                .push_bind(row.total_value_sent)
                .push_bind(row.total_value_received)
                .push_bind(row.avg_value)
                .push_bind(row.unique_counterparties)
                .push_bind(row.inflow_outflow_ratio)
                .push_bind(row.tx_frequency)
                .push_bind(row.burst_score)
                .push_bind(cluster)
                .push_bind(anomaly)
                .push_bind(row.last_active)
                .push_bind(Utc::now());
        });

        query_builder.push(
            " ON CONFLICT (address) DO UPDATE SET
              tx_count = EXCLUDED.tx_count,
              total_value_sent = EXCLUDED.total_value_sent,
              total_value_received = EXCLUDED.total_value_received,
              avg_value = EXCLUDED.avg_value,
              unique_counterparties = EXCLUDED.unique_counterparties,
              inflow_outflow_ratio = EXCLUDED.inflow_outflow_ratio,
              tx_frequency = EXCLUDED.tx_frequency,
              burst_score = EXCLUDED.burst_score,
              cluster_label = EXCLUDED.cluster_label,
              risk_score = EXCLUDED.risk_score,
              last_active = EXCLUDED.last_active,
              updated_at = EXCLUDED.updated_at",
        );

        let result = query_builder.build().execute(pool).await?;
        count += result.rows_affected();
    }

    Ok(count)
}

/// Upsert the composite breakdown per wallet.
pub async fn upsert_risk_scores(
    pool: &PgPool,
    breakdowns: &[RiskBreakdown],
) -> eyre::Result<u64> {
    if breakdowns.is_empty() {
        return Ok(0);
    }

    let mut count = 0u64;
    for chunk in breakdowns.chunks(500) {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO risk_scores (wallet_address, composite_score, ml_anomaly_score, \
             graph_score, flash_loan_score, wash_trade_score, severity, explanation, updated_at) ",
        );

        query_builder.push_values(chunk, |mut b, r| {
            b.push_bind(r.wallet.as_slice().to_vec())
                .push_bind(r.composite_score)
                .push_bind(r.ml_anomaly_score)
                .push_bind(r.graph_score)
                .push_bind(r.flash_loan_score)
                .push_bind(r.wash_trade_score)
                .push_bind(r.severity.as_str())
                .push_bind(&r.explanation)
                .push_bind(Utc::now());
        });

        query_builder.push(
            " ON CONFLICT (wallet_address) DO UPDATE SET
              composite_score = EXCLUDED.composite_score,
              ml_anomaly_score = EXCLUDED.ml_anomaly_score,
              graph_score = EXCLUDED.graph_score,
              flash_loan_score = EXCLUDED.flash_loan_score,
              wash_trade_score = EXCLUDED.wash_trade_score,
              severity = EXCLUDED.severity,
              explanation = EXCLUDED.explanation,
              updated_at = EXCLUDED.updated_at",
        );

        let result = query_builder.build().execute(pool).await?;
        count += result.rows_affected();
    }

    Ok(count)
}

/// Append new alerts. The table is append-only; deduplication happened
/// upstream (per run in the engine, across runs via the cooldown lookup).
pub async fn insert_alerts(pool: &PgPool, alerts: &[NewAlert]) -> eyre::Result<u64> {
    if alerts.is_empty() {
        return Ok(0);
    }

    let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
        "INSERT INTO alerts (wallet_address, alert_type, severity, risk_score, explanation) ",
    );

    query_builder.push_values(alerts, |mut b, a| {
        b.push_bind(a.wallet.as_slice().to_vec())
            .push_bind(a.alert_type.as_str())
            .push_bind(a.severity.as_str())
            .push_bind(a.risk_score)
            .push_bind(&a.explanation);
    });

    let result = query_builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Wallets that already got a composite alert within the cooldown window.
pub async fn recent_composite_alerts(
    pool: &PgPool,
    cooldown_secs: u64,
) -> eyre::Result<HashSet<Vec<u8>>> {
    let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
        "SELECT DISTINCT wallet_address FROM alerts
         WHERE alert_type = 'composite'
         AND created_at > NOW() - make_interval(secs => $1)",
    )
    .bind(cooldown_secs as f64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(a,)| a).collect())
}
