use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::types::*;

// ============================================================
// Health
// ============================================================

pub async fn counts(pool: &PgPool) -> eyre::Result<(i64, i64, i64, i64)> {
    let (head_block,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(block_number) FROM transactions")
            .fetch_one(pool)
            .await?;
    let (total_transactions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await?;
    let (total_wallets,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallet_profiles")
        .fetch_one(pool)
        .await?;
    let (total_alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await?;

    Ok((
        head_block.unwrap_or(0),
        total_transactions,
        total_wallets,
        total_alerts,
    ))
}

// ============================================================
// Wallet profiles
// ============================================================

const PROFILE_SORT_COLUMNS: &[&str] = &["risk_score", "tx_count", "total_value_sent"];

pub async fn list_profiles(
    pool: &PgPool,
    sort_by: &str,
    limit: i64,
) -> eyre::Result<Vec<ProfileEntry>> {
    // Sort column is matched against a whitelist, never interpolated raw.
    if !PROFILE_SORT_COLUMNS.contains(&sort_by) {
        return Err(eyre::eyre!(
            "sort_by must be one of {:?}",
            PROFILE_SORT_COLUMNS
        ));
    }

    type Row = (
        Vec<u8>,
        i64,
        f64,
        f64,
        f64,
        i64,
        f64,
        f64,
        f64,
        i32,
        f64,
        Option<DateTime<Utc>>,
    );
    let rows: Vec<Row> = sqlx::query_as(&format!(
        "SELECT address, tx_count, total_value_sent, total_value_received, avg_value, \
         unique_counterparties, inflow_outflow_ratio, tx_frequency, burst_score, \
         cluster_label, risk_score, last_active
         FROM wallet_profiles
         ORDER BY {} DESC
         LIMIT $1",
        sort_by
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(
                address,
                tx_count,
                total_value_sent,
                total_value_received,
                avg_value,
                unique_counterparties,
                inflow_outflow_ratio,
                tx_frequency,
                burst_score,
                cluster_label,
                risk_score,
                last_active,
            )| ProfileEntry {
                address: bytes_to_hex(&address),
                tx_count,
                total_value_sent,
                total_value_received,
                avg_value,
                unique_counterparties,
                inflow_outflow_ratio,
                tx_frequency,
                burst_score,
                cluster_label,
                risk_score,
                last_active,
            },
        )
        .collect())
}

// ============================================================
// Risk score
// ============================================================

pub async fn get_risk_score(
    pool: &PgPool,
    address: &[u8],
) -> eyre::Result<RiskScoreResponse> {
    let (tx_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM transactions WHERE from_address = $1 OR to_address = $1",
    )
    .bind(address)
    .fetch_one(pool)
    .await?;

    type Row = (f64, f64, f64, f64, f64, String, String);
    let row: Option<Row> = sqlx::query_as(
        "SELECT composite_score, ml_anomaly_score, graph_score, flash_loan_score, \
         wash_trade_score, severity, explanation
         FROM risk_scores WHERE wallet_address = $1",
    )
    .bind(address)
    .fetch_optional(pool)
    .await?;

    let response = match row {
        Some((
            composite_score,
            ml_anomaly_score,
            graph_score,
            flash_loan_score,
            wash_trade_score,
            severity,
            explanation,
        )) => RiskScoreResponse {
            wallet_address: bytes_to_hex(address),
            composite_score,
            ml_anomaly_score,
            graph_score,
            flash_loan_score,
            wash_trade_score,
            severity,
            explanation,
            tx_count,
        },
        None => RiskScoreResponse {
            wallet_address: bytes_to_hex(address),
            composite_score: 0.0,
            ml_anomaly_score: 0.0,
            graph_score: 0.0,
            flash_loan_score: 0.0,
            wash_trade_score: 0.0,
            severity: "low".to_string(),
            explanation: if tx_count == 0 {
                "No transactions found for this wallet.".to_string()
            } else {
                "Not scored yet; trigger a detection run.".to_string()
            },
            tx_count,
        },
    };

    Ok(response)
}

// ============================================================
// Alerts
// ============================================================

pub async fn list_alerts(
    pool: &PgPool,
    alert_type: Option<&str>,
    severity: Option<&str>,
    limit: i64,
) -> eyre::Result<Vec<AlertEntry>> {
    let mut qb: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
        "SELECT id, wallet_address, alert_type, severity, risk_score, explanation, created_at
         FROM alerts WHERE true",
    );

    if let Some(t) = alert_type {
        qb.push(" AND alert_type = ").push_bind(t.to_string());
    }
    if let Some(s) = severity {
        qb.push(" AND severity = ").push_bind(s.to_string());
    }
    qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);

    type Row = (i64, Vec<u8>, String, String, f64, String, DateTime<Utc>);
    let rows: Vec<Row> = qb.build_query_as().fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, wallet_address, alert_type, severity, risk_score, explanation, created_at)| {
                AlertEntry {
                    id,
                    wallet_address: bytes_to_hex(&wallet_address),
                    alert_type,
                    severity,
                    risk_score,
                    explanation,
                    created_at,
                }
            },
        )
        .collect())
}

// ============================================================
// Transactions
// ============================================================

pub async fn recent_transactions(
    pool: &PgPool,
    limit: i64,
) -> eyre::Result<Vec<TransactionEntry>> {
    type Row = (
        Vec<u8>,
        i64,
        Vec<u8>,
        Option<Vec<u8>>,
        BigDecimal,
        DateTime<Utc>,
    );
    let rows: Vec<Row> = sqlx::query_as(
        "SELECT tx_hash, block_number, from_address, to_address, value, block_timestamp
         FROM transactions
         ORDER BY block_number DESC, id DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(tx_hash, block_number, from_address, to_address, value, timestamp)| {
                TransactionEntry {
                    tx_hash: bytes_to_hex(&tx_hash),
                    block_number,
                    from_address: bytes_to_hex(&from_address),
                    to_address: to_address.as_deref().map(bytes_to_hex),
                    value: value.to_f64().unwrap_or(0.0),
                    timestamp,
                }
            },
        )
        .collect())
}
