use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use crate::risk::engine::{AlertType, Severity};
use crate::risk::runner::RunOutcome;

use super::queries;
use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn parse_address(hex: &str) -> Result<Vec<u8>, (StatusCode, Json<ErrorResponse>)> {
    let bytes = hex_to_bytes(hex).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    if bytes.len() != 20 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Address must be 20 bytes",
        ));
    }
    Ok(bytes)
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let (head_block, total_transactions, total_wallets, total_alerts) =
        queries::counts(&state.pool)
            .await
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        head_block,
        total_transactions,
        total_wallets,
        total_alerts,
        run_phase: state.runner.phase().await,
        last_run: state.runner.last_summary().await,
    }))
}

// ============================================================
// Wallet profiles
// ============================================================

pub async fn wallet_profiles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProfileParams>,
) -> ApiResult<ProfilesResponse> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let sort_by = params.sort_by.as_deref().unwrap_or("risk_score");

    let profiles = queries::list_profiles(&state.pool, sort_by, limit)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(ProfilesResponse {
        count: profiles.len(),
        profiles,
    }))
}

// ============================================================
// Risk score
// ============================================================

pub async fn risk_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<RiskScoreResponse> {
    let addr = parse_address(&address)?;
    queries::get_risk_score(&state.pool, &addr)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// ============================================================
// Last-run artifacts: graph, flash loans, wash trades
// ============================================================

pub async fn graph_data(State(state): State<Arc<AppState>>) -> ApiResult<GraphDataResponse> {
    let artifacts = state.runner.artifacts().await;
    let Some(artifacts) = artifacts else {
        return Ok(Json(GraphDataResponse {
            nodes: Vec::new(),
            links: Vec::new(),
        }));
    };

    let nodes = artifacts
        .graph_data
        .nodes
        .iter()
        .map(|n| GraphNodeEntry {
            id: bytes_to_hex(n.address.as_slice()),
            centrality: n.centrality,
            degree: n.degree,
        })
        .collect();
    let links = artifacts
        .graph_data
        .links
        .iter()
        .map(|l| GraphLinkEntry {
            source: bytes_to_hex(l.source.as_slice()),
            target: bytes_to_hex(l.target.as_slice()),
            value: l.value,
            count: l.count,
        })
        .collect();

    Ok(Json(GraphDataResponse { nodes, links }))
}

pub async fn flash_loans(State(state): State<Arc<AppState>>) -> ApiResult<FlashLoansResponse> {
    let events: Vec<FlashLoanEntry> = match state.runner.artifacts().await {
        Some(artifacts) => artifacts
            .flash_loans
            .iter()
            .map(|e| FlashLoanEntry {
                wallet: bytes_to_hex(e.wallet.as_slice()),
                block_number: e.block_number,
                inflow: e.inflow,
                outflow: e.outflow,
                flash_loan_score: e.flash_loan_score,
                explanation: e.explanation.clone(),
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(Json(FlashLoansResponse {
        count: events.len(),
        events,
    }))
}

pub async fn wash_trades(State(state): State<Arc<AppState>>) -> ApiResult<WashTradesResponse> {
    let pairs: Vec<WashTradeEntry> = match state.runner.artifacts().await {
        Some(artifacts) => artifacts
            .wash_trades
            .iter()
            .map(|p| WashTradeEntry {
                wallet_a: bytes_to_hex(p.wallet_a.as_slice()),
                wallet_b: bytes_to_hex(p.wallet_b.as_slice()),
                value_a_to_b: p.value_a_to_b,
                value_b_to_a: p.value_b_to_a,
                tx_count_a_to_b: p.tx_count_a_to_b,
                tx_count_b_to_a: p.tx_count_b_to_a,
                round_trips: p.round_trips,
                value_similarity: p.value_similarity,
                suspicion_score: p.suspicion_score,
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(Json(WashTradesResponse {
        count: pairs.len(),
        pairs,
    }))
}

// ============================================================
// Alerts
// ============================================================

pub async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertParams>,
) -> ApiResult<AlertsResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    if let Some(t) = params.alert_type.as_deref() {
        if AlertType::parse(t).is_none() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Unknown alert type '{}'", t),
            ));
        }
    }
    if let Some(s) = params.severity.as_deref() {
        if Severity::parse(s).is_none() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Unknown severity '{}'", s),
            ));
        }
    }

    let alerts = queries::list_alerts(
        &state.pool,
        params.alert_type.as_deref(),
        params.severity.as_deref(),
        limit,
    )
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

// ============================================================
// Transactions
// ============================================================

pub async fn transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionParams>,
) -> ApiResult<TransactionsResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let transactions = queries::recent_transactions(&state.pool, limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

// ============================================================
// Detection trigger
// ============================================================

/// Blocks until the run completes and returns its summary. A request that
/// arrives while a run is active gets `already_running` back immediately
/// instead of queueing a second run.
pub async fn run_detection(
    State(state): State<Arc<AppState>>,
) -> ApiResult<RunDetectionResponse> {
    let response = match state.runner.trigger().await {
        RunOutcome::Completed(summary) => RunDetectionResponse {
            status: "completed".to_string(),
            summary: Some(summary),
            error: None,
        },
        RunOutcome::AlreadyRunning => RunDetectionResponse {
            status: "already_running".to_string(),
            summary: None,
            error: None,
        },
        RunOutcome::TimedOut => RunDetectionResponse {
            status: "timed_out".to_string(),
            summary: None,
            error: None,
        },
        RunOutcome::Failed(msg) => RunDetectionResponse {
            status: "failed".to_string(),
            summary: None,
            error: Some(msg),
        },
    };

    Ok(Json(response))
}
