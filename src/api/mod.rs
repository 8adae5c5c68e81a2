pub mod handlers;
pub mod queries;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::risk::runner::DetectionRunner;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub runner: Arc<DetectionRunner>,
}

pub fn router(pool: PgPool, runner: Arc<DetectionRunner>) -> Router {
    let state = Arc::new(AppState { pool, runner });

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/wallet-profiles", get(handlers::wallet_profiles))
        .route("/api/v1/risk-score/{address}", get(handlers::risk_score))
        .route("/api/v1/graph-data", get(handlers::graph_data))
        .route("/api/v1/flash-loans", get(handlers::flash_loans))
        .route("/api/v1/wash-trades", get(handlers::wash_trades))
        .route("/api/v1/alerts", get(handlers::alerts))
        .route("/api/v1/transactions", get(handlers::transactions))
        .route("/api/v1/run-detection", post(handlers::run_detection))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    pool: PgPool,
    runner: Arc<DetectionRunner>,
    host: &str,
    port: u16,
) -> eyre::Result<()> {
    let app = router(pool, runner);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
