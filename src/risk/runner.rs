use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::config::DetectionConfig;
use crate::db::repository;
use crate::features::extractor::{self, WalletFeatures};
use crate::flashloan::detector::{FlashLoanDetector, FlashLoanEvent};
use crate::graph::builder::{GraphData, TxGraph};
use crate::graph::wash::{self, WashTradePair};
use crate::ingest::types::Snapshot;
use crate::ml::engine::{MlEngine, MlOutput};
use crate::risk::engine::{RiskEngine, SignalOutputs};

/// Observable phase of the detection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    CollectingSignals,
    Scoring,
    Alerting,
}

/// Outcome of one trigger request.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// A run was already in flight; the request was coalesced into a no-op.
    AlreadyRunning,
    /// The run exceeded its timeout budget and was abandoned. Previous
    /// profiles and alerts are untouched.
    TimedOut,
    /// The run aborted (e.g. the snapshot could not be read). Previous
    /// state is preserved; the scheduler will retry on its next tick.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub head_block: i64,
    pub transactions_scanned: usize,
    pub wallets_profiled: usize,
    pub ml_fitted: bool,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub flash_loan_events: usize,
    pub wash_trade_pairs: usize,
    pub alerts_generated: usize,
    /// Signal engines that failed this run and were scored around.
    pub partial_signals: Vec<String>,
}

/// In-memory outputs of the last completed run, served by the API. These
/// are derived data and deliberately not persisted.
pub struct DetectionArtifacts {
    pub graph_data: GraphData,
    pub flash_loans: Vec<FlashLoanEvent>,
    pub wash_trades: Vec<WashTradePair>,
    pub summary: RunSummary,
}

/// Compare-and-set run token: at most one detection run holds it at a time.
/// Concurrent triggers lose the exchange and are rejected instead of queued.
struct SingleFlight(AtomicBool);

impl SingleFlight {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates one full detection run: snapshot, the four signal engines
/// in parallel, composite scoring, and alert writing. The runner is the
/// only writer of profiles, risk scores, and alerts.
pub struct DetectionRunner {
    pool: PgPool,
    config: DetectionConfig,
    gate: SingleFlight,
    phase: RwLock<RunPhase>,
    artifacts: RwLock<Option<Arc<DetectionArtifacts>>>,
}

struct SignalResults {
    ml: Option<MlOutput>,
    graph: Option<(HashMap<Address, f64>, GraphData, Vec<WashTradePair>, usize, usize)>,
    flash: Option<Vec<FlashLoanEvent>>,
}

impl DetectionRunner {
    pub fn new(pool: PgPool, config: DetectionConfig) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            gate: SingleFlight::new(),
            phase: RwLock::new(RunPhase::Idle),
            artifacts: RwLock::new(None),
        })
    }

    pub async fn phase(&self) -> RunPhase {
        *self.phase.read().await
    }

    pub async fn artifacts(&self) -> Option<Arc<DetectionArtifacts>> {
        self.artifacts.read().await.clone()
    }

    pub async fn last_summary(&self) -> Option<RunSummary> {
        self.artifacts
            .read()
            .await
            .as_ref()
            .map(|a| a.summary.clone())
    }

    /// Run the full pipeline, blocking until it finishes. Returns
    /// `AlreadyRunning` immediately when another run holds the token.
    pub async fn trigger(&self) -> RunOutcome {
        if !self.gate.try_acquire() {
            tracing::info!("Detection run already in flight, trigger coalesced");
            return RunOutcome::AlreadyRunning;
        }

        let budget = Duration::from_secs(self.config.run_timeout_secs);
        let outcome = match tokio::time::timeout(budget, self.execute()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.run_timeout_secs,
                    "Detection run exceeded its budget and was abandoned"
                );
                RunOutcome::TimedOut
            }
        };

        *self.phase.write().await = RunPhase::Idle;
        self.gate.release();
        outcome
    }

    async fn execute(&self) -> RunOutcome {
        let started_at = Utc::now();
        *self.phase.write().await = RunPhase::CollectingSignals;

        // One consistent snapshot; ingestion keeps appending concurrently.
        let snapshot =
            match repository::load_snapshot(&self.pool, self.config.lookback_hours).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Transaction snapshot unavailable, aborting run");
                    return RunOutcome::Failed(format!("snapshot unavailable: {e}"));
                }
            };

        tracing::info!(
            transactions = snapshot.len(),
            head_block = snapshot.head_block,
            "Detection run started"
        );

        let rows = match self.extract_features(&snapshot).await {
            Ok(rows) => rows,
            Err(e) => return RunOutcome::Failed(e),
        };

        let results = self.collect_signals(&snapshot, &rows).await;

        *self.phase.write().await = RunPhase::Scoring;

        let signals = SignalOutputs {
            ml_anomaly: results.ml.as_ref().map(|ml| {
                rows.iter()
                    .zip(&ml.anomaly_scores)
                    .map(|(r, &s)| (r.address, s))
                    .collect()
            }),
            graph: results.graph.as_ref().map(|(scores, _, _, _, _)| scores.clone()),
            flash_loans: results.flash.clone(),
            wash_trades: results
                .graph
                .as_ref()
                .map(|(_, _, pairs, _, _)| pairs.clone()),
        };
        let partial_signals: Vec<String> =
            signals.missing().iter().map(|s| s.to_string()).collect();

        let risk_engine = RiskEngine::new(&self.config);
        let breakdowns = risk_engine.score_wallets(&rows, &signals);

        if let Err(e) = repository::upsert_wallet_profiles(
            &self.pool,
            &rows,
            results.ml.as_ref(),
        )
        .await
        {
            tracing::error!(error = %e, "Failed to persist wallet profiles");
            return RunOutcome::Failed(format!("profile persistence failed: {e}"));
        }
        if let Err(e) = repository::upsert_risk_scores(&self.pool, &breakdowns).await {
            tracing::error!(error = %e, "Failed to persist risk scores");
            return RunOutcome::Failed(format!("risk score persistence failed: {e}"));
        }

        *self.phase.write().await = RunPhase::Alerting;

        let mut alerts = risk_engine.build_alerts(&breakdowns);

        // Optional cross-run cooldown on top of the per-run deduplication.
        if self.config.alert_cooldown_secs > 0 && !alerts.is_empty() {
            match repository::recent_composite_alerts(
                &self.pool,
                self.config.alert_cooldown_secs,
            )
            .await
            {
                Ok(recent) => {
                    alerts.retain(|a| !recent.contains(a.wallet.as_slice()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cooldown lookup failed, keeping all alerts");
                }
            }
        }

        let alerts_generated = match repository::insert_alerts(&self.pool, &alerts).await {
            Ok(n) => n as usize,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist alerts");
                return RunOutcome::Failed(format!("alert persistence failed: {e}"));
            }
        };

        for alert in &alerts {
            tracing::warn!(
                wallet = %alert.wallet,
                severity = alert.severity.as_str(),
                risk_score = alert.risk_score,
                "ALERT {}",
                alert.explanation
            );
        }

        let (graph_data, graph_nodes, graph_edges, wash_trades) = match results.graph {
            Some((_, data, pairs, nodes, edges)) => (data, nodes, edges, pairs),
            None => (GraphData::default(), 0, 0, Vec::new()),
        };

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            head_block: snapshot.head_block,
            transactions_scanned: snapshot.len(),
            wallets_profiled: rows.len(),
            ml_fitted: results.ml.as_ref().map(|m| m.fitted).unwrap_or(false),
            graph_nodes,
            graph_edges,
            flash_loan_events: results.flash.as_ref().map_or(0, |f| f.len()),
            wash_trade_pairs: wash_trades.len(),
            alerts_generated,
            partial_signals,
        };

        *self.artifacts.write().await = Some(Arc::new(DetectionArtifacts {
            graph_data,
            flash_loans: results.flash.unwrap_or_default(),
            wash_trades,
            summary: summary.clone(),
        }));

        tracing::info!(
            wallets = summary.wallets_profiled,
            alerts = summary.alerts_generated,
            flash_loans = summary.flash_loan_events,
            wash_pairs = summary.wash_trade_pairs,
            "Detection run complete"
        );

        RunOutcome::Completed(summary)
    }

    async fn extract_features(
        &self,
        snapshot: &Snapshot,
    ) -> Result<Vec<WalletFeatures>, String> {
        let transactions = snapshot.transactions.clone();
        tokio::task::spawn_blocking(move || extractor::extract(&transactions))
            .await
            .map_err(|e| format!("feature extraction failed: {e}"))
    }

    /// The three signal tasks are read-only over the snapshot and have no
    /// dependency on each other, so they run on blocking threads in
    /// parallel. A failed task degrades to a missing signal rather than
    /// aborting the run.
    async fn collect_signals(
        &self,
        snapshot: &Snapshot,
        rows: &[WalletFeatures],
    ) -> SignalResults {
        let ml_engine = MlEngine::new(&self.config);
        let ml_rows = rows.to_vec();
        let ml_task = tokio::task::spawn_blocking(move || ml_engine.run(&ml_rows));

        let graph_txs = snapshot.transactions.clone();
        let addresses: Vec<Address> = rows.iter().map(|r| r.address).collect();
        let min_round_trips = self.config.wash_trade.min_round_trips;
        let graph_task = tokio::task::spawn_blocking(move || {
            let graph = TxGraph::build(&graph_txs);
            let scores: HashMap<Address, f64> = addresses
                .iter()
                .map(|&a| (a, graph.wallet_score(a)))
                .collect();
            let pairs = wash::detect(&graph, min_round_trips);
            let (nodes, edges) = (graph.node_count(), graph.edge_count());
            (scores, graph.graph_data(), pairs, nodes, edges)
        });

        let flash_detector = FlashLoanDetector::new(&self.config.flash_loan);
        let flash_txs = snapshot.transactions.clone();
        let flash_task =
            tokio::task::spawn_blocking(move || flash_detector.detect(&flash_txs));

        let (ml, graph, flash) = tokio::join!(ml_task, graph_task, flash_task);

        SignalResults {
            ml: ml
                .map_err(|e| tracing::error!(error = %e, "ML signal task failed"))
                .ok(),
            graph: graph
                .map_err(|e| tracing::error!(error = %e, "Graph signal task failed"))
                .ok(),
            flash: flash
                .map_err(|e| tracing::error!(error = %e, "Flash-loan signal task failed"))
                .ok(),
        }
    }
}
