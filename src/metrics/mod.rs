//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Deposit and withdraw outcomes
//! - Pool instruction latency
//! - Rollbacks and failed compensations
//! - Per-pool share and liquidity totals

use crate::error::{VaultError, VaultResult};
use crate::ledger::PoolTotals;
use crate::types::PoolId;

use alloy_primitives::U256;
use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Call metrics
    pub static ref DEPOSITS: CounterVec = register_counter_vec!(
        "xledger_vault_deposits_total",
        "Total completed deposits",
        &["pool_id"]
    ).unwrap();

    pub static ref WITHDRAWALS: CounterVec = register_counter_vec!(
        "xledger_vault_withdrawals_total",
        "Total completed withdrawals",
        &["pool_id"]
    ).unwrap();

    pub static ref CALLS_ABORTED: CounterVec = register_counter_vec!(
        "xledger_vault_calls_aborted_total",
        "Total aborted calls by call kind and error kind",
        &["call", "error"]
    ).unwrap();

    pub static ref COMPENSATION_FAILURES: CounterVec = register_counter_vec!(
        "xledger_vault_compensation_failures_total",
        "Total compensations that failed during rollback",
        &["compensation"]
    ).unwrap();

    // Counterparty metrics
    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "xledger_vault_execution_latency_seconds",
        "Pool instruction dispatch latency",
        &["instruction", "outcome"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Pool state metrics
    pub static ref POOL_TOTAL_SHARES: GaugeVec = register_gauge_vec!(
        "xledger_vault_pool_total_shares",
        "Outstanding vault shares per pool",
        &["pool_id"]
    ).unwrap();

    pub static ref POOL_TOTAL_LIQUIDITY: GaugeVec = register_gauge_vec!(
        "xledger_vault_pool_total_liquidity",
        "Mirrored custodial LP balance per pool",
        &["pool_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> VaultResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| VaultError::Internal(format!("Metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| VaultError::Internal(format!("Metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_deposit(pool_id: &PoolId) {
    DEPOSITS.with_label_values(&[&pool_id.to_string()]).inc();
}

pub fn record_withdrawal(pool_id: &PoolId) {
    WITHDRAWALS.with_label_values(&[&pool_id.to_string()]).inc();
}

pub fn record_call_aborted(call: &str, error: &VaultError) {
    CALLS_ABORTED
        .with_label_values(&[call, error.kind()])
        .inc();
}

pub fn record_compensation_failure(compensation: &str) {
    COMPENSATION_FAILURES
        .with_label_values(&[compensation])
        .inc();
}

pub fn record_execution(instruction: &str, success: bool, latency_secs: f64) {
    let outcome = if success { "ok" } else { "error" };
    EXECUTION_LATENCY
        .with_label_values(&[instruction, outcome])
        .observe(latency_secs);
}

pub fn record_pool_totals(pool_id: &PoolId, totals: &PoolTotals) {
    let label = pool_id.to_string();
    POOL_TOTAL_SHARES
        .with_label_values(&[&label])
        .set(gauge_value(totals.total_shares));
    POOL_TOTAL_LIQUIDITY
        .with_label_values(&[&label])
        .set(gauge_value(totals.total_liquidity));
}

fn gauge_value(value: U256) -> f64 {
    u128::try_from(value).map(|v| v as f64).unwrap_or(f64::MAX)
}
