//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submission, confirmation and failure
//! - Fee / gas escalations
//! - Wallet balance
//! - Compounding cycles

use crate::error::{CompounderError, CompounderResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "compounder_transactions_submitted_total",
        "Transactions accepted into the mempool",
        &["operation"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "compounder_transactions_confirmed_total",
        "Transactions executed successfully",
        &["operation"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "compounder_transactions_failed_total",
        "Transactions that ended in a terminal failure",
        &["operation", "reason"]
    ).unwrap();

    pub static ref TX_ESCALATIONS: CounterVec = register_counter_vec!(
        "compounder_escalations_total",
        "Retries after raising the fee or the gas limit",
        &["operation", "resource"]
    ).unwrap();

    pub static ref TX_CONFIRM_LATENCY: HistogramVec = register_histogram_vec!(
        "compounder_confirmation_latency_seconds",
        "Time from mempool acceptance to execution result",
        &["operation"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "compounder_wallet_balance",
        "Signer balance in the smallest unit",
        &["denom"]
    ).unwrap();

    // Cycle metrics
    pub static ref CYCLES: CounterVec = register_counter_vec!(
        "compounder_cycles_total",
        "Claim and compound cycles by result",
        &["result"]
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

    pub async fn run(&self) -> CompounderResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CompounderError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CompounderError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_tx_submitted(operation: &str) {
    TX_SUBMITTED.with_label_values(&[operation]).inc();
}

pub fn record_tx_confirmed(operation: &str, latency_secs: f64) {
    TX_CONFIRMED.with_label_values(&[operation]).inc();
    TX_CONFIRM_LATENCY
        .with_label_values(&[operation])
        .observe(latency_secs);
}

pub fn record_tx_failed(operation: &str, reason: &str) {
    TX_FAILED.with_label_values(&[operation, reason]).inc();
}

pub fn record_escalation(operation: &str, resource: &str) {
    TX_ESCALATIONS.with_label_values(&[operation, resource]).inc();
}

pub fn record_wallet_balance(denom: &str, amount: u128) {
    WALLET_BALANCE
        .with_label_values(&[denom])
        .set(amount as f64);
}

pub fn record_cycle(result: &str) {
    CYCLES.with_label_values(&[result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_escalation("metrics_test", "fee");
        let text = render().unwrap();
        assert!(text.contains("compounder_escalations_total"));
        assert!(text.contains("operation=\"metrics_test\""));
    }
}
