//! Metrics exposition.
//!
//! # Metrics
//! - `http_client_transactions_total` (counter): outbound transactions by outcome
//! - `http_client_transaction_duration_seconds` (histogram): outbound latency
//! - `http_client_requests_per_connection` (histogram): reuse depth at close
//! - `http_server_transactions_total` (counter): inbound transactions by outcome
//! - `http_server_requests_per_connection` (histogram)
//! - `http_active_connections` (gauge): open connections by side
//!
//! # Design Decisions
//! - The Prometheus recorder is optional; without it every update is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with a scrape listener on `addr`.
/// Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}
