//! Transaction outcome counters.
//!
//! Every update goes both to the `metrics` facade (scraped through the
//! Prometheus exporter when one is installed) and to in-process atomics that
//! the load generator and tests read back directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running average over `u64` samples.
#[derive(Debug, Default)]
pub struct Average {
    count: AtomicU64,
    sum: AtomicU64,
}

impl Average {
    pub fn add(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean of all samples, 0 when empty.
    pub fn value(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }
}

/// Outcomes of outbound transactions.
#[derive(Debug, Default)]
pub struct ClientCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    latency_micros: Average,
    transactions_per_connection: Average,
}

impl ClientCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_micros.add(latency.as_micros() as u64);
        metrics::counter!("http_client_transactions_total", "outcome" => "success").increment(1);
        metrics::histogram!("http_client_transaction_duration_seconds").record(latency.as_secs_f64());
    }

    pub fn record_failure(&self, latency: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_client_transactions_total", "outcome" => "failure").increment(1);
        metrics::histogram!("http_client_transaction_duration_seconds").record(latency.as_secs_f64());
    }

    /// Record how many transactions a closed connection carried.
    pub fn record_connection_closed(&self, transactions: u64) {
        self.transactions_per_connection.add(transactions);
        metrics::histogram!("http_client_requests_per_connection").record(transactions as f64);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn average_latency(&self) -> Duration {
        Duration::from_micros(self.latency_micros.value() as u64)
    }

    pub fn average_transactions_per_connection(&self) -> f64 {
        self.transactions_per_connection.value()
    }

    pub fn closed_connections(&self) -> u64 {
        self.transactions_per_connection.count()
    }
}

/// Outcomes of inbound transactions.
#[derive(Debug, Default)]
pub struct ServerCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    transactions_per_connection: Average,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_server_transactions_total", "outcome" => "success").increment(1);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_server_transactions_total", "outcome" => "failure").increment(1);
    }

    pub fn record_connection_closed(&self, transactions: u64) {
        self.transactions_per_connection.add(transactions);
        metrics::histogram!("http_server_requests_per_connection").record(transactions as f64);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn average_transactions_per_connection(&self) -> f64 {
        self.transactions_per_connection.value()
    }
}
