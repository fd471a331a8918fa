//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sockets, reactor, listener produce:
//!     → tracing events with socket ids and states (logging.rs)
//!     → metrics facade counters and histograms (counters.rs)
//!
//! Consumers:
//!     → fmt layer on stdout, filtered by RUST_LOG or config
//!     → Prometheus scrape endpoint (metrics.rs)
//!     → in-process counters read by the load command and tests
//! ```
//!
//! # Design Decisions
//! - Metric updates go through the `metrics` facade and are no-ops until a
//!   recorder is installed
//! - Counters also keep atomics so results are readable without a recorder

pub mod counters;
pub mod logging;
pub mod metrics;

pub use counters::{ClientCounters, ServerCounters};
