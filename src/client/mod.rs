//! Outbound HTTP/1.x connections.
//!
//! # Data Flow
//! ```text
//! Multiplexer::execute_client_transaction
//!     → reactor connects (or reuses an idle pooled connection)
//!     → ClientSocket state machine ↔ ClientHandler callbacks
//!     → handle_remove → end_transaction → idle pool or close
//! ```

pub mod handler;
pub mod socket;
pub mod state;

pub use crate::observability::counters::ClientCounters;
pub use handler::{ClientEndState, ClientHandler};
pub use socket::{ClientSocket, ClientSocketConfig};
pub use state::{ClientFlags, ClientPhase};
