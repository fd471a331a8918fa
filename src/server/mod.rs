//! Inbound HTTP/1.x connections.
//!
//! # Data Flow
//! ```text
//! listener accept → ServerHandler::accept_connection
//!     → ServerSocket state machine ↔ ServerHandler callbacks
//!     → keep-alive (next TransactionBegin) or handle_remove
//! ```

pub mod handler;
pub mod socket;
pub mod state;

pub use crate::observability::counters::ServerCounters;
pub use handler::{ServerEndState, ServerHandler};
pub use socket::{ServerSocket, ServerSocketConfig};
pub use state::{ServerFlags, ServerPhase};
