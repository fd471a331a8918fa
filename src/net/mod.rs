//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → reactor.rs (ServerSocket + per-socket task)
//!     → tcp.rs (try_read / try_write on readiness)
//!
//! Outbound transaction
//!     → reactor.rs (idle pool in pool.rs, or connect)
//!     → ClientSocket + per-socket task
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Plain TCP only; `ConnectedSocket` is the seam for other transports

pub mod connection;
pub mod listener;
pub mod pool;
pub mod reactor;
pub mod tcp;

pub use connection::{ConnectionId, ConnectionTracker, Side};
pub use listener::{Listener, ListenerError};
pub use reactor::{Reactor, ReactorBuilder, ReactorSettings};
pub use tcp::TcpConnection;
