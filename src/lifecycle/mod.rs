//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → watch value set to true
//!             → polled by Multiplexer::shutdown
//!             → awaited by the accept loop and socket tasks
//!
//! Signals (signals.rs):
//!     SIGINT / SIGTERM → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, let socket tasks observe the flag, close
//! - One watch channel carries both the flag and the wakeup, so a task that
//!   starts waiting after the trigger returns at once

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
