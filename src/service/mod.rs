//! Ready-made handlers that run on the reactor.
//!
//! # Responsibilities
//! - `origin`: a server that answers every request with a generated body,
//!   produced in blocks of a configurable size
//! - `load`: a client that drives N × M requests against an origin or a
//!   proxy and verifies every response body
//!
//! The routing proxy lives in [`crate::proxy`].

pub mod load;
pub mod origin;

pub use load::{LoadHandler, LoadReport, LoadSettings};
pub use origin::OriginHandler;
