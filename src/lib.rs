//! Non-blocking HTTP/1.x stack: resumable parser and formatter, client and
//! server socket state machines, a routing proxy with backpressure, and the
//! tokio reactor that drives them.

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod index;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod server;
pub mod service;
pub mod stream;

pub use config::schema::StackConfig;
pub use error::{Error, Flow, Result};
pub use lifecycle::Shutdown;
pub use net::{Reactor, ReactorSettings};
