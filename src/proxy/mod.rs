//! Routing reverse proxy.
//!
//! # Data Flow
//! ```text
//! ServerSocket (inbound) ──ProxyHandler──▶ ClientSocket (outbound)
//!        ▲                    │
//!        └── ProxyContext ◀───┘  (pairing state, byte counts)
//! ```
//!
//! # Responsibilities
//! - Pair one inbound transaction with one outbound transaction
//! - Relay headers minus hop-by-hop fields and bodies byte for byte
//! - Propagate backpressure between the two sockets
//! - Tear down the surviving side when the other fails

pub mod context;
pub mod handler;
pub mod pairing;
pub mod router;

pub use context::{ProxyContext, SharedContext};
pub use handler::{hop_by_hop_filter, ProxyHandler};
pub use pairing::Pairing;
pub use router::{build_route_table, HostRouter, RouteTable, RouteTarget, Router, StaticRouter};
