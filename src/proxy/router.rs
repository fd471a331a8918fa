//! Upstream selection for proxied requests.
//!
//! # Responsibilities
//! - Resolve the destination address of an outbound transaction
//! - Report unroutable requests as `CannotFind` (404) and denied ones as
//!   `NotOwner` (403)
//!
//! # Design Decisions
//! - Host routes live in a [`WildcardIndex`] keyed by lowercased host and
//!   matched against the request path, so `/api*` beats `/*` for the same host.
//! - The table sits behind an `ArcSwap`; a config reload stores a freshly
//!   built index and in-flight lookups keep the one they loaded.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::RouteConfig;
use crate::error::{Error, Result};
use crate::http::transaction::ClientTransaction;
use crate::index::WildcardIndex;
use crate::server::ServerSocket;

pub trait Router {
    /// Pick the destination for `transaction`, whose request was copied from
    /// the inbound request on `server`.
    fn route(&self, server: &ServerSocket, transaction: &mut ClientTransaction) -> Result<SocketAddr>;
}

/// Sends everything to one upstream.
#[derive(Debug, Clone, Copy)]
pub struct StaticRouter {
    destination: SocketAddr,
}

impl StaticRouter {
    pub fn new(destination: SocketAddr) -> Self {
        Self { destination }
    }
}

impl Router for StaticRouter {
    fn route(&self, _server: &ServerSocket, _transaction: &mut ClientTransaction) -> Result<SocketAddr> {
        Ok(self.destination)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Forward(SocketAddr),
    Deny,
}

pub type RouteTable = WildcardIndex<RouteTarget>;

/// Virtual host routing with a default upstream for unknown hosts.
pub struct HostRouter {
    table: Arc<ArcSwap<RouteTable>>,
    default_upstream: Option<SocketAddr>,
}

impl HostRouter {
    pub fn new(table: Arc<ArcSwap<RouteTable>>, default_upstream: Option<SocketAddr>) -> Self {
        Self { table, default_upstream }
    }

    pub fn table(&self) -> &Arc<ArcSwap<RouteTable>> {
        &self.table
    }

    pub fn resolve(&self, host: &str, path: &str) -> Result<SocketAddr> {
        let table = self.table.load();
        match table.match_key(&host.to_ascii_lowercase(), path) {
            Ok(target) => match *target {
                RouteTarget::Forward(address) => Ok(address),
                RouteTarget::Deny => Err(Error::NotOwner),
            },
            Err(Error::CannotFind) => self.default_upstream.ok_or(Error::CannotFind),
            Err(error) => Err(error),
        }
    }
}

impl Router for HostRouter {
    fn route(&self, server: &ServerSocket, transaction: &mut ClientTransaction) -> Result<SocketAddr> {
        let request = transaction.request();
        let host = match request.peer_address() {
            Ok(peer) => peer.host,
            // HTTP/1.0 requests may carry neither an absolute URI nor a Host
            Err(_) => return self.default_upstream.ok_or(Error::CannotFind),
        };
        let path = request.uri().path().unwrap_or("/");
        let destination = self.resolve(&host, path)?;
        tracing::debug!(socket = %server.id(), host = %host, path, upstream = %destination, "Routed request");
        Ok(destination)
    }
}

/// Compile configured routes into a lookup table.
pub fn build_route_table(routes: &[RouteConfig]) -> Result<RouteTable> {
    let table = RouteTable::default();
    for route in routes {
        let target = match (&route.upstream, route.deny) {
            (_, true) => RouteTarget::Deny,
            (Some(upstream), false) => RouteTarget::Forward(upstream.parse().map_err(|_| Error::InvalidArgument)?),
            (None, false) => return Err(Error::InvalidArgument),
        };
        table.insert(&route.domain.to_ascii_lowercase(), &route.pattern, Arc::new(target), false)?;
    }
    Ok(table)
}
