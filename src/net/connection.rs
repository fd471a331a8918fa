//! Connection identity and live-connection accounting.
//!
//! # Responsibilities
//! - Generate unique ids used to address sockets in the multiplexer
//! - Count live client and server connections for shutdown draining
//! - Mirror the counts into the `http_active_connections` gauge

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Relaxed ordering is enough: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a multiplexed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which end of an HTTP exchange a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Counts live connections on one reactor.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    clients: Rc<Cell<u64>>,
    servers: Rc<Cell<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, side: Side) -> &Rc<Cell<u64>> {
        match side {
            Side::Client => &self.clients,
            Side::Server => &self.servers,
        }
    }

    /// Record a new live connection. The guard decrements on drop.
    pub fn track(&self, side: Side, id: ConnectionId) -> ConnectionGuard {
        let counter = Rc::clone(self.counter(side));
        counter.set(counter.get() + 1);
        metrics::gauge!("http_active_connections", "side" => side.label()).increment(1.0);
        ConnectionGuard {
            counter,
            side,
            id,
        }
    }

    pub fn active_count(&self, side: Side) -> u64 {
        self.counter(side).get()
    }

    pub fn total(&self) -> u64 {
        self.clients.get() + self.servers.get()
    }

    /// Wait until every tracked connection has gone away.
    pub async fn wait_for_drain(&self) {
        let mut poll = tokio::time::interval(DRAIN_POLL);
        while self.total() > 0 {
            poll.tick().await;
        }
    }
}

/// Keeps one connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Rc<Cell<u64>>,
    side: Side,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
        metrics::gauge!("http_active_connections", "side" => self.side.label()).decrement(1.0);
        tracing::trace!(socket = %self.id, side = self.side.label(), "Connection closed");
    }
}
