//! Bounded TCP listener feeding the reactor.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce `max_connections` with a semaphore; each server socket task
//!   holds a permit until its connection is gone
//! - Report accept failures without stopping the accept loop

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    /// The connection limit was torn down; no further accepts are possible.
    #[error("listener closed")]
    Closed,
}

/// One accepted connection and the slot it occupies.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
}

/// A connection slot, released when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address: SocketAddr = config.bind_address.parse().map_err(|e| ListenerError::Bind {
            address: config.bind_address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        Self::bind_addr(address, config.max_connections).await
    }

    /// Bind to an explicit address, e.g. port 0 in tests.
    pub async fn bind_addr(address: SocketAddr, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };
        let inner = TcpListener::bind(address).await.map_err(bind_error)?;
        let local = inner.local_addr().map_err(bind_error)?;
        tracing::info!(address = %local, max_connections, "Listener bound");

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free slot, then for a peer.
    ///
    /// Holding the slot before accepting leaves excess peers in the kernel
    /// backlog instead of in the reactor.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer = %peer, free_slots = self.slots.available_permits(), "Connection accepted");

        Ok(Accepted {
            stream,
            peer,
            permit: ConnectionPermit { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
