//! Reactor-owned pools: I/O buffers and idle outbound connections.
//!
//! # Responsibilities
//! - Hand out fixed-size `ByteBuffer`s up to a hard limit
//! - Keep finished, reusable client sockets per upstream address
//!
//! # Design Decisions
//! - Both pools belong to one reactor thread and need no locking
//! - Idle sockets are not watched; a peer that closed while idle shows up
//!   as a failed first write, which the client socket retries once

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::buffer::ByteBuffer;
use crate::client::ClientSocket;
use crate::net::tcp::StreamSlot;

pub struct BufferPool {
    size: usize,
    max_pooled: usize,
    max_total: usize,
    free: Vec<ByteBuffer>,
    in_use: usize,
}

impl BufferPool {
    pub fn new(size: usize, max_pooled: usize, max_total: usize) -> Self {
        Self {
            size,
            max_pooled,
            max_total,
            free: Vec::new(),
            in_use: 0,
        }
    }

    /// `None` once `max_total` buffers are out.
    pub fn acquire(&mut self) -> Option<ByteBuffer> {
        if self.in_use >= self.max_total {
            return None;
        }
        let buffer = self.free.pop().unwrap_or_else(|| ByteBuffer::new(self.size));
        self.in_use += 1;
        Some(buffer)
    }

    pub fn release(&mut self, mut buffer: ByteBuffer) {
        self.in_use = self.in_use.saturating_sub(1);
        if self.free.len() < self.max_pooled && buffer.capacity() == self.size {
            buffer.clear();
            self.free.push(buffer);
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

/// A connected client socket waiting for its next transaction.
pub struct IdleConnection {
    pub socket: Rc<RefCell<ClientSocket>>,
    pub slot: StreamSlot,
}

pub struct IdlePool {
    max_per_peer: usize,
    peers: HashMap<SocketAddr, VecDeque<IdleConnection>>,
}

impl IdlePool {
    pub fn new(max_per_peer: usize) -> Self {
        Self {
            max_per_peer,
            peers: HashMap::new(),
        }
    }

    /// Park a connection. Returns it back when the peer's queue is full.
    pub fn put(&mut self, peer: SocketAddr, connection: IdleConnection) -> Option<IdleConnection> {
        let queue = self.peers.entry(peer).or_default();
        if queue.len() >= self.max_per_peer {
            return Some(connection);
        }
        queue.push_back(connection);
        None
    }

    /// Most recently parked connection first; its peer is least likely to
    /// have timed it out.
    pub fn take(&mut self, peer: SocketAddr) -> Option<IdleConnection> {
        let queue = self.peers.get_mut(&peer)?;
        let connection = queue.pop_back();
        if queue.is_empty() {
            self.peers.remove(&peer);
        }
        connection
    }

    pub fn len(&self) -> usize {
        self.peers.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove every parked connection, e.g. at shutdown.
    pub fn drain(&mut self) -> Vec<IdleConnection> {
        self.peers.drain().flat_map(|(_, queue)| queue).collect()
    }
}
