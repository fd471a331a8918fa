//! Capabilities a socket needs from the reactor that drives it.

use std::fmt;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::http::transaction::{ClientTransaction, ServerTransaction};
use crate::net::connection::ConnectionId;

/// Readiness a socket wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { read: false, write: false };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// A transaction that could not be submitted, handed back to the caller.
pub struct ExecuteError {
    pub error: Error,
    pub transaction: ClientTransaction,
}

impl fmt::Debug for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteError").field("error", &self.error).finish_non_exhaustive()
    }
}

/// Reactor-side services consumed by client and server sockets.
///
/// All methods run on the reactor's thread. `remove_multiplexed_socket` is
/// deferred: the reactor calls the socket's `handle_remove` after the
/// current callback has returned.
pub trait Multiplexer {
    /// True once shutdown has begun.
    fn shutdown(&self) -> bool;

    /// Take an I/O buffer from the pool. `None` when the pool is exhausted.
    fn acquire_buffer(&mut self) -> Option<ByteBuffer>;

    fn release_buffer(&mut self, buffer: ByteBuffer);

    fn create_client_transaction(&mut self) -> Option<ClientTransaction> {
        Some(ClientTransaction::default())
    }

    fn destroy_client_transaction(&mut self, transaction: ClientTransaction) {
        drop(transaction);
    }

    fn create_server_transaction(&mut self) -> Option<ServerTransaction> {
        Some(ServerTransaction::default())
    }

    fn destroy_server_transaction(&mut self, transaction: ServerTransaction) {
        drop(transaction);
    }

    /// Submit a transaction for connect and send. Its peer address must be set.
    fn execute_client_transaction(&mut self, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError>;

    fn update_multiplexed_socket(&mut self, id: ConnectionId, interest: Interest) -> Result<()>;

    fn remove_multiplexed_socket(&mut self, id: ConnectionId) -> Result<()>;
}
