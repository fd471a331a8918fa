//! Outbound HTTP connection state machine.
//!
//! # Data Flow
//! ```text
//! Connecting → TransactionBegin → FormattingHeaders → FormattingBody
//!     → FlushingBody → ParsingHeaders → ParsingBody → TransactionEnd
//!     → (pool: TransactionBegin again | Inactive)
//! ```
//!
//! # Responsibilities
//! - Drive one transaction at a time over a `ConnectedSocket`
//! - Pull request body bytes from the handler and push response body bytes
//!   to it, never buffering more than one I/O buffer in each direction
//! - Retry a transaction once when a pooled connection turns out to be stale
//! - Report the phase a transaction died in through `end_transaction`
//!
//! # Design Decisions
//! - The handler and the multiplexer are parameters of every driving call,
//!   so a handler can drive this socket's peer from inside a callback.
//! - Buffers are taken out of the socket while a handler looks at them and
//!   put back afterwards; the handler never sees a socket that aliases the
//!   slice it was given.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::ByteBuffer;
use crate::client::handler::{ClientEndState, ClientHandler};
use crate::client::state::{ClientFlags, ClientPhase};
use crate::error::{Error, Flow, Result};
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::{BodyChunk, BodyFraming};
use crate::http::transaction::{ClientTransaction, TransactionContext};
use crate::net::connection::ConnectionId;
use crate::observability::counters::ClientCounters;
use crate::stream::{Body, ConnectedSocket, Drive, ExecuteError, Interest, Multiplexer, SliceConsumer, SliceProducer};

/// Per-instance client socket policy.
#[derive(Debug, Clone, Copy)]
pub struct ClientSocketConfig {
    /// When false every request carries `Connection: close`.
    pub reuse_connections: bool,
}

impl Default for ClientSocketConfig {
    fn default() -> Self {
        Self {
            reuse_connections: true,
        }
    }
}

pub struct ClientSocket {
    id: ConnectionId,
    handle: Weak<RefCell<ClientSocket>>,
    phase: ClientPhase,
    flags: ClientFlags,
    socket: Box<dyn ConnectedSocket>,
    transaction: ClientTransaction,
    recv_buffer: Option<ByteBuffer>,
    send_buffer: Option<ByteBuffer>,
    bytes_available: usize,
    body_bytes_written: u64,
    requests_per_connection: u64,
    config: ClientSocketConfig,
    counters: Arc<ClientCounters>,
}

impl ClientSocket {
    /// New connection in `Connecting`, owning `transaction`.
    pub fn create(
        socket: Box<dyn ConnectedSocket>,
        transaction: ClientTransaction,
        config: ClientSocketConfig,
        counters: Arc<ClientCounters>,
    ) -> Rc<RefCell<ClientSocket>> {
        Rc::new_cyclic(|handle| {
            RefCell::new(ClientSocket {
                id: ConnectionId::new(),
                handle: handle.clone(),
                phase: ClientPhase::Connecting,
                flags: ClientFlags::default(),
                socket,
                transaction,
                recv_buffer: None,
                send_buffer: None,
                bytes_available: 0,
                body_bytes_written: 0,
                requests_per_connection: 0,
                config,
                counters,
            })
        })
    }

    /// Hand a pooled, connected socket its next transaction. A socket that
    /// cannot take it hands the transaction back.
    pub fn reset(&mut self, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError> {
        if !self.reusable() {
            return Err(ExecuteError {
                error: Error::InvalidState,
                transaction,
            });
        }
        self.transaction = transaction;
        self.flags = ClientFlags {
            first_use_after_reuse: true,
            ..ClientFlags::default()
        };
        self.bytes_available = 0;
        self.body_bytes_written = 0;
        self.phase = ClientPhase::TransactionBegin;
        tracing::trace!(socket = %self.id, "Reusing pooled connection");
        Ok(())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> Weak<RefCell<ClientSocket>> {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.socket.name()
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.socket.peer_address()
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn flags(&self) -> ClientFlags {
        self.flags
    }

    pub fn describe_state(&self) -> &'static str {
        self.phase.describe()
    }

    pub fn describe_flags(&self) -> &'static str {
        self.flags.describe()
    }

    pub fn request(&self) -> &HttpRequest {
        self.transaction.request()
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        self.transaction.request_mut()
    }

    pub fn response(&self) -> &HttpResponse {
        self.transaction.response()
    }

    pub fn context(&self) -> Option<&TransactionContext> {
        self.transaction.context()
    }

    pub fn set_context(&mut self, context: Option<TransactionContext>) {
        self.transaction.set_context(context);
    }

    pub fn transaction_start_time(&self) -> Instant {
        self.transaction.start_time()
    }

    pub fn body_bytes_written(&self) -> u64 {
        self.body_bytes_written
    }

    pub fn requests_per_connection(&self) -> u64 {
        self.requests_per_connection
    }

    /// The response has been received completely.
    pub fn is_finished(&self) -> bool {
        self.phase == ClientPhase::TransactionEnd
    }

    /// Removed, still connected and allowed back into the idle pool.
    pub fn reusable(&self) -> bool {
        self.phase == ClientPhase::Inactive && !self.flags.dead && self.socket.connected()
    }

    pub fn mark_dead(&mut self) {
        self.flags.dead = true;
    }

    /// Close a connection that sits in the idle pool between transactions.
    pub fn close(&mut self) {
        if self.phase != ClientPhase::Inactive || self.flags.dead {
            return;
        }
        tracing::debug!(socket = %self.id, "Closing idle connection");
        self.flags.dead = true;
        self.socket.close();
        self.counters.record_connection_closed(self.requests_per_connection);
        self.requests_per_connection = 0;
    }

    pub fn want_connect(&self) -> bool {
        self.phase == ClientPhase::Connecting
    }

    pub fn want_read(&self) -> bool {
        if self.flags.recv_paused || self.flags.aborted || self.phase == ClientPhase::Inactive {
            return false;
        }
        if self.socket.want_read() {
            return true;
        }
        if self.socket.want_write() {
            return false;
        }
        self.phase.is_recv()
    }

    pub fn want_write(&self) -> bool {
        if self.flags.send_paused || self.flags.aborted || self.phase == ClientPhase::Inactive {
            return false;
        }
        if self.socket.want_write() {
            return true;
        }
        if self.socket.want_read() {
            return false;
        }
        self.phase == ClientPhase::TransactionBegin || self.phase.is_send()
    }

    pub fn interest(&self) -> Interest {
        Interest {
            read: self.want_read(),
            write: self.want_write(),
        }
    }

    fn transition(&mut self, to: ClientPhase) -> Result<()> {
        if !to.can_enter_from(self.phase) {
            tracing::warn!(
                socket = %self.id,
                from = self.phase.describe(),
                to = to.describe(),
                "Invalid client state transition"
            );
            return Err(Error::InvalidState);
        }
        tracing::trace!(socket = %self.id, from = self.phase.describe(), to = to.describe(), "Client state transition");
        self.phase = to;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reactor entry points
    // ---------------------------------------------------------------------

    /// The transport finished connecting.
    pub fn handle_connect(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        if self.flags.aborted || !self.socket.connected() {
            return Err(Error::InvalidState);
        }
        tracing::debug!(socket = %self.id, peer = %self.peer_address(), "Connected to peer");
        self.transition(ClientPhase::TransactionBegin)?;
        self.handle_writable(mux, handler)
    }

    pub fn handle_readable(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        if !self.want_read() || !self.socket.connected() {
            return Err(Error::InvalidState);
        }
        self.advance_state_machine(
            mux,
            handler,
            &mut Body::Handler,
            Drive::FILL_RECV_BUFFER | Drive::ADVANCE_RECV | Drive::ADVANCE_SEND,
        )
    }

    pub fn handle_writable(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        if !self.want_write() || !self.socket.connected() {
            return Err(Error::InvalidState);
        }
        self.advance_state_machine(mux, handler, &mut Body::Handler, Drive::ADVANCE_RECV | Drive::ADVANCE_SEND)
    }

    pub fn handle_error(&self, error: &Error) {
        tracing::info!(socket = %self.id, error = %error, state = self.describe_state(), "Client socket error");
    }

    pub fn handle_remote_close(&self) {
        tracing::debug!(socket = %self.id, state = self.describe_state(), "Remote server closed socket");
    }

    pub fn handle_idle(&self) {
        tracing::info!(
            socket = %self.id,
            state = self.describe_state(),
            flags = self.describe_flags(),
            "Client socket idle"
        );
    }

    /// Final cleanup once the multiplexer dropped the socket.
    pub fn handle_remove(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) {
        if self.phase == ClientPhase::Inactive {
            return;
        }
        tracing::debug!(socket = %self.id, state = self.describe_state(), "Client socket removed");
        self.release_buffers(mux);

        if self.flags.retry_stale && !self.flags.aborted {
            tracing::debug!(socket = %self.id, "Closing stale connection and retrying transaction");
            self.socket.close();
            self.flags.dead = true;
            let mut transaction = std::mem::take(&mut self.transaction);
            transaction.rewind();
            if let Err(failed) = mux.execute_client_transaction(transaction) {
                tracing::info!(socket = %self.id, error = %failed.error, "Cannot retry transaction");
                self.transaction = failed.transaction;
                handler.end_transaction(mux, self, ClientEndState::Begin);
                self.counters.record_failure(self.transaction.start_time().elapsed());
                let transaction = std::mem::take(&mut self.transaction);
                mux.destroy_client_transaction(transaction);
            }
            self.phase = ClientPhase::Inactive;
            return;
        }

        let mut reuse = false;
        let state = match self.phase {
            ClientPhase::TransactionBegin => ClientEndState::Begin,
            ClientPhase::Connecting => ClientEndState::Connect,
            ClientPhase::FormattingHeaders => ClientEndState::SendRequestHeaders,
            ClientPhase::FormattingBody | ClientPhase::FlushingBody => ClientEndState::SendRequestBody,
            ClientPhase::ParsingHeaders => ClientEndState::RecvResponseHeaders,
            ClientPhase::ParsingBody => ClientEndState::RecvResponseBody,
            ClientPhase::TransactionEnd => {
                self.requests_per_connection += 1;
                reuse = self.config.reuse_connections && !self.flags.aborted && self.response_allows_reuse();
                ClientEndState::End
            }
            ClientPhase::Inactive => return,
        };

        handler.end_transaction(mux, self, state);

        let latency = self.transaction.start_time().elapsed();
        if state == ClientEndState::End {
            self.counters.record_success(latency);
        } else {
            tracing::debug!(socket = %self.id, state = ?state, "Client transaction failed");
            self.counters.record_failure(latency);
        }

        let transaction = std::mem::take(&mut self.transaction);
        mux.destroy_client_transaction(transaction);

        if reuse {
            tracing::debug!(socket = %self.id, "Connection may be reused");
        } else {
            tracing::debug!(socket = %self.id, "Connection will not be reused");
            self.counters.record_connection_closed(self.requests_per_connection);
            self.requests_per_connection = 0;
            self.flags.dead = true;
            self.socket.close();
        }
        self.phase = ClientPhase::Inactive;
    }

    /// A `Connection` value starting with `close` disables reuse, as does a
    /// response whose own framing forbids it.
    fn response_allows_reuse(&self) -> bool {
        let response = self.transaction.response();
        let close = response
            .find_header("Connection")
            .is_some_and(|header| header.value.starts_with("close"));
        !close && response.reuse_connection()
    }

    fn release_buffers(&mut self, mux: &mut dyn Multiplexer) {
        if let Some(buffer) = self.send_buffer.take() {
            mux.release_buffer(buffer);
        }
        if let Some(buffer) = self.recv_buffer.take() {
            mux.release_buffer(buffer);
        }
    }

    // ---------------------------------------------------------------------
    // Flow control
    // ---------------------------------------------------------------------

    /// Tear the transaction down before it completes.
    pub fn abort(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        tracing::debug!(socket = %self.id, state = self.describe_state(), "Client connection aborted");
        if self.flags.aborted {
            return Err(Error::InvalidState);
        }
        self.flags.aborted = true;
        if update {
            mux.remove_multiplexed_socket(self.id)?;
        }
        Ok(())
    }

    fn check_adjustable(&self) -> Result<()> {
        if self.phase == ClientPhase::Inactive || self.flags.aborted {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn update_interest(&self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        if update {
            mux.update_multiplexed_socket(self.id, self.interest())?;
        }
        Ok(())
    }

    pub fn pause_recv(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if self.flags.recv_paused {
            return Ok(());
        }
        tracing::trace!(socket = %self.id, "Pausing response receive");
        self.flags.recv_paused = true;
        self.update_interest(mux, update)
    }

    pub fn resume_recv(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if !self.flags.recv_paused {
            return Ok(());
        }
        tracing::trace!(socket = %self.id, "Resuming response receive");
        self.flags.recv_paused = false;
        self.update_interest(mux, update)
    }

    pub fn pause_send(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if self.flags.send_paused {
            return Ok(());
        }
        tracing::trace!(socket = %self.id, "Pausing request send");
        self.flags.send_paused = true;
        self.update_interest(mux, update)
    }

    pub fn resume_send(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if !self.flags.send_paused {
            return Ok(());
        }
        tracing::trace!(socket = %self.id, "Resuming request send");
        self.flags.send_paused = false;
        self.update_interest(mux, update)
    }

    // ---------------------------------------------------------------------
    // Synchronous body calls
    // ---------------------------------------------------------------------

    /// Bytes of response body that can be read right now, `Some(0)` at the
    /// end of the body, `None` when nothing has been received yet.
    pub fn response_body_available(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
    ) -> Result<(Flow, Option<u64>)> {
        let mut empty: [u8; 0] = [];
        let mut consumer = SliceConsumer::new(&mut empty);
        let flow = self.drive_sync(mux, handler, &mut Body::Consume(&mut consumer), Drive::ADVANCE_RECV)?;
        Ok((flow, consumer.offered()))
    }

    /// Copy up to `out.len()` response body bytes into `out`.
    pub fn read_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        out: &mut [u8],
    ) -> Result<(Flow, usize)> {
        let mut consumer = SliceConsumer::new(out);
        let flow = self.drive_sync(mux, handler, &mut Body::Consume(&mut consumer), Drive::ADVANCE_RECV)?;
        Ok((flow, consumer.consumed()))
    }

    /// Push `chunk` as request body. An empty chunk ends the body.
    pub fn send_request_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        if self.phase != ClientPhase::FormattingBody {
            return Err(Error::InvalidState);
        }
        let mut producer = SliceProducer::new(chunk);
        let flow = self.drive_sync(mux, handler, &mut Body::Produce(&mut producer), Drive::ADVANCE_SEND)?;
        Ok((flow, producer.produced()))
    }

    fn drive_sync(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
        drive: Drive,
    ) -> Result<Flow> {
        let flow = self.advance_state_machine(mux, handler, body, drive | Drive::UPDATE_MULTIPLEXER)?;
        if matches!(flow, Flow::Closed | Flow::Cleanup | Flow::Shutdown) || self.is_finished() {
            mux.remove_multiplexed_socket(self.id)?;
        } else {
            mux.update_multiplexed_socket(self.id, self.interest())?;
        }
        Ok(flow)
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    /// Run phases until the socket blocks, the handler pauses, a
    /// synchronous request is satisfied or the transaction ends.
    pub fn advance_state_machine(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
        drive: Drive,
    ) -> Result<Flow> {
        let mut fill = drive.contains(Drive::FILL_RECV_BUFFER);
        let mut drain = drive.contains(Drive::DRAIN_SEND_BUFFER);

        while !mux.shutdown() {
            let in_recv = self.phase.is_recv();
            let in_send = self.phase.is_send();

            if in_recv && !drive.contains(Drive::ADVANCE_RECV) {
                return Ok(Flow::Success);
            }
            if in_send && !drive.contains(Drive::ADVANCE_SEND) {
                return Ok(Flow::Success);
            }

            if fill {
                match self.fill_recv_buffer(mux) {
                    Ok(Flow::Success) => fill = false,
                    Ok(Flow::Closed) => {
                        self.handle_remote_close();
                        if self.phase == ClientPhase::ParsingBody && self.transaction.parser_mut().end_of_stream() {
                            fill = false;
                        } else {
                            return Ok(Flow::Closed);
                        }
                    }
                    Ok(flow) => return Ok(flow),
                    Err(error) => {
                        self.handle_error(&error);
                        return Err(error);
                    }
                }
            }

            let flow = match self.phase {
                ClientPhase::TransactionBegin => self.step_begin(mux, handler)?,
                ClientPhase::FormattingHeaders => self.step_send_headers(mux)?,
                ClientPhase::FormattingBody => self.step_send_body(mux, handler, body)?,
                ClientPhase::FlushingBody => match self.step_flush(mux, handler)? {
                    Flow::Again => return Ok(Flow::Again),
                    Flow::Success => {
                        fill = true;
                        Flow::Success
                    }
                    other => other,
                },
                ClientPhase::ParsingHeaders => self.step_recv_headers(mux, handler)?,
                ClientPhase::ParsingBody => self.step_recv_body(mux, handler, body)?,
                ClientPhase::TransactionEnd => return Ok(Flow::Success),
                ClientPhase::Connecting | ClientPhase::Inactive => {
                    tracing::warn!(socket = %self.id, state = self.describe_state(), "Cannot advance client socket");
                    return Err(Error::InvalidState);
                }
            };

            match flow {
                Flow::Success => {}
                Flow::Break => return Ok(Flow::Success),
                Flow::Again => {
                    fill = in_recv;
                    drain = in_send;
                }
                Flow::Pause => return Ok(Flow::Pause),
                other => return Ok(other),
            }

            if drain {
                match self.flush(mux)? {
                    Flow::Success => drain = false,
                    other => return Ok(other),
                }
            }
        }

        tracing::debug!(socket = %self.id, "Multiplexer shutdown");
        Ok(Flow::Shutdown)
    }

    fn step_begin(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        if !self.config.reuse_connections && self.transaction.request().find_header("Connection").is_none() {
            self.transaction.request_mut().add_header("Connection", "close");
        }

        match handler.begin_transaction(mux, self)? {
            Flow::Success => {}
            Flow::Again => return Err(Error::Unexpected(Flow::Again)),
            other => {
                tracing::debug!(socket = %self.id, flow = %other, "Handler stopped transaction after connecting");
                return Ok(other);
            }
        }

        let head = self.transaction.request().method() == "HEAD";
        self.transaction.parser_mut().set_head_response(head);
        self.transition(ClientPhase::FormattingHeaders)?;
        Ok(Flow::Success)
    }

    fn step_send_headers(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        if self.send_buffer.is_none() {
            let Some(buffer) = mux.acquire_buffer() else {
                tracing::error!(socket = %self.id, "Cannot acquire send buffer");
                return Err(Error::OutOfMemory);
            };
            self.send_buffer = Some(buffer);
        }
        let Some(buffer) = self.send_buffer.as_mut() else {
            return Err(Error::InvalidState);
        };

        let parts = self.transaction.parts_mut();
        match parts.formatter.format_headers(buffer, &*parts.request)? {
            Flow::Again => {
                tracing::trace!(socket = %self.id, "Partially formatted request headers");
                Ok(Flow::Again)
            }
            _ => {
                tracing::debug!(
                    socket = %self.id,
                    method = self.transaction.request().method(),
                    "Formatted request headers"
                );
                self.transition(ClientPhase::FormattingBody)?;
                Ok(Flow::Success)
            }
        }
    }

    fn step_send_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<Flow> {
        while !mux.shutdown() {
            let (flow, offered) = self.offer_body(mux, handler, body)?;
            match flow {
                Flow::Success => {}
                Flow::Again | Flow::Pause => return self.wait_for_body(mux),
                Flow::Break => return Ok(Flow::Break),
                other => return Ok(other),
            }

            let Some(buffer) = self.send_buffer.as_mut() else {
                return Err(Error::InvalidState);
            };

            if offered == 0 {
                if self.transaction.parts_mut().formatter.end_body(buffer)? == Flow::Again {
                    tracing::trace!(socket = %self.id, "No room to end request body");
                    return Ok(Flow::Again);
                }
                self.transition(ClientPhase::FlushingBody)?;
                return Ok(Flow::Success);
            }

            let block_start = buffer.write_position();
            let Some(size) = self.transaction.parts_mut().formatter.begin_block(buffer, offered)? else {
                tracing::trace!(socket = %self.id, "No room to begin request chunk");
                return Ok(Flow::Again);
            };

            let Some(mut buffer) = self.send_buffer.take() else {
                return Err(Error::InvalidState);
            };
            let produced = self.produce_body(mux, handler, body, &mut buffer.writable_slice()[..size]);
            let flow = match produced {
                Ok(flow) => flow,
                Err(error) => {
                    self.send_buffer = Some(buffer);
                    return Err(error);
                }
            };
            match flow {
                Flow::Success => {}
                Flow::Again | Flow::Pause => {
                    // drop the chunk-size line of the block that was never filled
                    buffer.set_write_position(block_start);
                    self.send_buffer = Some(buffer);
                    return self.wait_for_body(mux);
                }
                other => {
                    self.send_buffer = Some(buffer);
                    return Ok(other);
                }
            }

            buffer.advance_write(size);
            self.body_bytes_written += size as u64;
            let ended = self.transaction.parts_mut().formatter.end_block(&mut buffer);
            self.send_buffer = Some(buffer);
            if ended? != Flow::Success {
                // begin_block reserved room for the block trailer
                return Err(Error::Overflow);
            }
            tracing::trace!(socket = %self.id, size, "Formatted request chunk");
        }
        Ok(Flow::Shutdown)
    }

    fn wait_for_body(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        // push out what is already formatted while the body source is blocked
        if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
            self.flush(mux)?;
        }
        if !self.flags.aborted {
            self.pause_send(mux, false)?;
        }
        Ok(Flow::Pause)
    }

    fn step_flush(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
            let flow = self.flush(mux)?;
            if flow != Flow::Success {
                return Ok(flow);
            }
            if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
                return Ok(Flow::Again);
            }
        }

        self.transition(ClientPhase::ParsingHeaders)?;
        match handler.end_request(mux, self)? {
            Flow::Success => Ok(Flow::Success),
            other => {
                tracing::debug!(socket = %self.id, flow = %other, "Handler stopped transaction at request end");
                Ok(other)
            }
        }
    }

    fn step_recv_headers(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ClientHandler) -> Result<Flow> {
        let Some(buffer) = self.recv_buffer.as_mut() else {
            return Ok(Flow::Again);
        };

        let parts = self.transaction.parts_mut();
        match parts.parser.parse_headers(buffer, parts.response) {
            Ok(Flow::Again) => return Ok(Flow::Again),
            Ok(_) => {}
            Err(error) => {
                tracing::info!(socket = %self.id, error = %error, "Cannot parse response headers");
                return Err(error);
            }
        }

        tracing::debug!(
            socket = %self.id,
            status = self.transaction.response().status(),
            version = self.transaction.response().version(),
            "Received response headers"
        );
        self.transition(ClientPhase::ParsingBody)?;

        match handler.receive_response_headers(mux, self)? {
            Flow::Success => Ok(Flow::Success),
            Flow::Again | Flow::Pause => Ok(Flow::Pause),
            other => {
                tracing::debug!(socket = %self.id, flow = %other, "Handler stopped transaction at response headers");
                Ok(other)
            }
        }
    }

    /// Body bytes ready in the receive buffer, `None` when more must be read.
    fn current_chunk_bytes_available(&mut self) -> Result<Option<usize>> {
        if self.bytes_available > 0 {
            return Ok(Some(self.bytes_available));
        }
        if self.flags.last_chunk_received || !self.transaction.response().has_body() {
            return Ok(Some(0));
        }
        let Some(buffer) = self.recv_buffer.as_mut() else {
            return Ok(None);
        };

        match self.transaction.parser_mut().parse_body(buffer)? {
            BodyChunk::Data { len, .. } => {
                self.bytes_available = len;
                Ok(Some(len))
            }
            BodyChunk::End => {
                tracing::trace!(socket = %self.id, "Parsed last response chunk");
                self.flags.last_chunk_received = true;
                Ok(Some(0))
            }
            BodyChunk::Again => Ok(None),
        }
    }

    fn step_recv_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<Flow> {
        while !mux.shutdown() {
            let Some(available) = self.current_chunk_bytes_available()? else {
                return Ok(Flow::Again);
            };

            if available == 0 {
                if self.transaction.parser().framing() == BodyFraming::Chunked {
                    if let Some(buffer) = self.recv_buffer.as_mut() {
                        if self.transaction.parser_mut().skip_trailer(buffer)? == Flow::Again {
                            return Ok(Flow::Again);
                        }
                    }
                }
                self.transition(ClientPhase::TransactionEnd)?;
                let (flow, _) = self.consume_body(mux, handler, body, &[])?;
                return Ok(match flow {
                    Flow::Again | Flow::Pause => Flow::Pause,
                    other => other,
                });
            }

            let Some(buffer) = self.recv_buffer.take() else {
                return Err(Error::InvalidState);
            };
            let result = self.consume_body(mux, handler, body, &buffer.readable_slice()[..available]);
            self.recv_buffer = Some(buffer);
            let (flow, consumed) = result?;

            let consumed = consumed.min(available);
            if consumed > 0 {
                if let Some(buffer) = self.recv_buffer.as_mut() {
                    self.transaction.parser_mut().consume_body(buffer, consumed)?;
                }
                self.bytes_available -= consumed;
                tracing::trace!(socket = %self.id, consumed, available, "Consumed response body");
            }

            match flow {
                Flow::Success if consumed == 0 => return Ok(Flow::Pause),
                Flow::Success => {}
                Flow::Break => return Ok(Flow::Break),
                Flow::Again | Flow::Pause => return Ok(Flow::Pause),
                other => return Ok(other),
            }
        }
        Ok(Flow::Shutdown)
    }

    fn offer_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<(Flow, u64)> {
        match body {
            Body::Handler => handler.offer_request_body(mux, self),
            Body::Produce(producer) => Ok(producer.offer()),
            Body::Consume(_) => Err(Error::NotSupported),
        }
    }

    fn produce_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
        out: &mut [u8],
    ) -> Result<Flow> {
        match body {
            Body::Handler => handler.produce_request_body(mux, self, out),
            Body::Produce(producer) => producer.produce(out),
            Body::Consume(_) => Err(Error::NotSupported),
        }
    }

    fn consume_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ClientHandler,
        body: &mut Body<'_, '_>,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        match body {
            Body::Handler => handler.consume_response_body(mux, self, chunk),
            Body::Consume(consumer) => Ok(consumer.consume(chunk)),
            Body::Produce(_) => Err(Error::NotSupported),
        }
    }

    // ---------------------------------------------------------------------
    // Socket I/O
    // ---------------------------------------------------------------------

    fn fill_recv_buffer(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        if self.recv_buffer.is_none() {
            let Some(buffer) = mux.acquire_buffer() else {
                tracing::error!(socket = %self.id, "Cannot acquire receive buffer");
                return Err(Error::OutOfMemory);
            };
            self.recv_buffer = Some(buffer);
        }
        let Some(buffer) = self.recv_buffer.as_mut() else {
            return Err(Error::InvalidState);
        };

        if !buffer.is_writable() && !buffer.compact() {
            tracing::info!(socket = %self.id, "Response parser jammed");
            return Err(Error::Overflow);
        }

        match self.socket.receive(buffer) {
            Ok(0) => {
                self.flags.note_transport_failure();
                Ok(Flow::Closed)
            }
            Ok(received) => {
                tracing::trace!(socket = %self.id, received, "Filled client receive buffer");
                self.flags.first_use_after_reuse = false;
                Ok(Flow::Success)
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => Ok(Flow::Again),
            Err(error) => {
                self.flags.note_transport_failure();
                Err(error.into())
            }
        }
    }

    fn flush(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        let Some(buffer) = self.send_buffer.as_mut() else {
            return Err(Error::InvalidState);
        };
        if !buffer.is_readable() {
            tracing::info!(socket = %self.id, "Request formatter jammed");
            return Err(Error::Overflow);
        }

        let mut flushed = false;
        while !mux.shutdown() && buffer.is_readable() {
            match self.socket.send(buffer) {
                Ok(sent) => {
                    flushed = true;
                    self.flags.first_use_after_reuse = false;
                    tracing::trace!(socket = %self.id, sent, "Flushed request bytes");
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    buffer.compact();
                    return Ok(if flushed { Flow::Success } else { Flow::Again });
                }
                Err(error) => {
                    self.flags.note_transport_failure();
                    tracing::info!(socket = %self.id, error = %error, "Cannot flush request bytes");
                    return Err(error.into());
                }
            }
        }

        if buffer.is_readable() {
            buffer.compact();
        } else {
            buffer.clear();
        }
        Ok(if mux.shutdown() { Flow::Shutdown } else { Flow::Success })
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        if self.recv_buffer.is_some() || self.send_buffer.is_some() {
            tracing::warn!(socket = %self.id, "Client socket dropped while holding buffers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_requires_an_inactive_connected_socket() {
        struct Closed;
        impl ConnectedSocket for Closed {
            fn name(&self) -> &str {
                "closed"
            }
            fn peer_address(&self) -> SocketAddr {
                "127.0.0.1:1".parse().unwrap()
            }
            fn connected(&self) -> bool {
                false
            }
            fn send(&mut self, _buffer: &mut ByteBuffer) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::NotConnected.into())
            }
            fn receive(&mut self, _buffer: &mut ByteBuffer) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::NotConnected.into())
            }
            fn close(&mut self) {}
        }

        let socket = ClientSocket::create(
            Box::new(Closed),
            ClientTransaction::default(),
            ClientSocketConfig::default(),
            Arc::new(ClientCounters::new()),
        );
        let mut socket = socket.borrow_mut();
        assert!(socket.want_connect());
        assert!(!socket.want_read());
        assert!(!socket.want_write());
        assert!(matches!(socket.reset(ClientTransaction::default()), Err(ExecuteError { error: Error::InvalidState, .. })));
        assert!(!socket.reusable());
    }
}
