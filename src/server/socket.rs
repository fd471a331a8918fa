//! Inbound HTTP connection state machine.
//!
//! # Data Flow
//! ```text
//! TransactionBegin → ParsingHeaders → ParsingBody → SkippingTrailer
//!     → FormattingHeaders → FormattingBody → FlushingBody → TransactionEnd
//!     → TransactionBegin (keep-alive) | Cleanup (close)
//! ```
//!
//! # Design Decisions
//! - A handler may answer before the request is fully read. The connection
//!   is then closed after the response because the unread remainder of the
//!   request cannot be skipped reliably.
//! - Malformed request headers are answered with 400, anything else that
//!   breaks header parsing with 500, without involving the handler.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Flow, Result};
use crate::http::message::{FilterResult, HttpRequest, HttpResponse, HTTP_1_1};
use crate::http::parser::BodyChunk;
use crate::http::transaction::{ServerTransaction, TransactionContext};
use crate::net::connection::ConnectionId;
use crate::observability::counters::ServerCounters;
use crate::server::handler::{ServerEndState, ServerHandler};
use crate::server::state::{ServerFlags, ServerPhase};
use crate::stream::{Body, ConnectedSocket, Drive, Interest, Multiplexer, SliceConsumer, SliceProducer};

#[derive(Debug, Clone, Copy)]
pub struct ServerSocketConfig {
    /// Close the connection after any response with status >= 300.
    pub close_after_error_response: bool,
}

impl Default for ServerSocketConfig {
    fn default() -> Self {
        Self {
            close_after_error_response: true,
        }
    }
}

pub struct ServerSocket {
    id: ConnectionId,
    handle: Weak<RefCell<ServerSocket>>,
    phase: ServerPhase,
    flags: ServerFlags,
    socket: Box<dyn ConnectedSocket>,
    transaction: ServerTransaction,
    recv_buffer: Option<ByteBuffer>,
    send_buffer: Option<ByteBuffer>,
    bytes_available: usize,
    body_bytes_written: u64,
    requests_per_connection: u64,
    config: ServerSocketConfig,
    counters: Arc<ServerCounters>,
}

impl ServerSocket {
    /// Freshly accepted connection waiting for its first request.
    pub fn create(
        socket: Box<dyn ConnectedSocket>,
        transaction: ServerTransaction,
        config: ServerSocketConfig,
        counters: Arc<ServerCounters>,
    ) -> Rc<RefCell<ServerSocket>> {
        Rc::new_cyclic(|handle| {
            RefCell::new(ServerSocket {
                id: ConnectionId::new(),
                handle: handle.clone(),
                phase: ServerPhase::TransactionBegin,
                flags: ServerFlags::default(),
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

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> Weak<RefCell<ServerSocket>> {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.socket.name()
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.socket.peer_address()
    }

    pub fn secure(&self) -> bool {
        self.socket.secure()
    }

    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    pub fn flags(&self) -> ServerFlags {
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

    pub fn response(&self) -> &HttpResponse {
        self.transaction.response()
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        self.transaction.response_mut()
    }

    pub fn context(&self) -> Option<&TransactionContext> {
        self.transaction.context()
    }

    pub fn set_context(&mut self, context: Option<TransactionContext>) {
        self.transaction.set_context(context);
    }

    pub fn body_bytes_written(&self) -> u64 {
        self.body_bytes_written
    }

    pub fn requests_per_connection(&self) -> u64 {
        self.requests_per_connection
    }

    pub fn mark_dead(&mut self) {
        self.flags.dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.flags.dead
    }

    pub fn want_read(&self) -> bool {
        if self.flags.recv_paused || self.flags.aborted || self.phase == ServerPhase::Inactive {
            return false;
        }
        if self.socket.want_read() {
            return true;
        }
        if self.socket.want_write() {
            return false;
        }
        self.phase == ServerPhase::TransactionBegin || self.phase.is_recv()
    }

    pub fn want_write(&self) -> bool {
        if self.flags.send_paused || self.flags.aborted || self.phase == ServerPhase::Inactive {
            return false;
        }
        if self.socket.want_write() {
            return true;
        }
        if self.socket.want_read() {
            return false;
        }
        self.phase.is_send()
    }

    pub fn interest(&self) -> Interest {
        Interest {
            read: self.want_read(),
            write: self.want_write(),
        }
    }

    fn transition(&mut self, to: ServerPhase) -> Result<()> {
        if !to.can_enter_from(self.phase) {
            tracing::warn!(
                socket = %self.id,
                from = self.phase.describe(),
                to = to.describe(),
                "Invalid server state transition"
            );
            return Err(Error::InvalidState);
        }
        self.phase = to;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reactor entry points
    // ---------------------------------------------------------------------

    pub fn handle_readable(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) -> Result<Flow> {
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

    pub fn handle_writable(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) -> Result<Flow> {
        if !self.want_write() || !self.socket.connected() {
            return Err(Error::InvalidState);
        }
        self.advance_state_machine(mux, handler, &mut Body::Handler, Drive::ADVANCE_RECV | Drive::ADVANCE_SEND)
    }

    pub fn handle_error(&self, error: &Error) {
        tracing::info!(socket = %self.id, error = %error, state = self.describe_state(), "Server socket error");
    }

    pub fn handle_remote_close(&self) {
        tracing::info!(socket = %self.id, state = self.describe_state(), "Remote client closed socket");
    }

    pub fn handle_idle(&self) {
        tracing::info!(
            socket = %self.id,
            state = self.describe_state(),
            flags = self.describe_flags(),
            "Server socket idle"
        );
    }

    pub fn handle_remove(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) {
        if self.phase == ServerPhase::Inactive {
            return;
        }
        tracing::debug!(socket = %self.id, state = self.describe_state(), "Closing server socket");
        // a keep-alive connection closing between requests is not a failed exchange
        let between_requests = self.phase == ServerPhase::TransactionBegin
            || (self.phase == ServerPhase::ParsingHeaders
                && self.transaction.parser().awaiting_start_line()
                && !self.recv_buffer.as_ref().is_some_and(ByteBuffer::is_readable));
        self.socket.close();
        if let Some(buffer) = self.send_buffer.take() {
            mux.release_buffer(buffer);
        }
        if let Some(buffer) = self.recv_buffer.take() {
            mux.release_buffer(buffer);
        }

        let state = match self.phase {
            ServerPhase::TransactionBegin | ServerPhase::ParsingHeaders => Some(ServerEndState::RecvRequestHeaders),
            ServerPhase::ParsingBody | ServerPhase::SkippingTrailer => Some(ServerEndState::RecvRequestBody),
            ServerPhase::FormattingHeaders => Some(ServerEndState::SendResponseHeaders),
            ServerPhase::FormattingBody | ServerPhase::FlushingBody => Some(ServerEndState::SendResponseBody),
            ServerPhase::TransactionEnd | ServerPhase::Inactive => None,
        };
        if let Some(state) = state {
            handler.end_transaction(mux, self, state);
            if !between_requests {
                self.counters.record_failure();
            }
        }

        let transaction = std::mem::take(&mut self.transaction);
        mux.destroy_server_transaction(transaction);
        self.phase = ServerPhase::Inactive;
        self.counters.record_connection_closed(self.requests_per_connection);
        self.requests_per_connection = 0;
    }

    // ---------------------------------------------------------------------
    // Flow control
    // ---------------------------------------------------------------------

    pub fn abort(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        tracing::debug!(socket = %self.id, state = self.describe_state(), "Server connection aborted");
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
        if self.phase == ServerPhase::Inactive || self.flags.aborted {
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
        if !self.flags.recv_paused {
            self.flags.recv_paused = true;
            self.update_interest(mux, update)?;
        }
        Ok(())
    }

    pub fn resume_recv(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if self.flags.recv_paused {
            self.flags.recv_paused = false;
            self.update_interest(mux, update)?;
        }
        Ok(())
    }

    pub fn pause_send(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if !self.flags.send_paused {
            self.flags.send_paused = true;
            self.update_interest(mux, update)?;
        }
        Ok(())
    }

    pub fn resume_send(&mut self, mux: &mut dyn Multiplexer, update: bool) -> Result<()> {
        self.check_adjustable()?;
        if self.flags.send_paused {
            self.flags.send_paused = false;
            self.update_interest(mux, update)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Responses
    // ---------------------------------------------------------------------

    /// Replace the pending response with a bodyless `status`.
    pub fn set_response(&mut self, status: u16, reason: &str) {
        let close = self.transaction.request().version() >= HTTP_1_1
            && (!self.transaction.request().reuse_connection() || self.config.close_after_error_response);

        let response = self.transaction.response_mut();
        response.set_status(status);
        response.set_reason(reason);
        response.set_has_body(false);
        response.add_header("Content-Length", "0");
        if close {
            response.add_header("Connection", "close");
        }
        tracing::debug!(socket = %self.id, status, reason, "Created response");
    }

    /// Set a bodyless response and push it out as far as the socket allows.
    pub fn send_empty_response(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        status: u16,
        reason: &str,
    ) -> Result<Flow> {
        self.set_response(status, reason);
        self.drive_sync(mux, handler, &mut Body::Handler, Drive::ADVANCE_SEND)
    }

    /// Copy `response` through `filter` and start sending it. The body is
    /// pulled from the handler's `offer_response_body`.
    pub fn send_response<F>(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        response: &HttpResponse,
        filter: F,
    ) -> Result<Flow>
    where
        F: FnMut(&str, &str) -> FilterResult,
    {
        tracing::debug!(socket = %self.id, status = response.status(), "Sending response");
        self.transaction.response_mut().copy_from(response, filter)?;
        self.drive_sync(mux, handler, &mut Body::Handler, Drive::ADVANCE_SEND)
    }

    /// Push `chunk` as response body. An empty chunk ends the body.
    pub fn send_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        if self.phase != ServerPhase::FormattingBody {
            return Err(Error::InvalidState);
        }
        let mut producer = SliceProducer::new(chunk);
        let flow = self.drive_sync(mux, handler, &mut Body::Produce(&mut producer), Drive::ADVANCE_SEND)?;
        Ok((flow, producer.produced()))
    }

    pub fn request_body_available(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
    ) -> Result<(Flow, Option<u64>)> {
        let mut empty: [u8; 0] = [];
        let mut consumer = SliceConsumer::new(&mut empty);
        let flow = self.drive_sync(mux, handler, &mut Body::Consume(&mut consumer), Drive::ADVANCE_RECV)?;
        Ok((flow, consumer.offered()))
    }

    pub fn read_request_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        out: &mut [u8],
    ) -> Result<(Flow, usize)> {
        let mut consumer = SliceConsumer::new(out);
        let flow = self.drive_sync(mux, handler, &mut Body::Consume(&mut consumer), Drive::ADVANCE_RECV)?;
        Ok((flow, consumer.consumed()))
    }

    fn drive_sync(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
        drive: Drive,
    ) -> Result<Flow> {
        let flow = self.advance_state_machine(mux, handler, body, drive | Drive::UPDATE_MULTIPLEXER)?;
        if matches!(flow, Flow::Closed | Flow::Cleanup | Flow::Shutdown) {
            mux.remove_multiplexed_socket(self.id)?;
        } else {
            mux.update_multiplexed_socket(self.id, self.interest())?;
        }
        Ok(flow)
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    pub fn advance_state_machine(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
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
                        return Ok(Flow::Closed);
                    }
                    Ok(flow) => return Ok(flow),
                    Err(error) => {
                        self.handle_error(&error);
                        return Err(error);
                    }
                }
            }

            let flow = match self.phase {
                ServerPhase::TransactionBegin => self.step_begin(mux, handler)?,
                ServerPhase::ParsingHeaders => self.step_recv_headers(mux, handler)?,
                ServerPhase::ParsingBody => self.step_recv_body(mux, handler, body)?,
                ServerPhase::SkippingTrailer => self.step_skip_trailer()?,
                ServerPhase::FormattingHeaders => self.step_send_headers(mux)?,
                ServerPhase::FormattingBody => self.step_send_body(mux, handler, body)?,
                ServerPhase::FlushingBody => match self.step_flush(mux)? {
                    // never write to a full socket twice in a row
                    Flow::Again => return Ok(Flow::Again),
                    other => other,
                },
                ServerPhase::TransactionEnd => self.step_end(mux, handler)?,
                ServerPhase::Inactive => {
                    tracing::warn!(socket = %self.id, "Cannot advance inactive server socket");
                    return Err(Error::InvalidState);
                }
            };

            match flow {
                Flow::Cleanup => return Ok(Flow::Cleanup),
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

    fn step_begin(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) -> Result<Flow> {
        // cleared once the request has been read completely
        self.flags.cannot_reuse = true;
        let peer = self.socket.peer_address();
        self.transaction.set_peer_address(peer);

        match handler.begin_transaction(mux, self)? {
            Flow::Success => {}
            Flow::Again | Flow::Pause => return Ok(Flow::Pause),
            Flow::SendResponse => {
                self.transition(ServerPhase::FormattingHeaders)?;
                return Ok(Flow::Success);
            }
            other => {
                tracing::debug!(socket = %self.id, flow = %other, "Handler refused transaction");
                return Ok(other);
            }
        }

        self.transition(ServerPhase::ParsingHeaders)?;
        Ok(Flow::Success)
    }

    fn step_recv_headers(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) -> Result<Flow> {
        let Some(buffer) = self.recv_buffer.as_mut() else {
            return Ok(Flow::Again);
        };

        let parts = self.transaction.parts_mut();
        match parts.parser.parse_headers(buffer, parts.request) {
            Ok(Flow::Again) => return Ok(Flow::Again),
            Ok(_) => {}
            Err(error) => {
                tracing::info!(socket = %self.id, error = %error, "Cannot parse request headers");
                if error.is_http_error() {
                    self.set_response(400, "Bad Request");
                } else {
                    self.set_response(500, "Internal Server Error");
                }
                self.transition(ServerPhase::FormattingHeaders)?;
                return Ok(Flow::Success);
            }
        }

        let request = self.transaction.request();
        tracing::debug!(
            socket = %self.id,
            method = request.method(),
            path = request.uri().path().unwrap_or(""),
            version = request.version(),
            "Received request headers"
        );
        self.transition(ServerPhase::ParsingBody)?;

        match handler.receive_request_headers(mux, self)? {
            Flow::Success => Ok(Flow::Success),
            Flow::Pause | Flow::Again => Ok(Flow::Pause),
            Flow::SendResponse => {
                self.transition(ServerPhase::FormattingHeaders)?;
                Ok(Flow::Success)
            }
            other => {
                tracing::debug!(socket = %self.id, flow = %other, "Handler aborted at request headers");
                Ok(other)
            }
        }
    }

    fn current_chunk_bytes_available(&mut self) -> Result<Option<usize>> {
        if self.bytes_available > 0 {
            return Ok(Some(self.bytes_available));
        }
        if self.flags.last_chunk_received || !self.transaction.request().has_body() {
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
                self.flags.last_chunk_received = true;
                Ok(Some(0))
            }
            BodyChunk::Again => Ok(None),
        }
    }

    fn step_recv_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<Flow> {
        while !mux.shutdown() {
            let Some(available) = self.current_chunk_bytes_available()? else {
                return Ok(Flow::Again);
            };

            if available == 0 {
                self.transition(ServerPhase::SkippingTrailer)?;
                let (flow, _) = self.consume_body(mux, handler, body, &[])?;
                return Ok(match flow {
                    Flow::Break => Flow::Break,
                    Flow::Success | Flow::SendResponse => Flow::Success,
                    Flow::Pause | Flow::Again => Flow::Pause,
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
            }

            match flow {
                Flow::Break => return Ok(Flow::Break),
                Flow::Success if consumed == 0 => return Ok(Flow::Pause),
                Flow::Success => {}
                Flow::Again | Flow::Pause => return Ok(Flow::Pause),
                Flow::SendResponse => {
                    tracing::debug!(socket = %self.id, "Handler responding before end of request body");
                    self.transition(ServerPhase::FormattingHeaders)?;
                    return Ok(Flow::Success);
                }
                other => return Ok(other),
            }
        }
        Ok(Flow::Shutdown)
    }

    fn step_skip_trailer(&mut self) -> Result<Flow> {
        let Some(buffer) = self.recv_buffer.as_mut() else {
            return Ok(Flow::Again);
        };
        match self.transaction.parser_mut().skip_trailer(buffer)? {
            Flow::Again => Ok(Flow::Again),
            _ => {
                // the next request must still wait for this response
                self.flags.cannot_reuse = false;
                self.transition(ServerPhase::FormattingHeaders)?;
                Ok(Flow::Success)
            }
        }
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
        if !parts.formatter.headers_complete()
            && parts.formatter.format_headers(buffer, &*parts.response)? == Flow::Again
        {
            return Ok(Flow::Again);
        }
        // bodyless responses never reach the handler's body callbacks
        let has_body = parts.response.has_body();
        if !has_body && parts.formatter.end_body(buffer)? == Flow::Again {
            return Ok(Flow::Again);
        }
        tracing::debug!(
            socket = %self.id,
            status = self.transaction.response().status(),
            has_body,
            "Formatted response headers"
        );
        self.transition(ServerPhase::FormattingBody)?;
        if !has_body {
            self.transition(ServerPhase::FlushingBody)?;
        }
        Ok(Flow::Success)
    }

    fn step_send_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<Flow> {
        while !mux.shutdown() {
            let (flow, offered) = self.offer_body(mux, handler, body)?;
            match flow {
                Flow::Success => {}
                Flow::Cleanup => return Ok(Flow::Cleanup),
                Flow::Again | Flow::Pause => return self.wait_for_body(mux),
                Flow::Break => return Ok(Flow::Break),
                other => return Ok(other),
            }

            let Some(buffer) = self.send_buffer.as_mut() else {
                return Err(Error::InvalidState);
            };

            if offered == 0 {
                if self.transaction.parts_mut().formatter.end_body(buffer)? == Flow::Again {
                    return Ok(Flow::Again);
                }
                self.transition(ServerPhase::FlushingBody)?;
                return Ok(Flow::Success);
            }

            let block_start = buffer.write_position();
            let Some(size) = self.transaction.parts_mut().formatter.begin_block(buffer, offered)? else {
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
                    // nothing was produced, so the opened block must not reach the wire
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
                return Err(Error::Overflow);
            }
            tracing::trace!(socket = %self.id, size, "Formatted response chunk");
        }
        Ok(Flow::Shutdown)
    }

    /// The body source is blocked: push out what is already formatted and
    /// stop asking for write readiness until the handler resumes sending.
    fn wait_for_body(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
            self.flush(mux)?;
        }
        if !self.flags.aborted {
            self.pause_send(mux, false)?;
        }
        tracing::trace!(socket = %self.id, "Response body source blocked");
        Ok(Flow::Pause)
    }

    fn step_flush(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
            let flow = self.flush(mux)?;
            if flow != Flow::Success {
                return Ok(flow);
            }
            if self.send_buffer.as_ref().is_some_and(ByteBuffer::is_readable) {
                return Ok(Flow::Again);
            }
        }
        self.transition(ServerPhase::TransactionEnd)?;
        Ok(Flow::Success)
    }

    fn step_end(&mut self, mux: &mut dyn Multiplexer, handler: &mut dyn ServerHandler) -> Result<Flow> {
        self.requests_per_connection += 1;
        handler.end_transaction(mux, self, ServerEndState::End);
        self.counters.record_success();

        if self.flags.cannot_reuse {
            tracing::debug!(socket = %self.id, "Request not fully read, closing connection");
            return Ok(Flow::Cleanup);
        }
        if self.config.close_after_error_response && self.transaction.response().status() >= 300 {
            return Ok(Flow::Cleanup);
        }
        if !self.transaction.request().reuse_connection() {
            return Ok(Flow::Cleanup);
        }

        self.transition(ServerPhase::TransactionBegin)?;
        self.flags = ServerFlags::default();
        self.bytes_available = 0;
        self.body_bytes_written = 0;
        self.transaction.reset();
        Ok(Flow::Success)
    }

    fn offer_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
    ) -> Result<(Flow, u64)> {
        match body {
            Body::Handler => handler.offer_response_body(mux, self),
            Body::Produce(producer) => Ok(producer.offer()),
            Body::Consume(_) => Err(Error::NotSupported),
        }
    }

    fn produce_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
        out: &mut [u8],
    ) -> Result<Flow> {
        match body {
            Body::Handler => handler.produce_response_body(mux, self, out),
            Body::Produce(producer) => producer.produce(out),
            Body::Consume(_) => Err(Error::NotSupported),
        }
    }

    fn consume_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        handler: &mut dyn ServerHandler,
        body: &mut Body<'_, '_>,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        match body {
            Body::Handler => handler.consume_request_body(mux, self, chunk),
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
            tracing::info!(socket = %self.id, "Request parser jammed");
            return Err(Error::Overflow);
        }

        match self.socket.receive(buffer) {
            Ok(0) => Ok(Flow::Closed),
            Ok(received) => {
                tracing::trace!(socket = %self.id, received, "Filled server receive buffer");
                Ok(Flow::Success)
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => Ok(Flow::Again),
            Err(error) => Err(error.into()),
        }
    }

    fn flush(&mut self, mux: &mut dyn Multiplexer) -> Result<Flow> {
        let Some(buffer) = self.send_buffer.as_mut() else {
            return Err(Error::InvalidState);
        };
        if !buffer.is_readable() {
            tracing::info!(socket = %self.id, "Response formatter jammed");
            return Err(Error::Overflow);
        }

        let mut flushed = false;
        while !mux.shutdown() && buffer.is_readable() {
            match self.socket.send(buffer) {
                Ok(_) => flushed = true,
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    buffer.compact();
                    return Ok(if flushed { Flow::Success } else { Flow::Again });
                }
                Err(error) => {
                    tracing::info!(socket = %self.id, error = %error, "Cannot flush response bytes");
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
