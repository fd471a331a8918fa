//! Shared utilities for state machine and end-to-end tests.
//!
//! `pipe()` stands in for a connected TCP stream, `MockMultiplexer` for the
//! reactor, and the recording handlers keep every callback they see.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use evented_http::buffer::ByteBuffer;
use evented_http::client::{ClientEndState, ClientHandler, ClientSocket};
use evented_http::error::{Error, Flow, Result};
use evented_http::http::transaction::{ClientTransaction, ServerTransaction};
use evented_http::net::ConnectionId;
use evented_http::server::{ServerEndState, ServerHandler, ServerSocket};
use evented_http::stream::{ConnectedSocket, ExecuteError, Interest, Multiplexer};

pub const BUFFER_SIZE: usize = 4096;

pub fn peer() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

// ---------------------------------------------------------------------------
// In-memory socket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PipeState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    /// Sends fail as if the peer reset the connection.
    peer_reset: bool,
    closed: bool,
    /// Bytes `send` accepts before reporting `WouldBlock`.
    send_limit: Option<usize>,
    /// Largest single `receive`.
    recv_chunk: usize,
}

/// Test side of a [`PipeSocket`].
#[derive(Debug, Clone)]
pub struct Pipe(Rc<RefCell<PipeState>>);

impl Pipe {
    /// Bytes the socket will receive next.
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Everything the socket sent since the last call.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().outbound)
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.take_output()).into_owned()
    }

    /// Receives return end of stream once the pending bytes are read.
    pub fn close_peer(&self) {
        self.0.borrow_mut().peer_closed = true;
    }

    pub fn reset_peer(&self) {
        self.0.borrow_mut().peer_reset = true;
    }

    pub fn set_send_limit(&self, limit: Option<usize>) {
        self.0.borrow_mut().send_limit = limit;
    }

    pub fn set_recv_chunk(&self, chunk: usize) {
        self.0.borrow_mut().recv_chunk = chunk.max(1);
    }

    /// The socket side called `close`.
    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }
}

pub struct PipeSocket {
    name: String,
    peer: SocketAddr,
    state: Rc<RefCell<PipeState>>,
}

pub fn pipe() -> (Box<dyn ConnectedSocket>, Pipe) {
    let state = Rc::new(RefCell::new(PipeState {
        inbound: VecDeque::new(),
        outbound: Vec::new(),
        peer_closed: false,
        peer_reset: false,
        closed: false,
        send_limit: None,
        recv_chunk: usize::MAX,
    }));
    let socket = PipeSocket {
        name: format!("pipe:{}", peer()),
        peer: peer(),
        state: Rc::clone(&state),
    };
    (Box::new(socket), Pipe(state))
}

impl ConnectedSocket for PipeSocket {
    fn name(&self) -> &str {
        &self.name
    }

    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    fn connected(&self) -> bool {
        !self.state.borrow().closed
    }

    fn send(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if state.peer_reset {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        let mut n = buffer.readable();
        if let Some(limit) = state.send_limit.as_mut() {
            n = n.min(*limit);
            *limit -= n;
        }
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        state.outbound.extend_from_slice(&buffer.readable_slice()[..n]);
        buffer.skip(n);
        Ok(n)
    }

    fn receive(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if state.inbound.is_empty() {
            if state.peer_closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buffer.writable().min(state.inbound.len()).min(state.recv_chunk);
        let out = buffer.writable_slice();
        for (slot, byte) in out.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        buffer.advance_write(n);
        Ok(n)
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockMultiplexer {
    pub shutdown: bool,
    pub refuse_execute: bool,
    pub acquired: usize,
    pub released: usize,
    pub updates: Vec<(ConnectionId, Interest)>,
    pub removed: Vec<ConnectionId>,
    pub executed: Vec<ClientTransaction>,
    pub destroyed_client: usize,
    pub destroyed_server: usize,
}

impl MockMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_interest(&self, id: ConnectionId) -> Option<Interest> {
        self.updates
            .iter()
            .rev()
            .find(|(updated, _)| *updated == id)
            .map(|(_, interest)| *interest)
    }

    pub fn buffers_outstanding(&self) -> usize {
        self.acquired - self.released
    }
}

impl Multiplexer for MockMultiplexer {
    fn shutdown(&self) -> bool {
        self.shutdown
    }

    fn acquire_buffer(&mut self) -> Option<ByteBuffer> {
        self.acquired += 1;
        Some(ByteBuffer::new(BUFFER_SIZE))
    }

    fn release_buffer(&mut self, _buffer: ByteBuffer) {
        self.released += 1;
    }

    fn destroy_client_transaction(&mut self, _transaction: ClientTransaction) {
        self.destroyed_client += 1;
    }

    fn destroy_server_transaction(&mut self, _transaction: ServerTransaction) {
        self.destroyed_server += 1;
    }

    fn execute_client_transaction(&mut self, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError> {
        if self.refuse_execute {
            return Err(ExecuteError {
                error: Error::NotSupported,
                transaction,
            });
        }
        self.executed.push(transaction);
        Ok(())
    }

    fn update_multiplexed_socket(&mut self, id: ConnectionId, interest: Interest) -> Result<()> {
        self.updates.push((id, interest));
        Ok(())
    }

    fn remove_multiplexed_socket(&mut self, id: ConnectionId) -> Result<()> {
        self.removed.push(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Answers every request with `status` and `body`, recording what it saw.
pub struct RecordingServer {
    pub status: u16,
    pub body: Vec<u8>,
    pub chunked: bool,
    /// Status sent from `begin_transaction` without reading the request.
    pub reject_with: Option<u16>,
    pub pause_at_headers: bool,
    /// The next body offer reports the source as blocked.
    pub block_offer_once: bool,
    /// The next produce call writes nothing and pauses.
    pub block_produce_once: bool,
    pub begins: usize,
    pub offers: usize,
    pub paths: Vec<String>,
    pub request_bodies: Vec<Vec<u8>>,
    pub ends: Vec<ServerEndState>,
    current_body: Vec<u8>,
    sent: usize,
}

impl RecordingServer {
    pub fn new(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            body: body.to_vec(),
            chunked: false,
            reject_with: None,
            pause_at_headers: false,
            block_offer_once: false,
            block_produce_once: false,
            begins: 0,
            offers: 0,
            paths: Vec::new(),
            request_bodies: Vec::new(),
            ends: Vec::new(),
            current_body: Vec::new(),
            sent: 0,
        }
    }
}

impl ServerHandler for RecordingServer {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.begins += 1;
        self.sent = 0;
        self.current_body.clear();
        if let Some(status) = self.reject_with {
            stream.set_response(status, "Service Unavailable");
            return Ok(Flow::SendResponse);
        }
        Ok(Flow::Success)
    }

    fn receive_request_headers(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.paths.push(stream.request().uri().path().unwrap_or("").to_string());
        let length = self.body.len();
        let chunked = self.chunked;
        let response = stream.response_mut();
        response.set_status(self.status);
        response.set_reason("OK");
        response.set_has_body(length > 0);
        if chunked {
            response.add_header("Transfer-Encoding", "chunked");
        } else {
            response.add_header("Content-Length", length.to_string());
        }
        if self.pause_at_headers {
            return Ok(Flow::Pause);
        }
        Ok(Flow::Success)
    }

    fn consume_request_body(
        &mut self,
        _mux: &mut dyn Multiplexer,
        _stream: &mut ServerSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        if chunk.is_empty() {
            self.request_bodies.push(std::mem::take(&mut self.current_body));
            return Ok((Flow::Success, 0));
        }
        self.current_body.extend_from_slice(chunk);
        Ok((Flow::Success, chunk.len()))
    }

    fn offer_response_body(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<(Flow, u64)> {
        self.offers += 1;
        if std::mem::take(&mut self.block_offer_once) {
            return Ok((Flow::Again, 0));
        }
        if !stream.response().has_body() {
            return Ok((Flow::Success, 0));
        }
        Ok((Flow::Success, (self.body.len() - self.sent) as u64))
    }

    fn produce_response_body(
        &mut self,
        _mux: &mut dyn Multiplexer,
        _stream: &mut ServerSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        if std::mem::take(&mut self.block_produce_once) {
            return Ok(Flow::Pause);
        }
        out.copy_from_slice(&self.body[self.sent..self.sent + out.len()]);
        self.sent += out.len();
        Ok(Flow::Success)
    }

    fn end_transaction(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ServerSocket, state: ServerEndState) {
        self.ends.push(state);
    }
}

/// Sends `request_body` and collects the response.
#[derive(Default)]
pub struct RecordingClient {
    pub request_body: Vec<u8>,
    pub pause_at_headers: bool,
    /// `begin_transaction` fails instead of starting the request.
    pub fail_begin: bool,
    pub block_produce_once: bool,
    pub statuses: Vec<u16>,
    pub response_body: Vec<u8>,
    pub response_ended: bool,
    pub ends: Vec<ClientEndState>,
    sent: usize,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientHandler for RecordingClient {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket) -> Result<Flow> {
        if self.fail_begin {
            return Err(Error::InvalidState);
        }
        self.sent = 0;
        self.response_ended = false;
        Ok(Flow::Success)
    }

    fn offer_request_body(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket) -> Result<(Flow, u64)> {
        Ok((Flow::Success, (self.request_body.len() - self.sent) as u64))
    }

    fn produce_request_body(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket, out: &mut [u8]) -> Result<Flow> {
        if std::mem::take(&mut self.block_produce_once) {
            return Ok(Flow::Again);
        }
        out.copy_from_slice(&self.request_body[self.sent..self.sent + out.len()]);
        self.sent += out.len();
        Ok(Flow::Success)
    }

    fn receive_response_headers(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        self.statuses.push(stream.response().status());
        if self.pause_at_headers {
            return Ok(Flow::Pause);
        }
        Ok(Flow::Success)
    }

    fn consume_response_body(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket, chunk: &[u8]) -> Result<(Flow, usize)> {
        if chunk.is_empty() {
            self.response_ended = true;
        }
        self.response_body.extend_from_slice(chunk);
        Ok((Flow::Success, chunk.len()))
    }

    fn end_transaction(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket, state: ClientEndState) {
        self.ends.push(state);
    }
}
