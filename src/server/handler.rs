//! Callbacks a server socket makes into application code.

use std::net::SocketAddr;

use crate::error::{Flow, Result};
use crate::server::socket::ServerSocket;
use crate::stream::Multiplexer;

/// Phase an inbound transaction had reached when it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEndState {
    RecvRequestHeaders,
    RecvRequestBody,
    SendResponseHeaders,
    SendResponseBody,
    /// The response was written completely.
    End,
}

/// Application side of an inbound transaction.
pub trait ServerHandler {
    /// A connection was accepted. Anything but `Success` closes it.
    fn accept_connection(&mut self, _mux: &mut dyn Multiplexer, _address: SocketAddr) -> Result<Flow> {
        Ok(Flow::Success)
    }

    /// A new request may arrive. `SendResponse` answers without reading it.
    fn begin_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow>;

    /// Request headers are parsed. `SendResponse` answers immediately with
    /// whatever response the handler has set.
    fn receive_request_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow>;

    /// Take up to `chunk.len()` body bytes; an empty chunk ends the body.
    fn consume_request_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)>;

    /// How many response body bytes can be produced now. 0 ends the body.
    fn offer_response_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<(Flow, u64)>;

    /// Fill `out` completely with response body bytes.
    fn produce_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        out: &mut [u8],
    ) -> Result<Flow>;

    /// Called once per begun transaction, and for connections that closed
    /// before a request arrived.
    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket, state: ServerEndState);
}
