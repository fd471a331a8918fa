//! Callbacks a client socket makes into application code.

use crate::client::socket::ClientSocket;
use crate::error::{Flow, Result};
use crate::stream::Multiplexer;

/// Phase a client transaction had reached when it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEndState {
    /// Never started, or a stale pooled connection could not be replaced.
    Begin,
    Connect,
    SendRequestHeaders,
    SendRequestBody,
    RecvResponseHeaders,
    RecvResponseBody,
    /// The response was received completely.
    End,
}

/// Application side of an outbound transaction.
///
/// Every callback receives the multiplexer and the socket it was invoked
/// from, so a handler may drive other sockets (or call the synchronous
/// body APIs of this one) from inside the callback.
pub trait ClientHandler {
    /// The connection is ready for a new request. `Success` starts sending.
    fn begin_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow>;

    /// How many request body bytes can be produced now. 0 ends the body.
    fn offer_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<(Flow, u64)>;

    /// Fill `out` completely with request body bytes.
    fn produce_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, out: &mut [u8]) -> Result<Flow>;

    /// The whole request has been written to the socket.
    fn end_request(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket) -> Result<Flow> {
        Ok(Flow::Success)
    }

    fn receive_response_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow>;

    /// Take up to `chunk.len()` body bytes; an empty chunk ends the body.
    fn consume_response_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, chunk: &[u8]) -> Result<(Flow, usize)>;

    /// Called exactly once per transaction.
    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, state: ClientEndState);
}
