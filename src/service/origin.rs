//! Origin server: answers every request with a generated body.

use std::cell::Cell;
use std::rc::Rc;

use crate::config::schema::OriginConfig;
use crate::error::{Error, Flow, Result};
use crate::server::{ServerEndState, ServerHandler, ServerSocket};
use crate::stream::Multiplexer;

/// Byte at `offset` of every generated body. Clients use it to check that
/// nothing was lost or reordered on the way.
pub fn body_byte(offset: u64) -> u8 {
    b'a' + (offset % 26) as u8
}

/// Per-transaction progress, kept in the server socket's context.
#[derive(Debug, Default)]
struct Exchange {
    sent: Cell<u64>,
    received: Cell<u64>,
}

fn exchange_of(stream: &ServerSocket) -> Result<Rc<Exchange>> {
    let context = stream.context().ok_or(Error::InvalidState)?;
    Rc::clone(context).downcast::<Exchange>().map_err(|_| Error::InvalidState)
}

#[derive(Debug, Clone)]
pub struct OriginHandler {
    body_size: u64,
    max_chunk: u64,
    completed: u64,
    failed: u64,
}

impl OriginHandler {
    pub fn new(config: &OriginConfig) -> Self {
        Self {
            body_size: config.body_size as u64,
            max_chunk: config.max_chunk.max(1) as u64,
            completed: 0,
            failed: 0,
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl ServerHandler for OriginHandler {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        stream.set_context(Some(Rc::new(Exchange::default())));
        Ok(Flow::Success)
    }

    fn receive_request_headers(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        let body_size = self.body_size;
        let response = stream.response_mut();
        response.set_status(200);
        response.set_reason("OK");
        response.set_has_body(body_size > 0);
        response.add_header("Content-Length", body_size.to_string());
        response.add_header("Content-Type", "application/octet-stream");
        Ok(Flow::Success)
    }

    fn consume_request_body(
        &mut self,
        _mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let exchange = exchange_of(stream)?;
        exchange.received.set(exchange.received.get() + chunk.len() as u64);
        Ok((Flow::Success, chunk.len()))
    }

    fn offer_response_body(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<(Flow, u64)> {
        if !stream.response().has_body() {
            return Ok((Flow::Success, 0));
        }
        let exchange = exchange_of(stream)?;
        let remaining = self.body_size.saturating_sub(exchange.sent.get());
        Ok((Flow::Success, remaining.min(self.max_chunk)))
    }

    fn produce_response_body(
        &mut self,
        _mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        let exchange = exchange_of(stream)?;
        let start = exchange.sent.get();
        for (offset, byte) in (start..).zip(out.iter_mut()) {
            *byte = body_byte(offset);
        }
        exchange.sent.set(start + out.len() as u64);
        Ok(Flow::Success)
    }

    fn end_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket, state: ServerEndState) {
        if state == ServerEndState::End {
            self.completed += 1;
            return;
        }
        // a keep-alive connection closing between requests never began one
        if let Ok(exchange) = exchange_of(stream) {
            if state != ServerEndState::RecvRequestHeaders || exchange.received.get() > 0 {
                self.failed += 1;
            }
            tracing::debug!(
                socket = %stream.id(),
                state = ?state,
                sent = exchange.sent.get(),
                "Origin transaction ended early"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_bytes_cycle_through_the_alphabet() {
        assert_eq!(body_byte(0), b'a');
        assert_eq!(body_byte(25), b'z');
        assert_eq!(body_byte(26), b'a');
    }

    #[test]
    fn chunk_size_is_never_zero() {
        let handler = OriginHandler::new(&OriginConfig {
            body_size: 10,
            max_chunk: 0,
        });
        assert_eq!(handler.max_chunk, 1);
    }
}
