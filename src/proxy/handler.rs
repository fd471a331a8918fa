//! Forwarding between an inbound server socket and an outbound client socket.
//!
//! # Data Flow
//! ```text
//! inbound request headers
//!     → copy request (hop-by-hop headers dropped) → Router → execute outbound
//!     → inbound paused both ways until the outbound side pulls the body
//! outbound response headers
//!     → ServerSocket::send_response (body pulled from the outbound socket)
//! ```
//!
//! # Design Decisions
//! - One handler serves both sides. Top-level callbacks find the peer socket
//!   through the shared [`ProxyContext`]; nested callbacks (made while the
//!   peer is already borrowed) go through [`ServerSide`] / [`ClientSide`],
//!   which carry the peer as a plain `&mut`.
//! - Whenever one side blocks, the matching `on_*_blocked` helper resumes the
//!   blocked direction and pauses the opposite direction of the other side,
//!   so neither side reads more than one buffer ahead of the other.

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::{ClientEndState, ClientHandler, ClientSocket};
use crate::error::{Error, Flow, Result};
use crate::http::message::FilterResult;
use crate::proxy::context::{context_of, erase, ProxyContext, SharedContext};
use crate::proxy::router::Router;
use crate::server::{ServerEndState, ServerHandler, ServerSocket};
use crate::stream::Multiplexer;

const HOP_BY_HOP: [&str; 6] = ["Connection", "Keep-Alive", "Proxy-Connection", "TE", "Trailer", "Upgrade"];

/// Header filter applied in both directions. Transfer-Encoding is kept
/// because bodies are relayed with their original framing.
pub fn hop_by_hop_filter(name: &str, _value: &str) -> FilterResult {
    if HOP_BY_HOP.iter().any(|hop| hop.eq_ignore_ascii_case(name)) {
        FilterResult::Skip
    } else {
        FilterResult::Copy
    }
}

/// Routing reverse proxy built from a server and a client state machine.
pub struct ProxyHandler {
    router: Box<dyn Router>,
}

impl ProxyHandler {
    pub fn new(router: Box<dyn Router>) -> Self {
        Self { router }
    }
}

/// Server callbacks made while the paired client socket is borrowed.
struct ServerSide<'a> {
    proxy: &'a ProxyHandler,
    client: &'a mut ClientSocket,
}

/// Client callbacks made while the paired server socket is borrowed.
struct ClientSide<'a> {
    proxy: &'a ProxyHandler,
    server: &'a mut ServerSocket,
}

fn server_context(server: &ServerSocket) -> Result<SharedContext> {
    context_of(server.context()).ok_or(Error::InvalidState)
}

fn client_context(client: &ClientSocket) -> Result<SharedContext> {
    context_of(client.context()).ok_or(Error::InvalidState)
}

// -------------------------------------------------------------------------
// Backpressure
// -------------------------------------------------------------------------

fn on_client_recv_blocked(mux: &mut dyn Multiplexer, server: &mut ServerSocket, client: &mut ClientSocket) -> Result<()> {
    client.resume_recv(mux, true)?;
    server.pause_send(mux, true)?;
    tracing::trace!(client = %client.id(), server = %server.id(), "Client receive blocked");
    Ok(())
}

fn on_server_recv_blocked(mux: &mut dyn Multiplexer, server: &mut ServerSocket, client: &mut ClientSocket) -> Result<()> {
    server.resume_recv(mux, true)?;
    client.pause_send(mux, true)?;
    tracing::trace!(client = %client.id(), server = %server.id(), "Server receive blocked");
    Ok(())
}

fn on_client_send_blocked(mux: &mut dyn Multiplexer, server: &mut ServerSocket, client: &mut ClientSocket) -> Result<()> {
    client.resume_send(mux, true)?;
    server.pause_recv(mux, true)?;
    tracing::trace!(client = %client.id(), server = %server.id(), "Client send blocked");
    Ok(())
}

fn on_server_send_blocked(mux: &mut dyn Multiplexer, server: &mut ServerSocket, client: &mut ClientSocket) -> Result<()> {
    server.resume_send(mux, true)?;
    client.pause_recv(mux, true)?;
    tracing::trace!(client = %client.id(), server = %server.id(), "Server send blocked");
    Ok(())
}

impl ProxyHandler {
    // ---------------------------------------------------------------------
    // Inbound side
    // ---------------------------------------------------------------------

    fn begin_server(&self, server: &mut ServerSocket) -> Result<Flow> {
        let context = ProxyContext::new(server.handle());
        server.set_context(Some(erase(&context)));
        Ok(Flow::Success)
    }

    fn forward_request(&self, mux: &mut dyn Multiplexer, server: &mut ServerSocket) -> Result<Flow> {
        let context = server_context(server)?;

        let Some(mut transaction) = mux.create_client_transaction() else {
            tracing::warn!(socket = %server.id(), "Cannot create client transaction");
            server.set_response(500, "Internal Server Error");
            return Ok(Flow::SendResponse);
        };

        match transaction.request_mut().copy_from(server.request(), hop_by_hop_filter) {
            Ok(()) => {}
            Err(Error::InvalidField) | Err(Error::Http(_)) => {
                mux.destroy_client_transaction(transaction);
                tracing::debug!(socket = %server.id(), "Cannot copy request headers");
                server.set_response(400, "Bad Request");
                return Ok(Flow::SendResponse);
            }
            Err(error) => {
                mux.destroy_client_transaction(transaction);
                tracing::warn!(socket = %server.id(), error = %error, "Cannot populate client transaction");
                server.set_response(500, "Internal Server Error");
                return Ok(Flow::SendResponse);
            }
        }

        let destination = match self.router.route(server, &mut transaction) {
            Ok(destination) => destination,
            Err(error) => {
                mux.destroy_client_transaction(transaction);
                let (status, reason) = match error {
                    Error::CannotFind => (404, "Not Found"),
                    Error::NotOwner => (403, "Forbidden"),
                    _ => (500, "Internal Server Error"),
                };
                tracing::debug!(socket = %server.id(), error = %error, status, "Cannot route request");
                server.set_response(status, reason);
                return Ok(Flow::SendResponse);
            }
        };

        // the inbound side waits until the outbound side pulls the request
        if let Err(error) = server.pause_recv(mux, false).and_then(|()| server.pause_send(mux, true)) {
            mux.destroy_client_transaction(transaction);
            tracing::warn!(socket = %server.id(), error = %error, "Cannot pause server socket");
            return Err(error);
        }

        transaction.set_peer_address(destination);
        transaction.set_context(Some(erase(&context)));
        if let Err(failed) = mux.execute_client_transaction(transaction) {
            mux.destroy_client_transaction(failed.transaction);
            tracing::warn!(socket = %server.id(), error = %failed.error, "Cannot execute client transaction");
            server.resume_recv(mux, false)?;
            server.resume_send(mux, false)?;
            server.set_response(500, "Internal Server Error");
            return Ok(Flow::SendResponse);
        }

        tracing::debug!(socket = %server.id(), upstream = %destination, "Submitted outbound transaction");
        Ok(Flow::Pause)
    }

    fn forward_request_body(
        &self,
        mux: &mut dyn Multiplexer,
        context: &SharedContext,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        if !context.borrow().received_response {
            on_client_send_blocked(mux, server, client)?;
            return Ok((Flow::Again, 0));
        }

        let (flow, consumed) = client.send_request_body(mux, &mut ClientSide { proxy: self, server: &mut *server }, chunk)?;
        if consumed > 0 {
            context.borrow_mut().request_bytes += consumed as u64;
        }
        match flow {
            Flow::Success => Ok((Flow::Success, consumed)),
            Flow::Pause => {
                on_server_recv_blocked(mux, server, client)?;
                Ok((Flow::Pause, consumed))
            }
            Flow::Again => {
                on_client_send_blocked(mux, server, client)?;
                Ok((Flow::Again, consumed))
            }
            other => Err(Error::Unexpected(other)),
        }
    }

    fn offer_upstream_body(
        &self,
        mux: &mut dyn Multiplexer,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
    ) -> Result<(Flow, u64)> {
        let (flow, offered) = client.response_body_available(mux, &mut ClientSide { proxy: self, server: &mut *server })?;
        // a blocked offer pauses the inbound send side, so only the outbound
        // receive side is woken here
        match (flow, offered) {
            (Flow::Success, Some(offered)) => Ok((Flow::Success, offered)),
            (Flow::Again | Flow::Pause, _) | (Flow::Success, None) => {
                on_client_recv_blocked(mux, server, client)?;
                Ok((Flow::Again, 0))
            }
            (other, _) => Err(Error::Unexpected(other)),
        }
    }

    fn produce_upstream_body(
        &self,
        mux: &mut dyn Multiplexer,
        context: &SharedContext,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        if out.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let (flow, read) = client.read_response_body(mux, &mut ClientSide { proxy: self, server: &mut *server }, out)?;
        context.borrow_mut().response_bytes += read as u64;
        if read == out.len() {
            return Ok(Flow::Success);
        }
        // offer_upstream_body announced at least out.len() bytes
        match flow {
            Flow::Pause => {
                on_server_send_blocked(mux, server, client)?;
                Err(Error::Unexpected(Flow::Pause))
            }
            Flow::Again => {
                on_client_recv_blocked(mux, server, client)?;
                Err(Error::Unexpected(Flow::Again))
            }
            other => Err(Error::Unexpected(other)),
        }
    }

    fn end_server(
        &self,
        mux: &mut dyn Multiplexer,
        server: &mut ServerSocket,
        client: Option<&mut ClientSocket>,
        state: ServerEndState,
    ) {
        if state == ServerEndState::End {
            tracing::debug!(socket = %server.id(), "Server transaction completed");
        } else {
            tracing::debug!(socket = %server.id(), state = ?state, "Server transaction failed");
        }
        let Some(context) = context_of(server.context()) else {
            return;
        };
        server.set_context(None);

        let mut shared = context.borrow_mut();
        shared.pairing.detach_server();
        shared.server = None;
        if state != ServerEndState::End && shared.pairing.client_attached() {
            shared.client = None;
            shared.pairing.detach_client();
            drop(shared);
            if let Some(client) = client {
                abort_client(mux, client);
            }
        } else {
            drop(shared);
        }
        log_if_finished(&context);
    }

    // ---------------------------------------------------------------------
    // Outbound side
    // ---------------------------------------------------------------------

    fn begin_client(&self, client: &mut ClientSocket) -> Result<Flow> {
        let context = client_context(client)?;
        let mut shared = context.borrow_mut();
        if !shared.pairing.server_attached() || shared.server_socket().is_none() {
            // the inbound side went away while this side was connecting
            return Err(Error::InvalidState);
        }
        shared.pairing.pair()?;
        shared.client = Some(client.handle());
        tracing::debug!(client = %client.id(), "Paired inbound and outbound transaction");
        Ok(Flow::Success)
    }

    fn offer_downstream_body(
        &self,
        mux: &mut dyn Multiplexer,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
    ) -> Result<(Flow, u64)> {
        let (flow, offered) = server.request_body_available(mux, &mut ServerSide { proxy: self, client: &mut *client })?;
        match (flow, offered) {
            (Flow::Success, Some(offered)) => Ok((Flow::Success, offered)),
            (Flow::Again | Flow::Pause, _) | (Flow::Success, None) => {
                on_server_recv_blocked(mux, server, client)?;
                Ok((Flow::Again, 0))
            }
            (other, _) => Err(Error::Unexpected(other)),
        }
    }

    fn produce_downstream_body(
        &self,
        mux: &mut dyn Multiplexer,
        context: &SharedContext,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        if out.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let (flow, read) = server.read_request_body(mux, &mut ServerSide { proxy: self, client: &mut *client }, out)?;
        context.borrow_mut().request_bytes += read as u64;
        if read == out.len() {
            return Ok(Flow::Success);
        }
        match flow {
            Flow::Pause => {
                on_client_send_blocked(mux, server, client)?;
                Err(Error::Unexpected(Flow::Pause))
            }
            Flow::Again => {
                on_server_recv_blocked(mux, server, client)?;
                Err(Error::Unexpected(Flow::Again))
            }
            other => Err(Error::Unexpected(other)),
        }
    }

    fn relay_response(
        &self,
        mux: &mut dyn Multiplexer,
        context: &SharedContext,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
    ) -> Result<Flow> {
        context.borrow_mut().received_response = true;
        server.resume_recv(mux, true)?;

        let response = client.response().clone();
        tracing::debug!(client = %client.id(), status = response.status(), "Relaying response");

        let flow = server.send_response(
            mux,
            &mut ServerSide { proxy: self, client: &mut *client },
            &response,
            hop_by_hop_filter,
        )?;
        match flow {
            Flow::Success => {
                // fully sent, wait for the next inbound request
                server.resume_recv(mux, false)?;
                server.pause_send(mux, true)?;
            }
            // fully sent and the inbound connection is closing
            Flow::Cleanup => {}
            Flow::Pause => {
                on_client_recv_blocked(mux, server, client)?;
                return Ok(Flow::Pause);
            }
            Flow::Again => {
                on_server_send_blocked(mux, server, client)?;
                return Ok(Flow::Again);
            }
            other => {
                tracing::warn!(socket = %server.id(), flow = %other, "Cannot send server response");
                return Err(Error::Unexpected(other));
            }
        }

        if response.status() >= 300 {
            tracing::debug!(client = %client.id(), status = response.status(), "Closing after error response");
            return Ok(Flow::Closed);
        }
        Ok(Flow::Success)
    }

    fn relay_response_body(
        &self,
        mux: &mut dyn Multiplexer,
        context: &SharedContext,
        server: &mut ServerSocket,
        client: &mut ClientSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let (flow, consumed) =
            server.send_response_body(mux, &mut ServerSide { proxy: self, client: &mut *client }, chunk)?;
        if consumed > 0 {
            context.borrow_mut().response_bytes += consumed as u64;
        }
        match flow {
            Flow::Success if chunk.is_empty() => {
                server.resume_recv(mux, false)?;
                server.pause_send(mux, true)?;
                Ok((Flow::Success, 0))
            }
            Flow::Cleanup if chunk.is_empty() => Ok((Flow::Success, 0)),
            Flow::Success => Ok((Flow::Success, consumed)),
            Flow::Pause => {
                on_client_recv_blocked(mux, server, client)?;
                Ok((Flow::Pause, consumed))
            }
            Flow::Again => {
                on_server_send_blocked(mux, server, client)?;
                Ok((Flow::Again, consumed))
            }
            other => Err(Error::Unexpected(other)),
        }
    }

    fn end_client(
        &self,
        mux: &mut dyn Multiplexer,
        client: &mut ClientSocket,
        server: Option<&mut ServerSocket>,
        state: ClientEndState,
    ) {
        if state == ClientEndState::End {
            tracing::debug!(socket = %client.id(), "Client transaction completed");
        } else {
            tracing::debug!(socket = %client.id(), state = ?state, "Client transaction failed");
        }
        let Some(context) = context_of(client.context()) else {
            return;
        };
        client.set_context(None);

        let mut shared = context.borrow_mut();
        shared.pairing.detach_client();
        shared.client = None;
        let abort = state != ClientEndState::End && shared.server.is_some();
        if abort {
            shared.server = None;
            shared.pairing.detach_server();
        }
        drop(shared);

        if abort {
            match server {
                Some(server) => abort_server(mux, server),
                None => tracing::debug!(socket = %client.id(), "Inbound socket already gone"),
            }
        }
        log_if_finished(&context);
    }
}

fn abort_client(mux: &mut dyn Multiplexer, client: &mut ClientSocket) {
    tracing::debug!(socket = %client.id(), "Aborting paired client socket");
    if let Err(error) = client.abort(mux, true) {
        tracing::warn!(socket = %client.id(), error = %error, "Cannot abort paired client socket");
    }
}

fn abort_server(mux: &mut dyn Multiplexer, server: &mut ServerSocket) {
    tracing::debug!(socket = %server.id(), "Aborting paired server socket");
    if let Err(error) = server.abort(mux, true) {
        tracing::warn!(socket = %server.id(), error = %error, "Cannot abort paired server socket");
    }
}

fn log_if_finished(context: &SharedContext) {
    let shared = context.borrow();
    if shared.pairing.is_finished() {
        tracing::debug!(
            request_bytes = shared.request_bytes,
            response_bytes = shared.response_bytes,
            "Proxied exchange finished"
        );
    }
}

/// Borrow the live peer of a top-level callback.
fn borrow_peer<T>(peer: &Rc<RefCell<T>>) -> Result<std::cell::RefMut<'_, T>> {
    peer.try_borrow_mut().map_err(|_| Error::InvalidState)
}

fn paired_client(context: &SharedContext) -> Result<Rc<RefCell<ClientSocket>>> {
    context.borrow().client_socket().ok_or(Error::InvalidState)
}

fn paired_server(context: &SharedContext) -> Result<Rc<RefCell<ServerSocket>>> {
    context.borrow().server_socket().ok_or(Error::InvalidState)
}

// -------------------------------------------------------------------------
// Top-level callbacks
// -------------------------------------------------------------------------

impl ServerHandler for ProxyHandler {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.begin_server(stream)
    }

    fn receive_request_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.forward_request(mux, stream)
    }

    fn consume_request_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let context = server_context(stream)?;
        let Ok(client) = paired_client(&context) else {
            tracing::warn!(socket = %stream.id(), "Request body arrived before the outbound side paired");
            return Err(Error::InvalidState);
        };
        let mut client = borrow_peer(&client)?;
        self.forward_request_body(mux, &context, stream, &mut client, chunk)
    }

    fn offer_response_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<(Flow, u64)> {
        let context = server_context(stream)?;
        let client = context.borrow().client_socket();
        match client {
            Some(client) => {
                let mut client = borrow_peer(&client)?;
                self.offer_upstream_body(mux, stream, &mut client)
            }
            // locally generated responses and relayed responses whose
            // outbound side already finished have no more body
            None => Ok((Flow::Success, 0)),
        }
    }

    fn produce_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        let context = server_context(stream)?;
        let client = paired_client(&context)?;
        let mut client = borrow_peer(&client)?;
        self.produce_upstream_body(mux, &context, stream, &mut client, out)
    }

    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket, state: ServerEndState) {
        let client = context_of(stream.context()).and_then(|context| paired_client(&context).ok());
        match client.as_ref().map(|client| client.try_borrow_mut()) {
            Some(Ok(mut client)) => self.end_server(mux, stream, Some(&mut *client), state),
            Some(Err(_)) => {
                tracing::warn!(socket = %stream.id(), "Paired client socket busy during teardown");
                self.end_server(mux, stream, None, state)
            }
            None => self.end_server(mux, stream, None, state),
        };
    }
}

impl ClientHandler for ProxyHandler {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        self.begin_client(stream)
    }

    fn offer_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<(Flow, u64)> {
        let context = client_context(stream)?;
        let server = paired_server(&context)?;
        let mut server = borrow_peer(&server)?;
        self.offer_downstream_body(mux, &mut server, stream)
    }

    fn produce_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, out: &mut [u8]) -> Result<Flow> {
        let context = client_context(stream)?;
        let server = paired_server(&context)?;
        let mut server = borrow_peer(&server)?;
        self.produce_downstream_body(mux, &context, &mut server, stream, out)
    }

    fn receive_response_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        let context = client_context(stream)?;
        let server = paired_server(&context)?;
        let mut server = borrow_peer(&server)?;
        self.relay_response(mux, &context, &mut server, stream)
    }

    fn consume_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ClientSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let context = client_context(stream)?;
        let server = paired_server(&context)?;
        let mut server = borrow_peer(&server)?;
        self.relay_response_body(mux, &context, &mut server, stream, chunk)
    }

    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, state: ClientEndState) {
        let server = context_of(stream.context()).and_then(|context| paired_server(&context).ok());
        match server.as_ref().map(|server| server.try_borrow_mut()) {
            Some(Ok(mut server)) => self.end_client(mux, stream, Some(&mut *server), state),
            Some(Err(_)) => {
                tracing::warn!(socket = %stream.id(), "Paired server socket busy during teardown");
                self.end_client(mux, stream, None, state)
            }
            None => self.end_client(mux, stream, None, state),
        };
    }
}

// -------------------------------------------------------------------------
// Nested callbacks
// -------------------------------------------------------------------------

impl ServerHandler for ServerSide<'_> {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.proxy.begin_server(stream)
    }

    fn receive_request_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<Flow> {
        self.proxy.forward_request(mux, stream)
    }

    fn consume_request_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let context = server_context(stream)?;
        self.proxy.forward_request_body(mux, &context, stream, self.client, chunk)
    }

    fn offer_response_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket) -> Result<(Flow, u64)> {
        let context = server_context(stream)?;
        if !context.borrow().pairing.client_attached() {
            return Ok((Flow::Success, 0));
        }
        self.proxy.offer_upstream_body(mux, stream, self.client)
    }

    fn produce_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ServerSocket,
        out: &mut [u8],
    ) -> Result<Flow> {
        let context = server_context(stream)?;
        self.proxy.produce_upstream_body(mux, &context, stream, self.client, out)
    }

    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ServerSocket, state: ServerEndState) {
        self.proxy.end_server(mux, stream, Some(&mut *self.client), state);
    }
}

impl ClientHandler for ClientSide<'_> {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        self.proxy.begin_client(stream)
    }

    fn offer_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<(Flow, u64)> {
        self.proxy.offer_downstream_body(mux, self.server, stream)
    }

    fn produce_request_body(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, out: &mut [u8]) -> Result<Flow> {
        let context = client_context(stream)?;
        self.proxy.produce_downstream_body(mux, &context, self.server, stream, out)
    }

    fn receive_response_headers(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        let context = client_context(stream)?;
        self.proxy.relay_response(mux, &context, self.server, stream)
    }

    fn consume_response_body(
        &mut self,
        mux: &mut dyn Multiplexer,
        stream: &mut ClientSocket,
        chunk: &[u8],
    ) -> Result<(Flow, usize)> {
        let context = client_context(stream)?;
        self.proxy.relay_response_body(mux, &context, self.server, stream, chunk)
    }

    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, state: ClientEndState) {
        self.proxy.end_client(mux, stream, Some(&mut *self.server), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        assert_eq!(hop_by_hop_filter("connection", "close"), FilterResult::Skip);
        assert_eq!(hop_by_hop_filter("Keep-Alive", "300"), FilterResult::Skip);
        assert_eq!(hop_by_hop_filter("UPGRADE", "h2c"), FilterResult::Skip);
        assert_eq!(hop_by_hop_filter("Transfer-Encoding", "chunked"), FilterResult::Copy);
        assert_eq!(hop_by_hop_filter("Host", "example.com"), FilterResult::Copy);
    }
}
