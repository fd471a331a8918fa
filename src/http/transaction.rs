//! Per-exchange state: one request, one response, the parser and formatter
//! driving them and the handler's opaque context.

use std::any::Any;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use crate::http::formatter::MessageFormatter;
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::MessageParser;

/// Handler-owned state attached to a transaction.
pub type TransactionContext = Rc<dyn Any>;

/// One request/response exchange.
///
/// A transaction belongs to at most one socket at a time. Sockets take it by
/// value and hand it back to the multiplexer when they are done with it.
pub struct Transaction {
    request: HttpRequest,
    response: HttpResponse,
    parser: MessageParser,
    formatter: MessageFormatter,
    context: Option<TransactionContext>,
    peer_address: Option<SocketAddr>,
    start_time: Instant,
}

/// Outbound exchange: formats the request, parses the response.
pub type ClientTransaction = Transaction;
/// Inbound exchange: parses the request, formats the response.
pub type ServerTransaction = Transaction;

impl Default for Transaction {
    fn default() -> Self {
        Self::new(MessageParser::default())
    }
}

impl Transaction {
    pub fn new(parser: MessageParser) -> Self {
        Self {
            request: HttpRequest::default(),
            response: HttpResponse::default(),
            parser,
            formatter: MessageFormatter::default(),
            context: None,
            peer_address: None,
            start_time: Instant::now(),
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    pub fn context(&self) -> Option<&TransactionContext> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<TransactionContext>) {
        self.context = context;
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address
    }

    pub fn set_peer_address(&mut self, address: SocketAddr) {
        self.peer_address = Some(address);
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Split borrow for the socket state machines.
    pub(crate) fn parts_mut(&mut self) -> TransactionParts<'_> {
        TransactionParts {
            request: &mut self.request,
            response: &mut self.response,
            parser: &mut self.parser,
            formatter: &mut self.formatter,
        }
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut MessageParser {
        &mut self.parser
    }

    /// Forget wire progress so the same request can be sent again on
    /// another connection. The request and the context are kept.
    pub fn rewind(&mut self) {
        self.response.reset();
        self.parser.reset();
        self.formatter.reset();
    }

    /// Clear for the next exchange, keeping allocations and the peer address.
    pub fn reset(&mut self) {
        self.request.reset();
        self.response.reset();
        self.parser.reset();
        self.formatter.reset();
        self.context = None;
        self.start_time = Instant::now();
    }
}

pub(crate) struct TransactionParts<'a> {
    pub request: &'a mut HttpRequest,
    pub response: &'a mut HttpResponse,
    pub parser: &'a mut MessageParser,
    pub formatter: &'a mut MessageFormatter,
}
