//! Load generator: keeps N transaction chains running, M requests each.
//!
//! # Data Flow
//! ```text
//! start() ── N × execute ──→ reactor
//! end_transaction(state) → tally → chain has iterations left?
//!     → yes: execute the next request (reuses the pooled connection)
//!     → no: chain finished; last chain wakes `finished()`
//! ```
//!
//! # Design Decisions
//! - Chains, not a global queue: each chain submits its next request only
//!   after the previous one ended, so on a reusing client every chain
//!   settles on one connection and the requests-per-connection average
//!   equals the iteration count.
//! - Response bodies are checked byte for byte against the origin's
//!   generated pattern; a mismatch counts as a failure.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::client::{ClientEndState, ClientHandler, ClientSocket};
use crate::error::{Error, Flow, Result};
use crate::http::message::HttpRequest;
use crate::http::transaction::ClientTransaction;
use crate::http::uri::RequestUri;
use crate::service::origin::body_byte;
use crate::stream::Multiplexer;

#[derive(Debug, Clone)]
pub struct LoadSettings {
    /// Address connections are made to (an origin or a proxy).
    pub target: SocketAddr,
    /// `Host` header sent with every request.
    pub host: String,
    pub path: String,
    pub connections: usize,
    pub iterations: usize,
}

/// Totals of one load run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub successes: u64,
    pub failures: u64,
    pub body_bytes: u64,
}

#[derive(Debug, Default)]
struct Exchange {
    received: Cell<u64>,
    intact: Cell<bool>,
}

fn exchange_of(stream: &ClientSocket) -> Result<Rc<Exchange>> {
    let context = stream.context().ok_or(Error::InvalidState)?;
    Rc::clone(context).downcast::<Exchange>().map_err(|_| Error::InvalidState)
}

pub struct LoadHandler {
    settings: LoadSettings,
    /// Requests still to be submitted, across all chains.
    remaining: usize,
    active_chains: usize,
    report: LoadReport,
    finished: Rc<Notify>,
}

impl LoadHandler {
    pub fn new(settings: LoadSettings) -> Self {
        Self {
            remaining: settings.connections * settings.iterations,
            settings,
            active_chains: 0,
            report: LoadReport::default(),
            finished: Rc::new(Notify::new()),
        }
    }

    pub fn report(&self) -> LoadReport {
        self.report
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0 && self.active_chains == 0
    }

    /// Notified once every chain has ended.
    pub fn finished(&self) -> Rc<Notify> {
        Rc::clone(&self.finished)
    }

    /// Submit the first request of every chain.
    pub fn start(&mut self, mux: &mut dyn Multiplexer) -> Result<()> {
        tracing::info!(
            peer = %self.settings.target,
            connections = self.settings.connections,
            iterations = self.settings.iterations,
            "Starting load"
        );
        for _ in 0..self.settings.connections {
            if self.remaining == 0 {
                break;
            }
            self.submit(mux)?;
            self.active_chains += 1;
        }
        if self.is_finished() {
            self.finished.notify_one();
        }
        Ok(())
    }

    fn build_transaction(&self, mux: &mut dyn Multiplexer) -> Result<ClientTransaction> {
        let mut transaction = mux.create_client_transaction().ok_or(Error::OutOfMemory)?;
        let mut request = HttpRequest::new("GET", RequestUri::abs_path(self.settings.path.clone()));
        request.add_header("Host", self.settings.host.clone());
        request.add_header("User-Agent", concat!("evented-http/", env!("CARGO_PKG_VERSION")));
        *transaction.request_mut() = request;
        transaction.set_peer_address(self.settings.target);
        transaction.set_context(Some(Rc::new(Exchange {
            received: Cell::new(0),
            intact: Cell::new(true),
        })));
        Ok(transaction)
    }

    fn submit(&mut self, mux: &mut dyn Multiplexer) -> Result<()> {
        let transaction = self.build_transaction(mux)?;
        if let Err(failed) = mux.execute_client_transaction(transaction) {
            tracing::warn!(error = %failed.error, "Cannot submit load transaction");
            mux.destroy_client_transaction(failed.transaction);
            return Err(failed.error);
        }
        self.remaining -= 1;
        Ok(())
    }

    fn end_chain(&mut self) {
        self.active_chains = self.active_chains.saturating_sub(1);
        if self.active_chains == 0 {
            tracing::info!(
                successes = self.report.successes,
                failures = self.report.failures,
                "Load finished"
            );
            self.finished.notify_one();
        }
    }
}

impl ClientHandler for LoadHandler {
    fn begin_transaction(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket) -> Result<Flow> {
        Ok(Flow::Success)
    }

    fn offer_request_body(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket) -> Result<(Flow, u64)> {
        Ok((Flow::Success, 0))
    }

    fn produce_request_body(&mut self, _mux: &mut dyn Multiplexer, _stream: &mut ClientSocket, _out: &mut [u8]) -> Result<Flow> {
        Err(Error::InvalidState)
    }

    fn receive_response_headers(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ClientSocket) -> Result<Flow> {
        tracing::trace!(socket = %stream.id(), status = stream.response().status(), "Load response headers");
        Ok(Flow::Success)
    }

    fn consume_response_body(&mut self, _mux: &mut dyn Multiplexer, stream: &mut ClientSocket, chunk: &[u8]) -> Result<(Flow, usize)> {
        let exchange = exchange_of(stream)?;
        let start = exchange.received.get();
        if !(start..).zip(chunk).all(|(offset, byte)| *byte == body_byte(offset)) {
            exchange.intact.set(false);
        }
        exchange.received.set(start + chunk.len() as u64);
        Ok((Flow::Success, chunk.len()))
    }

    fn end_transaction(&mut self, mux: &mut dyn Multiplexer, stream: &mut ClientSocket, state: ClientEndState) {
        let intact = exchange_of(stream).map(|exchange| {
            self.report.body_bytes += exchange.received.get();
            exchange.intact.get()
        });
        let ok = state == ClientEndState::End && stream.response().status() == 200 && intact.unwrap_or(false);
        if ok {
            self.report.successes += 1;
        } else {
            self.report.failures += 1;
            tracing::debug!(
                socket = %stream.id(),
                state = ?state,
                status = stream.response().status(),
                "Load transaction failed"
            );
        }

        if self.remaining == 0 || mux.shutdown() || self.submit(mux).is_err() {
            self.end_chain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(connections: usize, iterations: usize) -> LoadSettings {
        LoadSettings {
            target: "127.0.0.1:8080".parse().unwrap(),
            host: "localhost".into(),
            path: "/".into(),
            connections,
            iterations,
        }
    }

    #[test]
    fn empty_runs_are_finished_immediately() {
        let handler = LoadHandler::new(settings(0, 10));
        assert!(handler.is_finished());
        assert_eq!(handler.report(), LoadReport::default());
    }

    #[test]
    fn total_requests_are_connections_times_iterations() {
        let handler = LoadHandler::new(settings(3, 4));
        assert_eq!(handler.remaining, 12);
        assert!(!handler.is_finished());
    }
}
