//! Single-threaded readiness loop that drives client and server sockets.
//!
//! # Data Flow
//! ```text
//! Listener::accept ──→ ServerHandler::accept_connection
//!                   └─→ ServerSocket + socket task
//! execute_client_transaction ──→ idle pool hit: reset + socket task
//!                             └─→ miss: ClientSocket + connect task
//!
//! socket task:
//!     wait(readable | writable | update | idle | shutdown)
//!     → handle_readable / handle_writable (handler + MuxHandle)
//!     → Again | Pause: keep waiting with the socket's fresh interest
//!     → anything else: deregister, handle_remove, maybe park in idle pool
//! ```
//!
//! # Responsibilities
//! - Implement [`Multiplexer`] for every socket it owns
//! - Own the buffer pool and the idle client pool
//! - Defer removal until the callback that asked for it has returned
//! - Stop every socket when shutdown is triggered
//!
//! # Design Decisions
//! - One tokio task per socket on a `LocalSet`. Sockets and handlers are
//!   `Rc<RefCell<..>>` and never cross threads; scale out by running one
//!   reactor per core, each with its own listener.
//! - No `RefCell` borrow is held across an `.await`. Every dispatch borrows
//!   the handler and the socket, runs synchronously, and releases both.
//! - Interest updates and removal requests only touch the socket's
//!   registration and wake its task. The task applies them once the
//!   current dispatch has unwound, which is what makes removal deferred.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::buffer::ByteBuffer;
use crate::client::{ClientHandler, ClientSocket, ClientSocketConfig};
use crate::config::StackConfig;
use crate::error::{Error, Flow, Result};
use crate::http::parser::MessageParser;
use crate::http::transaction::{ClientTransaction, ServerTransaction, Transaction};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker, Side};
use crate::net::listener::{Accepted, ConnectionPermit, Listener, ListenerError};
use crate::net::pool::{BufferPool, IdleConnection, IdlePool};
use crate::net::tcp::{StreamSlot, TcpConnection};
use crate::observability::{ClientCounters, ServerCounters};
use crate::server::{ServerHandler, ServerSocket, ServerSocketConfig};
use crate::stream::{ExecuteError, Interest, Multiplexer};

/// Tunables of one reactor, usually derived from [`StackConfig`].
#[derive(Debug, Clone)]
pub struct ReactorSettings {
    pub buffer_size: usize,
    pub max_pooled_buffers: usize,
    pub max_buffers: usize,
    pub max_field_size: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_idle_per_peer: usize,
    pub client: ClientSocketConfig,
    pub server: ServerSocketConfig,
}

impl ReactorSettings {
    pub fn from_config(config: &StackConfig) -> Self {
        Self {
            buffer_size: config.buffers.size,
            max_pooled_buffers: config.buffers.max_pooled,
            max_buffers: config.buffers.max_total,
            max_field_size: config.parser.max_field_size,
            idle_timeout: Duration::from_millis(config.reactor.idle_timeout_ms),
            connect_timeout: Duration::from_millis(config.client.connect_timeout_ms),
            max_idle_per_peer: config.client.max_idle_per_peer,
            client: ClientSocketConfig {
                reuse_connections: config.client.reuse_connections,
            },
            server: ServerSocketConfig {
                close_after_error_response: config.server.close_after_error_response,
            },
        }
    }
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self::from_config(&StackConfig::default())
    }
}

/// Per-socket state shared between the socket's task and the multiplexer.
struct Registration {
    interest: Cell<Interest>,
    removed: Cell<bool>,
    notify: Notify,
}

impl Registration {
    fn new(interest: Interest) -> Rc<Self> {
        Rc::new(Self {
            interest: Cell::new(interest),
            removed: Cell::new(false),
            notify: Notify::new(),
        })
    }
}

struct State {
    buffers: BufferPool,
    registrations: HashMap<ConnectionId, Rc<Registration>>,
    idle: IdlePool,
}

struct Inner {
    settings: ReactorSettings,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    client_counters: Arc<ClientCounters>,
    server_counters: Arc<ServerCounters>,
    server_handler: Option<Rc<RefCell<dyn ServerHandler>>>,
    client_handler: Option<Rc<RefCell<dyn ClientHandler>>>,
    state: RefCell<State>,
}

/// Handle to a reactor. Cheap to clone; every clone drives the same sockets.
///
/// Must be used from inside a `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<Inner>,
}

pub struct ReactorBuilder {
    settings: ReactorSettings,
    shutdown: Shutdown,
    client_counters: Arc<ClientCounters>,
    server_counters: Arc<ServerCounters>,
    server_handler: Option<Rc<RefCell<dyn ServerHandler>>>,
    client_handler: Option<Rc<RefCell<dyn ClientHandler>>>,
}

impl ReactorBuilder {
    pub fn server_handler(mut self, handler: Rc<RefCell<dyn ServerHandler>>) -> Self {
        self.server_handler = Some(handler);
        self
    }

    pub fn client_handler(mut self, handler: Rc<RefCell<dyn ClientHandler>>) -> Self {
        self.client_handler = Some(handler);
        self
    }

    pub fn client_counters(mut self, counters: Arc<ClientCounters>) -> Self {
        self.client_counters = counters;
        self
    }

    pub fn server_counters(mut self, counters: Arc<ServerCounters>) -> Self {
        self.server_counters = counters;
        self
    }

    pub fn build(self) -> Reactor {
        let state = State {
            buffers: BufferPool::new(
                self.settings.buffer_size,
                self.settings.max_pooled_buffers,
                self.settings.max_buffers,
            ),
            registrations: HashMap::new(),
            idle: IdlePool::new(self.settings.max_idle_per_peer),
        };
        Reactor {
            inner: Rc::new(Inner {
                settings: self.settings,
                shutdown: self.shutdown,
                tracker: ConnectionTracker::new(),
                client_counters: self.client_counters,
                server_counters: self.server_counters,
                server_handler: self.server_handler,
                client_handler: self.client_handler,
                state: RefCell::new(state),
            }),
        }
    }
}

impl Reactor {
    pub fn builder(settings: ReactorSettings, shutdown: Shutdown) -> ReactorBuilder {
        ReactorBuilder {
            settings,
            shutdown,
            client_counters: Arc::new(ClientCounters::new()),
            server_counters: Arc::new(ServerCounters::new()),
            server_handler: None,
            client_handler: None,
        }
    }

    pub fn client_counters(&self) -> &Arc<ClientCounters> {
        &self.inner.client_counters
    }

    pub fn server_counters(&self) -> &Arc<ServerCounters> {
        &self.inner.server_counters
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.inner.tracker
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.state.borrow().idle.len()
    }

    pub fn buffers_in_use(&self) -> usize {
        self.inner.state.borrow().buffers.in_use()
    }

    /// Run `f` with this reactor's multiplexer, e.g. to start client
    /// transactions from outside any callback.
    pub fn with_multiplexer<R>(&self, f: impl FnOnce(&mut dyn Multiplexer) -> R) -> R {
        let mut mux = MuxHandle { inner: &self.inner };
        f(&mut mux)
    }

    /// Submit a client transaction from outside any callback.
    pub fn execute(&self, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError> {
        execute(&self.inner, transaction)
    }

    /// Accept connections until shutdown is triggered or the listener fails
    /// for good.
    pub async fn serve(&self, listener: Listener) {
        let shutdown = self.inner.shutdown.clone();
        while !shutdown.is_triggered() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => self.accept(accepted),
                    Err(ListenerError::Closed) => break,
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.wait() => break,
            }
        }
        tracing::info!("Listener stopped accepting connections");
    }

    fn accept(&self, Accepted { stream, peer, permit }: Accepted) {
        let inner = &self.inner;
        let Some(handler) = inner.server_handler.clone() else {
            tracing::warn!(peer = %peer, "No server handler installed, dropping connection");
            return;
        };
        let accepted = match handler.try_borrow_mut() {
            Ok(mut handler) => handler.accept_connection(&mut MuxHandle { inner }, peer),
            Err(_) => Err(Error::InvalidState),
        };
        if !matches!(accepted, Ok(Flow::Success)) {
            tracing::debug!(peer = %peer, "Connection refused by handler");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Cannot disable Nagle");
        }

        let connection = TcpConnection::connected(Rc::new(stream), peer);
        let slot = connection.slot();
        let transaction = new_transaction(&inner.settings);
        let socket = ServerSocket::create(
            Box::new(connection),
            transaction,
            inner.settings.server,
            Arc::clone(&inner.server_counters),
        );
        let (id, interest) = {
            let socket = socket.borrow();
            (socket.id(), socket.interest())
        };
        let registration = register(inner, id, interest);
        let guard = inner.tracker.track(Side::Server, id);
        tracing::debug!(socket = %id, peer = %peer, "Server socket registered");
        tokio::task::spawn_local(run_socket(
            Rc::clone(inner),
            Endpoint::Server(socket),
            registration,
            slot,
            Tenancy::server(guard, permit),
        ));
    }

    /// Close every parked client connection.
    pub fn close_idle(&self) {
        let drained = self.inner.state.borrow_mut().idle.drain();
        for connection in drained {
            if let Ok(mut socket) = connection.socket.try_borrow_mut() {
                socket.close();
            }
            connection.slot.borrow_mut().take();
        }
    }

    /// Resolve once no socket is left, or after `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.tracker.wait_for_drain())
            .await
            .is_ok()
    }
}

fn new_transaction(settings: &ReactorSettings) -> Transaction {
    Transaction::new(MessageParser::new(settings.max_field_size))
}

fn register(inner: &Inner, id: ConnectionId, interest: Interest) -> Rc<Registration> {
    let registration = Registration::new(interest);
    inner
        .state
        .borrow_mut()
        .registrations
        .insert(id, Rc::clone(&registration));
    registration
}

fn execute(inner: &Rc<Inner>, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError> {
    if inner.shutdown.is_triggered() {
        return Err(ExecuteError {
            error: Error::InvalidState,
            transaction,
        });
    }
    if inner.client_handler.is_none() {
        return Err(ExecuteError {
            error: Error::NotSupported,
            transaction,
        });
    }
    let Some(peer) = transaction.peer_address() else {
        return Err(ExecuteError {
            error: Error::InvalidArgument,
            transaction,
        });
    };
    tokio::task::spawn_local(start_transaction(Rc::clone(inner), transaction, peer));
    Ok(())
}

/// Runs once the submitting callback has unwound, so a connection that
/// callback's socket is about to park can already be picked up.
async fn start_transaction(inner: Rc<Inner>, mut transaction: ClientTransaction, peer: SocketAddr) {
    loop {
        let parked = inner.state.borrow_mut().idle.take(peer);
        let Some(parked) = parked else {
            break;
        };
        let reset = parked
            .socket
            .try_borrow_mut()
            .map_err(|_| Error::InvalidState)
            .map(|mut socket| socket.reset(std::mem::take(&mut transaction)));
        match reset {
            Ok(Ok(())) => {
                let (id, interest) = {
                    let socket = parked.socket.borrow();
                    (socket.id(), socket.interest())
                };
                let registration = register(&inner, id, interest);
                let guard = inner.tracker.track(Side::Client, id);
                tracing::debug!(socket = %id, peer = %peer, "Executing on pooled connection");
                run_socket(
                    inner,
                    Endpoint::Client(parked.socket),
                    registration,
                    parked.slot,
                    Tenancy::client(guard),
                )
                .await;
                return;
            }
            Ok(Err(failed)) => transaction = failed.transaction,
            Err(_) => {}
        }
    }

    let connection = TcpConnection::pending(peer);
    let slot = connection.slot();
    let socket = ClientSocket::create(
        Box::new(connection),
        transaction,
        inner.settings.client,
        Arc::clone(&inner.client_counters),
    );
    let id = socket.borrow().id();
    let registration = register(&inner, id, Interest::NONE);
    let guard = inner.tracker.track(Side::Client, id);
    tracing::debug!(socket = %id, peer = %peer, "Connecting to peer");
    connect_and_run(inner, socket, registration, slot, guard).await;
}

/// The reactor's [`Multiplexer`], lent to sockets for one dispatch.
struct MuxHandle<'a> {
    inner: &'a Rc<Inner>,
}

impl Multiplexer for MuxHandle<'_> {
    fn shutdown(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    fn acquire_buffer(&mut self) -> Option<ByteBuffer> {
        let buffer = self.inner.state.borrow_mut().buffers.acquire();
        if buffer.is_none() {
            tracing::warn!("Buffer pool exhausted");
        }
        buffer
    }

    fn release_buffer(&mut self, buffer: ByteBuffer) {
        self.inner.state.borrow_mut().buffers.release(buffer);
    }

    fn create_client_transaction(&mut self) -> Option<ClientTransaction> {
        Some(new_transaction(&self.inner.settings))
    }

    fn create_server_transaction(&mut self) -> Option<ServerTransaction> {
        Some(new_transaction(&self.inner.settings))
    }

    fn execute_client_transaction(&mut self, transaction: ClientTransaction) -> std::result::Result<(), ExecuteError> {
        execute(self.inner, transaction)
    }

    fn update_multiplexed_socket(&mut self, id: ConnectionId, interest: Interest) -> Result<()> {
        let state = self.inner.state.borrow();
        let registration = state.registrations.get(&id).ok_or(Error::CannotFind)?;
        if registration.interest.replace(interest) != interest {
            registration.notify.notify_one();
        }
        Ok(())
    }

    fn remove_multiplexed_socket(&mut self, id: ConnectionId) -> Result<()> {
        if let Some(registration) = self.inner.state.borrow().registrations.get(&id) {
            registration.removed.set(true);
            registration.notify.notify_one();
        }
        Ok(())
    }
}

enum Endpoint {
    Client(Rc<RefCell<ClientSocket>>),
    Server(Rc<RefCell<ServerSocket>>),
}

/// What keeps a socket counted while its task runs.
struct Tenancy {
    _guard: ConnectionGuard,
    _permit: Option<ConnectionPermit>,
}

impl Tenancy {
    fn client(guard: ConnectionGuard) -> Self {
        Self {
            _guard: guard,
            _permit: None,
        }
    }

    fn server(guard: ConnectionGuard, permit: ConnectionPermit) -> Self {
        Self {
            _guard: guard,
            _permit: Some(permit),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Connected,
    Readable,
    Writable,
}

enum Wake {
    Ready(Event),
    Updated,
    Idle,
    Shutdown,
    Failed(io::Error),
}

impl Endpoint {
    fn id(&self) -> ConnectionId {
        match self {
            Endpoint::Client(socket) => socket.borrow().id(),
            Endpoint::Server(socket) => socket.borrow().id(),
        }
    }

    fn interest(&self) -> Interest {
        match self {
            Endpoint::Client(socket) => socket.borrow().interest(),
            Endpoint::Server(socket) => socket.borrow().interest(),
        }
    }

    /// A client whose response is complete leaves the loop even though its
    /// state machine reported success.
    fn finished(&self) -> bool {
        match self {
            Endpoint::Client(socket) => socket.borrow().is_finished(),
            Endpoint::Server(_) => false,
        }
    }

    fn dispatch(&self, inner: &Rc<Inner>, event: Event) -> Result<Flow> {
        let mut mux = MuxHandle { inner };
        match self {
            Endpoint::Client(socket) => {
                let handler = inner.client_handler.as_ref().ok_or(Error::NotSupported)?;
                let mut handler = handler.try_borrow_mut().map_err(|_| Error::InvalidState)?;
                let mut socket = socket.try_borrow_mut().map_err(|_| Error::InvalidState)?;
                match event {
                    Event::Connected => socket.handle_connect(&mut mux, &mut *handler),
                    Event::Readable => socket.handle_readable(&mut mux, &mut *handler),
                    Event::Writable => socket.handle_writable(&mut mux, &mut *handler),
                }
            }
            Endpoint::Server(socket) => {
                let handler = inner.server_handler.as_ref().ok_or(Error::NotSupported)?;
                let mut handler = handler.try_borrow_mut().map_err(|_| Error::InvalidState)?;
                let mut socket = socket.try_borrow_mut().map_err(|_| Error::InvalidState)?;
                match event {
                    Event::Connected | Event::Readable => socket.handle_readable(&mut mux, &mut *handler),
                    Event::Writable => socket.handle_writable(&mut mux, &mut *handler),
                }
            }
        }
    }

    fn on_error(&self, error: &Error) {
        match self {
            Endpoint::Client(socket) => {
                let mut socket = socket.borrow_mut();
                socket.handle_error(error);
                socket.mark_dead();
            }
            Endpoint::Server(socket) => {
                let mut socket = socket.borrow_mut();
                socket.handle_error(error);
                socket.mark_dead();
            }
        }
    }

    fn on_idle(&self) {
        match self {
            Endpoint::Client(socket) => {
                let mut socket = socket.borrow_mut();
                socket.handle_idle();
                socket.mark_dead();
            }
            Endpoint::Server(socket) => {
                let mut socket = socket.borrow_mut();
                socket.handle_idle();
                socket.mark_dead();
            }
        }
    }

    /// Anything but a clean finish leaves the connection unusable.
    fn on_stop(&self, flow: Flow) {
        if let Endpoint::Client(socket) = self {
            if !matches!(flow, Flow::Success | Flow::Again | Flow::Pause) {
                socket.borrow_mut().mark_dead();
            }
        }
    }

    fn remove(&self, inner: &Rc<Inner>) {
        let mut mux = MuxHandle { inner };
        match self {
            Endpoint::Client(socket) => {
                let Some(handler) = inner.client_handler.as_ref() else {
                    return;
                };
                match (handler.try_borrow_mut(), socket.try_borrow_mut()) {
                    (Ok(mut handler), Ok(mut socket)) => socket.handle_remove(&mut mux, &mut *handler),
                    _ => tracing::error!("Client socket removed while borrowed"),
                }
            }
            Endpoint::Server(socket) => {
                let Some(handler) = inner.server_handler.as_ref() else {
                    return;
                };
                match (handler.try_borrow_mut(), socket.try_borrow_mut()) {
                    (Ok(mut handler), Ok(mut socket)) => socket.handle_remove(&mut mux, &mut *handler),
                    _ => tracing::error!("Server socket removed while borrowed"),
                }
            }
        }
    }
}

async fn connect_and_run(
    inner: Rc<Inner>,
    socket: Rc<RefCell<ClientSocket>>,
    registration: Rc<Registration>,
    slot: StreamSlot,
    guard: ConnectionGuard,
) {
    let peer = socket.borrow().peer_address();
    let endpoint = Endpoint::Client(socket);

    match connect(&inner, peer, &registration).await {
        Ok(stream) => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "Cannot disable Nagle");
            }
            *slot.borrow_mut() = Some(Rc::new(stream));
            run_socket(inner, endpoint, registration, slot, Tenancy::client(guard)).await;
        }
        Err(e) => {
            tracing::info!(peer = %peer, error = %e, "Connect failed");
            metrics::counter!("http_connect_failures_total").increment(1);
            if let Endpoint::Client(socket) = &endpoint {
                socket.borrow_mut().mark_dead();
            }
            finish(&inner, &endpoint, &slot);
        }
    }
}

async fn connect(inner: &Inner, peer: SocketAddr, registration: &Registration) -> io::Result<TcpStream> {
    let connecting = tokio::time::timeout(inner.settings.connect_timeout, TcpStream::connect(peer));
    tokio::pin!(connecting);
    loop {
        tokio::select! {
            result = &mut connecting => {
                return result.unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")));
            }
            _ = registration.notify.notified() => {
                if registration.removed.get() {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "removed while connecting"));
                }
            }
            _ = inner.shutdown.wait() => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "shutting down"));
            }
        }
    }
}

async fn run_socket(
    inner: Rc<Inner>,
    endpoint: Endpoint,
    registration: Rc<Registration>,
    slot: StreamSlot,
    tenancy: Tenancy,
) {
    let mut pending = match &endpoint {
        Endpoint::Client(socket) if socket.borrow().want_connect() => Some(Event::Connected),
        Endpoint::Client(_) => Some(Event::Writable),
        Endpoint::Server(_) => None,
    };

    loop {
        if let Some(event) = pending.take() {
            if !wants(&endpoint, event) {
                registration.interest.set(endpoint.interest());
            } else {
                match endpoint.dispatch(&inner, event) {
                    Ok(Flow::Again) | Ok(Flow::Pause) if !endpoint.finished() => {
                        registration.interest.set(endpoint.interest());
                    }
                    Ok(flow) => {
                        tracing::trace!(socket = %endpoint.id(), flow = %flow, "Socket leaving reactor");
                        endpoint.on_stop(flow);
                        break;
                    }
                    Err(error) => {
                        endpoint.on_error(&error);
                        break;
                    }
                }
            }
        }
        if registration.removed.get() || inner.shutdown.is_triggered() {
            endpoint.on_stop(Flow::Shutdown);
            break;
        }

        let stream = slot.borrow().clone();
        let Some(stream) = stream else {
            break;
        };
        let interest = registration.interest.get();
        let wake = tokio::select! {
            ready = stream.readable(), if interest.read => match ready {
                Ok(()) => Wake::Ready(Event::Readable),
                Err(e) => Wake::Failed(e),
            },
            ready = stream.writable(), if interest.write => match ready {
                Ok(()) => Wake::Ready(Event::Writable),
                Err(e) => Wake::Failed(e),
            },
            _ = registration.notify.notified() => Wake::Updated,
            _ = tokio::time::sleep(inner.settings.idle_timeout) => Wake::Idle,
            _ = inner.shutdown.wait() => Wake::Shutdown,
        };
        match wake {
            Wake::Ready(event) => pending = Some(event),
            Wake::Updated => {}
            Wake::Idle => {
                endpoint.on_idle();
                break;
            }
            Wake::Shutdown => {
                endpoint.on_stop(Flow::Shutdown);
                break;
            }
            Wake::Failed(e) => {
                endpoint.on_error(&Error::Io(e));
                break;
            }
        }
    }

    finish(&inner, &endpoint, &slot);
    drop(tenancy);
}

/// A readiness event may be stale by the time it is handled.
fn wants(endpoint: &Endpoint, event: Event) -> bool {
    let interest = endpoint.interest();
    match event {
        Event::Connected => true,
        Event::Readable => interest.read,
        Event::Writable => interest.write,
    }
}

/// Deregister, run the socket's removal callback and park reusable clients.
fn finish(inner: &Rc<Inner>, endpoint: &Endpoint, slot: &StreamSlot) {
    let id = endpoint.id();
    inner.state.borrow_mut().registrations.remove(&id);
    endpoint.remove(inner);

    if let Endpoint::Client(socket) = endpoint {
        let (reusable, peer) = {
            let socket = socket.borrow();
            (socket.reusable(), socket.peer_address())
        };
        if reusable && !inner.shutdown.is_triggered() {
            let connection = IdleConnection {
                socket: Rc::clone(socket),
                slot: Rc::clone(slot),
            };
            let rejected = inner.state.borrow_mut().idle.put(peer, connection);
            match rejected {
                None => {
                    tracing::debug!(socket = %id, peer = %peer, "Connection parked");
                    return;
                }
                Some(rejected) => rejected.socket.borrow_mut().close(),
            }
        }
    }
    slot.borrow_mut().take();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_the_config() {
        let mut config = StackConfig::default();
        config.client.reuse_connections = false;
        config.reactor.idle_timeout_ms = 250;
        let settings = ReactorSettings::from_config(&config);
        assert!(!settings.client.reuse_connections);
        assert_eq!(settings.idle_timeout, Duration::from_millis(250));
        assert_eq!(settings.buffer_size, config.buffers.size);
    }

    #[tokio::test]
    async fn multiplexer_requests_reach_registrations() {
        let reactor = Reactor::builder(ReactorSettings::default(), Shutdown::new()).build();
        let id = ConnectionId::new();
        let registration = register(&reactor.inner, id, Interest::NONE);

        reactor.with_multiplexer(|mux| {
            let interest = Interest { read: true, write: false };
            mux.update_multiplexed_socket(id, interest).unwrap();
            assert!(matches!(
                mux.update_multiplexed_socket(ConnectionId::new(), interest),
                Err(Error::CannotFind)
            ));
            mux.remove_multiplexed_socket(id).unwrap();
            mux.remove_multiplexed_socket(ConnectionId::new()).unwrap();
        });
        assert!(registration.interest.get().read);
        assert!(registration.removed.get());
        registration.notify.notified().await;
    }

    #[test]
    fn execute_needs_a_client_handler_and_a_peer() {
        let reactor = Reactor::builder(ReactorSettings::default(), Shutdown::new()).build();
        let transaction = new_transaction(&reactor.inner.settings);
        let failed = reactor.execute(transaction).unwrap_err();
        assert!(matches!(failed.error, Error::NotSupported));
    }

    #[test]
    fn buffers_come_from_the_pool() {
        let settings = ReactorSettings {
            max_buffers: 1,
            ..ReactorSettings::default()
        };
        let reactor = Reactor::builder(settings, Shutdown::new()).build();
        reactor.with_multiplexer(|mux| {
            let buffer = mux.acquire_buffer().unwrap();
            assert!(mux.acquire_buffer().is_none());
            mux.release_buffer(buffer);
            assert!(mux.acquire_buffer().is_some());
        });
    }
}
