//! State shared by the inbound and outbound half of one proxied exchange.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::client::ClientSocket;
use crate::http::transaction::TransactionContext;
use crate::proxy::pairing::Pairing;
use crate::server::ServerSocket;

#[derive(Default)]
pub struct ProxyContext {
    pub pairing: Pairing,
    pub server: Option<Weak<RefCell<ServerSocket>>>,
    pub client: Option<Weak<RefCell<ClientSocket>>>,
    pub received_response: bool,
    pub request_bytes: u64,
    pub response_bytes: u64,
}

pub type SharedContext = Rc<RefCell<ProxyContext>>;

impl ProxyContext {
    pub fn new(server: Weak<RefCell<ServerSocket>>) -> SharedContext {
        Rc::new(RefCell::new(ProxyContext {
            server: Some(server),
            ..Default::default()
        }))
    }

    pub fn server_socket(&self) -> Option<Rc<RefCell<ServerSocket>>> {
        self.server.as_ref().and_then(Weak::upgrade)
    }

    pub fn client_socket(&self) -> Option<Rc<RefCell<ClientSocket>>> {
        self.client.as_ref().and_then(Weak::upgrade)
    }
}

/// Erase a shared context for storage in a transaction.
pub fn erase(context: &SharedContext) -> TransactionContext {
    Rc::clone(context) as TransactionContext
}

/// The proxy context stored in a transaction, if it holds one.
pub fn context_of(context: Option<&TransactionContext>) -> Option<SharedContext> {
    context.and_then(|context| Rc::clone(context).downcast::<RefCell<ProxyContext>>().ok())
}
