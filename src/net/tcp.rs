//! Non-blocking TCP transport for the socket state machines.

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::TcpStream;

use crate::buffer::ByteBuffer;
use crate::stream::ConnectedSocket;

/// Stream shared between a [`TcpConnection`] and the reactor task that
/// waits for its readiness. Empty until connected and after close.
pub type StreamSlot = Rc<RefCell<Option<Rc<TcpStream>>>>;

pub struct TcpConnection {
    name: String,
    peer: SocketAddr,
    slot: StreamSlot,
}

impl TcpConnection {
    /// Wrap an accepted or already connected stream.
    pub fn connected(stream: Rc<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            name: peer.to_string(),
            peer,
            slot: Rc::new(RefCell::new(Some(stream))),
        }
    }

    /// A connection whose stream the reactor fills in once connect completes.
    pub fn pending(peer: SocketAddr) -> Self {
        Self {
            name: peer.to_string(),
            peer,
            slot: Rc::new(RefCell::new(None)),
        }
    }

    pub fn slot(&self) -> StreamSlot {
        Rc::clone(&self.slot)
    }

    fn stream(&self) -> io::Result<Rc<TcpStream>> {
        self.slot
            .borrow()
            .as_ref()
            .map(Rc::clone)
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}

impl ConnectedSocket for TcpConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    fn connected(&self) -> bool {
        self.slot.borrow().is_some()
    }

    fn send(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize> {
        let stream = self.stream()?;
        let sent = stream.try_write(buffer.readable_slice())?;
        buffer.skip(sent);
        Ok(sent)
    }

    fn receive(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize> {
        let stream = self.stream()?;
        let received = stream.try_read(buffer.writable_slice())?;
        buffer.advance_write(received);
        Ok(received)
    }

    /// The descriptor closes once the reactor task drops its clone too.
    fn close(&mut self) {
        self.slot.borrow_mut().take();
    }
}
