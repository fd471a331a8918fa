//! Transport seam under the HTTP state machines.

use std::io;
use std::net::SocketAddr;

use crate::buffer::ByteBuffer;

/// A connected, non-blocking byte stream (plain TCP, TLS, or a test pipe).
///
/// `send` and `receive` return `io::ErrorKind::WouldBlock` instead of
/// blocking. `receive` returning `Ok(0)` means the peer closed.
pub trait ConnectedSocket {
    fn name(&self) -> &str;

    fn peer_address(&self) -> SocketAddr;

    fn connected(&self) -> bool;

    fn secure(&self) -> bool {
        false
    }

    /// The transport itself needs a read before HTTP can progress (e.g. TLS).
    fn want_read(&self) -> bool {
        false
    }

    /// The transport itself needs a write before HTTP can progress.
    fn want_write(&self) -> bool {
        false
    }

    /// Write readable bytes of `buffer`, advancing its read cursor.
    fn send(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize>;

    /// Read into the writable space of `buffer`, advancing its write cursor.
    fn receive(&mut self, buffer: &mut ByteBuffer) -> io::Result<usize>;

    fn close(&mut self);
}
