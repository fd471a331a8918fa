//! Seams between the socket state machines and the outside world.
//!
//! # Data Flow
//! ```text
//! reactor readiness
//!     → ClientSocket / ServerSocket (drive flags select directions)
//!     → ConnectedSocket (send / receive on ByteBuffers)
//!     → Multiplexer (buffers, transactions, interest updates, removal)
//! ```
//!
//! # Design Decisions
//! - Sockets never own their handler or multiplexer; both are passed into
//!   every driving call. A proxy can then drive its peer socket from inside
//!   a callback without shared ownership of the handler.
//! - Synchronous pull calls (`read_response_body`, `send_request_body`, ...)
//!   run the same state machine with a narrow body adaptor instead of a full
//!   handler.

pub mod adaptor;
pub mod drive;
pub mod multiplexer;
pub mod socket;

pub use adaptor::{Body, SliceConsumer, SliceProducer};
pub use drive::Drive;
pub use multiplexer::{ExecuteError, Interest, Multiplexer};
pub use socket::ConnectedSocket;
