//! HTTP/1.x wire format.
//!
//! # Data Flow
//! ```text
//! recv buffer
//!     → parser.rs (start line, headers, body framing, body views)
//!     → message.rs (HttpRequest / HttpResponse)
//!     → formatter.rs (start line, headers, chunked or raw blocks)
//!     → send buffer
//! ```
//!
//! `transaction.rs` bundles one request, one response and the parser and
//! formatter that move them across a single exchange.

pub mod chars;
pub mod formatter;
pub mod message;
pub mod parser;
pub mod transaction;
pub mod uri;

pub use formatter::{FormatTarget, MessageFormatter};
pub use message::{copy_all, FilterResult, Header, HttpMessage, HttpRequest, HttpResponse, PeerAddress, HTTP_1_0, HTTP_1_1};
pub use parser::{BodyChunk, BodyFraming, MessageParser, ParseTarget};
pub use transaction::{ClientTransaction, ServerTransaction, Transaction, TransactionContext};
pub use uri::{RequestUri, UriKind};
