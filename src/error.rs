//! Error vocabulary and flow-control signals.
//!
//! # Design Decisions
//! - Scheduling signals (`Flow`) are never errors. Callbacks return
//!   `Result<Flow>` so `?` only ever propagates real failures.
//! - Protocol errors live in their own enum so the server can tell a
//!   malformed request (400) from an internal failure (500).

use std::fmt;
use std::io;

/// Result alias used across the stack.
pub type Result<T> = std::result::Result<T, Error>;

/// Scheduling signal returned by state machine steps and handler callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Progress was made, keep going.
    Success,
    /// Not enough data or buffer space; wait for the next readiness event.
    Again,
    /// The handler is flow controlled; stop without touching the registration.
    Pause,
    /// A synchronous pull request has been satisfied.
    Break,
    /// The server handler wants to respond immediately.
    SendResponse,
    /// The connection must be dropped once the current transaction is done.
    Cleanup,
    /// The remote side closed the connection.
    Closed,
    /// The multiplexer is shutting down.
    Shutdown,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flow::Success => "success",
            Flow::Again => "again",
            Flow::Pause => "pause",
            Flow::Break => "break",
            Flow::SendResponse => "send-response",
            Flow::Cleanup => "cleanup",
            Flow::Closed => "closed",
            Flow::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Part of a request-URI that failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriPart {
    Asterisk,
    AbsPath,
    Query,
    Fragment,
    Scheme,
    Host,
    Port,
}

/// Malformed wire data. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("bad header field name")]
    BadFieldName,
    #[error("bad header field value")]
    BadFieldValue,
    #[error("bad content-length")]
    BadContentLength,
    #[error("bad chunk size")]
    BadChunkSize,
    #[error("bad http version")]
    BadVersion,
    #[error("bad request method")]
    BadMethod,
    #[error("bad status code")]
    BadStatusCode,
    #[error("bad reason phrase")]
    BadReasonPhrase,
    #[error("bad request-uri ({0:?})")]
    BadUri(UriPart),
    #[error("multipart/byteranges bodies are not supported")]
    MultipartNotSupported,
}

/// Crate error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http protocol error: {0}")]
    Http(#[from] HttpError),
    #[error("overflow")]
    Overflow,
    #[error("underflow")]
    Underflow,
    #[error("invalid state")]
    InvalidState,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("null pointer")]
    NullPointer,
    #[error("cannot find")]
    CannotFind,
    #[error("not owner")]
    NotOwner,
    #[error("uniqueness violation")]
    UniquenessViolation,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not supported")]
    NotSupported,
    #[error("invalid header field")]
    InvalidField,
    #[error("unexpected flow signal: {0}")]
    Unexpected(Flow),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the error came from malformed wire data.
    pub fn is_http_error(&self) -> bool {
        matches!(self, Error::Http(_))
    }
}
