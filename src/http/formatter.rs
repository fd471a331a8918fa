//! Incremental HTTP/1.x message formatter.
//!
//! # Responsibilities
//! - Serialize the start line and each header as atomic units, resuming at
//!   the next unit after the caller flushes a full buffer
//! - Frame body blocks as chunks or as raw bytes
//!
//! # Design Decisions
//! - Chunked framing is chosen when `Transfer-Encoding` is present and not
//!   `identity`. Otherwise body bytes are written unframed and the message's
//!   own `Content-Length` (or connection close) delimits them.
//! - A chunk header reserves room for its trailing CRLF up front, so
//!   `end_block` always fits.

use crate::buffer::ByteBuffer;
use crate::error::{Error, Flow, HttpError, Result};
use crate::http::chars;
use crate::http::message::{HttpMessage, HttpRequest, HttpResponse, HTTP_1_0, HTTP_1_1};
use crate::http::uri;

/// Space a chunk needs besides its data: up to 8 hex digits, CRLF, CRLF.
const CHUNK_OVERHEAD: usize = 12;

/// A message the formatter can serialize.
pub trait FormatTarget {
    /// Write the start line without its CRLF. `Ok(false)` when out of space.
    fn format_start_line(&self, buffer: &mut ByteBuffer) -> Result<bool>;

    fn message(&self) -> &HttpMessage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatState {
    StartLine,
    Header(usize),
    Body,
    Complete,
}

#[derive(Debug, Clone)]
pub struct MessageFormatter {
    state: FormatState,
    chunked: bool,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self {
            state: FormatState::StartLine,
            chunked: false,
        }
    }
}

impl MessageFormatter {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn headers_complete(&self) -> bool {
        matches!(self.state, FormatState::Body | FormatState::Complete)
    }

    pub fn body_complete(&self) -> bool {
        self.state == FormatState::Complete
    }

    /// Write the start line and headers. `Again` means flush and call again.
    pub fn format_headers<M: FormatTarget>(&mut self, buffer: &mut ByteBuffer, message: &M) -> Result<Flow> {
        loop {
            match self.state {
                FormatState::StartLine => {
                    buffer.write_mark();
                    if !message.format_start_line(buffer)? || !buffer.put_all(b"\r\n") {
                        buffer.write_reset();
                        return Ok(Flow::Again);
                    }
                    self.state = FormatState::Header(0);
                }
                FormatState::Header(index) => {
                    buffer.write_mark();
                    let headers = message.message().headers();
                    let Some(header) = headers.get(index) else {
                        if !buffer.put_all(b"\r\n") {
                            buffer.write_reset();
                            return Ok(Flow::Again);
                        }
                        self.chunked = message
                            .message()
                            .find_header("Transfer-Encoding")
                            .is_some_and(|h| !h.value.starts_with("identity"));
                        self.state = FormatState::Body;
                        return Ok(Flow::Success);
                    };
                    if !format_header(buffer, &header.name, &header.value)? {
                        buffer.write_reset();
                        return Ok(Flow::Again);
                    }
                    self.state = FormatState::Header(index + 1);
                }
                FormatState::Body | FormatState::Complete => return Err(Error::InvalidState),
            }
        }
    }

    /// Open a body block of up to `requested` bytes.
    ///
    /// Returns how many bytes the caller may write, or `None` when the
    /// buffer must be flushed first.
    pub fn begin_block(&mut self, buffer: &mut ByteBuffer, requested: u64) -> Result<Option<usize>> {
        if self.state != FormatState::Body {
            return Err(Error::InvalidState);
        }
        if requested == 0 {
            return Err(Error::InvalidArgument);
        }
        let requested = usize::try_from(requested).unwrap_or(usize::MAX);

        if !self.chunked {
            let available = requested.min(buffer.writable());
            return Ok((available > 0).then_some(available));
        }

        if buffer.writable() <= CHUNK_OVERHEAD {
            return Ok(None);
        }
        let available = requested.min(buffer.writable() - CHUNK_OVERHEAD);
        buffer.write_mark();
        if !buffer.put_all(format!("{available:x}\r\n").as_bytes()) {
            buffer.write_reset();
            return Ok(None);
        }
        Ok(Some(available))
    }

    /// Close the block opened by `begin_block`.
    pub fn end_block(&mut self, buffer: &mut ByteBuffer) -> Result<Flow> {
        if self.state != FormatState::Body {
            return Err(Error::InvalidState);
        }
        if self.chunked && !buffer.put_all(b"\r\n") {
            return Ok(Flow::Again);
        }
        Ok(Flow::Success)
    }

    /// Terminate the body: the zero-size chunk, or nothing when unframed.
    pub fn end_body(&mut self, buffer: &mut ByteBuffer) -> Result<Flow> {
        if self.state != FormatState::Body {
            return Err(Error::InvalidState);
        }
        if self.chunked && !buffer.put_all(b"0\r\n\r\n") {
            return Ok(Flow::Again);
        }
        self.state = FormatState::Complete;
        Ok(Flow::Success)
    }
}

fn format_header(buffer: &mut ByteBuffer, name: &str, value: &str) -> Result<bool> {
    if name.is_empty() || !name.bytes().all(chars::is_token) {
        return Err(HttpError::BadFieldName.into());
    }
    if !buffer.put_all(name.as_bytes()) || !buffer.put_all(b": ") {
        return Ok(false);
    }

    let mut pending_space = false;
    let mut written = false;
    for c in value.bytes() {
        if chars::is_lws(c) {
            pending_space = true;
            continue;
        }
        if !chars::is_text(c) {
            return Err(HttpError::BadFieldValue.into());
        }
        if pending_space && written && !buffer.put(b' ') {
            return Ok(false);
        }
        if !buffer.put(c) {
            return Ok(false);
        }
        pending_space = false;
        written = true;
    }

    Ok(buffer.put_all(b"\r\n"))
}

fn version_text(version: u16) -> Result<&'static [u8]> {
    match version {
        HTTP_1_1 => Ok(b"HTTP/1.1"),
        HTTP_1_0 => Ok(b"HTTP/1.0"),
        _ => Err(HttpError::BadVersion.into()),
    }
}

impl FormatTarget for HttpRequest {
    fn format_start_line(&self, buffer: &mut ByteBuffer) -> Result<bool> {
        if self.method().is_empty() || !self.method().bytes().all(chars::is_token) {
            return Err(HttpError::BadMethod.into());
        }
        let version = version_text(self.version())?;
        Ok(buffer.put_all(self.method().as_bytes())
            && buffer.put(b' ')
            && uri::format_request_uri(buffer, self.uri())
            && buffer.put(b' ')
            && buffer.put_all(version))
    }

    fn message(&self) -> &HttpMessage {
        self
    }
}

impl FormatTarget for HttpResponse {
    fn format_start_line(&self, buffer: &mut ByteBuffer) -> Result<bool> {
        if !(100..=999).contains(&self.status()) {
            return Err(HttpError::BadStatusCode.into());
        }
        if !self.reason().bytes().all(|c| chars::is_text(c) && c != b'\t') {
            return Err(HttpError::BadReasonPhrase.into());
        }
        let version = version_text(self.version())?;
        Ok(buffer.put_all(version)
            && buffer.put_all(format!(" {} ", self.status()).as_bytes())
            && buffer.put_all(self.reason().as_bytes()))
    }

    fn message(&self) -> &HttpMessage {
        self
    }
}
