//! Incremental HTTP/1.x message parser.
//!
//! # Data Flow
//! ```text
//! recv buffer
//!     → parse_headers (start line, field names, field values, post_parse)
//!     → parse_body / consume_body (zero-copy views into the buffer)
//!     → skip_trailer (chunked only)
//! ```
//!
//! # Design Decisions
//! - Every production (start line, one field name, one field value, one
//!   chunk-size line, one trailer line) is atomic. Its start is recorded with
//!   the buffer's read mark and a short read rewinds to it, so the parser
//!   keeps no cursor of its own and the buffer may be compacted between calls.
//! - Body framing is fixed by `post_parse` and never changes for the message.
//! - `Connection: close`, `Expect: 100-continue`, `Transfer-Encoding:
//!   identity` and `multipart/byteranges` are case-sensitive prefix matches,
//!   kept for wire compatibility with existing peers.
//! - Explicit framing headers win over the message type: a GET with a
//!   `Content-Length` has its body read, so the bytes are never taken for the
//!   next pipelined request.
//! - Chunk sizes use checked arithmetic; an overflowing size is `BadChunkSize`.

use crate::buffer::ByteBuffer;
use crate::error::{Error, Flow, HttpError, Result};
use crate::http::chars;
use crate::http::message::{HttpMessage, HttpRequest, HttpResponse, HTTP_1_0, HTTP_1_1};
use crate::http::uri;

/// Default upper bound for one field name, field value or reason phrase.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 8 * 1024;

/// A message the parser can fill in.
pub trait ParseTarget {
    /// Parse the start line. `Ok(None)` means more bytes are needed.
    fn parse_start_line(&mut self, buffer: &mut ByteBuffer, max_field_size: usize) -> Result<Option<()>>;

    /// True when this message can never carry a body.
    fn body_not_allowed(&self) -> bool;

    fn message_mut(&mut self) -> &mut HttpMessage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    StartLine,
    FieldName,
    FieldValue,
    Complete,
}

/// How the body of the current message is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    NoBody,
    ContentLength,
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    EndChunk,
    Trailer,
    Complete,
}

/// Result of `parse_body`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyChunk {
    /// `len` body bytes start at `offset` in the buffer's storage.
    Data { offset: usize, len: usize },
    /// More bytes must be received first.
    Again,
    /// The body is complete.
    End,
}

enum FieldName {
    Name(String),
    EndOfHeaders,
}

#[derive(Debug, Clone)]
pub struct MessageParser {
    state: HeaderState,
    framing: BodyFraming,
    chunk: ChunkState,
    remaining: u64,
    field_name: String,
    scratch: Vec<u8>,
    max_field_size: usize,
    head_response: bool,
    peer_closed: bool,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_SIZE)
    }
}

impl MessageParser {
    pub fn new(max_field_size: usize) -> Self {
        Self {
            state: HeaderState::StartLine,
            framing: BodyFraming::NoBody,
            chunk: ChunkState::Size,
            remaining: 0,
            field_name: String::new(),
            scratch: Vec::new(),
            max_field_size,
            head_response: false,
            peer_closed: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = HeaderState::StartLine;
        self.framing = BodyFraming::NoBody;
        self.chunk = ChunkState::Size;
        self.remaining = 0;
        self.field_name.clear();
        self.scratch.clear();
        self.head_response = false;
        self.peer_closed = false;
    }

    /// The message being parsed answers a HEAD request and has no body.
    pub fn set_head_response(&mut self, head: bool) {
        self.head_response = head;
    }

    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    /// Nothing of the next message has been parsed yet.
    pub fn awaiting_start_line(&self) -> bool {
        self.state == HeaderState::StartLine
    }

    pub fn headers_complete(&self) -> bool {
        self.state == HeaderState::Complete
    }

    /// Body bytes still expected in the current content-length body or chunk.
    pub fn body_bytes_remaining(&self) -> u64 {
        self.remaining
    }

    /// True once a chunked body reached its zero-size chunk.
    pub fn is_last_chunk(&self) -> bool {
        matches!(self.chunk, ChunkState::Trailer | ChunkState::Complete)
    }

    /// Parse the start line and headers, then decide body framing.
    pub fn parse_headers<M: ParseTarget>(&mut self, buffer: &mut ByteBuffer, message: &mut M) -> Result<Flow> {
        loop {
            match self.state {
                HeaderState::StartLine => {
                    while buffer.peek().is_some_and(chars::is_lws) {
                        buffer.skip(1);
                    }
                    buffer.read_mark();
                    match message.parse_start_line(buffer, self.max_field_size)? {
                        Some(()) => {
                            buffer.read_mark();
                            self.state = HeaderState::FieldName;
                        }
                        None => {
                            buffer.read_reset();
                            return Ok(Flow::Again);
                        }
                    }
                }
                HeaderState::FieldName => match self.parse_field_name(buffer)? {
                    Some(FieldName::Name(name)) => {
                        buffer.read_mark();
                        self.field_name = name;
                        self.state = HeaderState::FieldValue;
                    }
                    Some(FieldName::EndOfHeaders) => {
                        buffer.read_mark();
                        self.state = HeaderState::Complete;
                        self.post_parse(message)?;
                        return Ok(Flow::Success);
                    }
                    None => {
                        buffer.read_reset();
                        return Ok(Flow::Again);
                    }
                },
                HeaderState::FieldValue => match self.parse_field_value(buffer)? {
                    Some(value) => {
                        buffer.read_mark();
                        let name = std::mem::take(&mut self.field_name);
                        message.message_mut().add_header(name, value);
                        self.state = HeaderState::FieldName;
                    }
                    None => {
                        buffer.read_reset();
                        return Ok(Flow::Again);
                    }
                },
                HeaderState::Complete => return Err(Error::InvalidState),
            }
        }
    }

    fn push_scratch(&mut self, c: u8) -> Result<()> {
        if self.scratch.len() >= self.max_field_size {
            return Err(Error::Overflow);
        }
        self.scratch.push(c);
        Ok(())
    }

    fn take_scratch(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.scratch).into_owned();
        self.scratch.clear();
        text
    }

    // field-name = token, terminated by ':'; an empty line ends the headers
    fn parse_field_name(&mut self, buffer: &mut ByteBuffer) -> Result<Option<FieldName>> {
        self.scratch.clear();
        loop {
            let Some(c) = buffer.next_byte() else { return Ok(None) };
            if self.scratch.is_empty() {
                match c {
                    b'\n' => return Ok(Some(FieldName::EndOfHeaders)),
                    b'\r' => {
                        return match buffer.next_byte() {
                            None => Ok(None),
                            Some(b'\n') => Ok(Some(FieldName::EndOfHeaders)),
                            Some(_) => Err(HttpError::BadFieldName.into()),
                        }
                    }
                    _ => {}
                }
            }
            match c {
                b':' if !self.scratch.is_empty() => return Ok(Some(FieldName::Name(self.take_scratch()))),
                c if chars::is_token(c) => self.push_scratch(c)?,
                _ => return Err(HttpError::BadFieldName.into()),
            }
        }
    }

    // field-value = *( field-content | LWS ); folding and runs of LWS become one SP
    fn parse_field_value(&mut self, buffer: &mut ByteBuffer) -> Result<Option<String>> {
        self.scratch.clear();
        let mut pending_space = false;
        loop {
            let Some(c) = buffer.peek() else { return Ok(None) };
            match c {
                b' ' | b'\t' => {
                    buffer.skip(1);
                    pending_space = true;
                }
                b'\r' | b'\n' => {
                    buffer.skip(1);
                    if c == b'\r' {
                        match buffer.next_byte() {
                            None => return Ok(None),
                            Some(b'\n') => {}
                            Some(_) => return Err(HttpError::BadFieldValue.into()),
                        }
                    }
                    match buffer.peek() {
                        None => return Ok(None),
                        Some(b' ' | b'\t') => pending_space = true,
                        Some(_) => return Ok(Some(self.take_scratch())),
                    }
                }
                c if chars::is_text(c) => {
                    buffer.skip(1);
                    if pending_space && !self.scratch.is_empty() {
                        self.push_scratch(b' ')?;
                    }
                    pending_space = false;
                    self.push_scratch(c)?;
                }
                _ => return Err(HttpError::BadFieldValue.into()),
            }
        }
    }

    fn post_parse<M: ParseTarget>(&mut self, message: &mut M) -> Result<()> {
        let body_not_allowed = message.body_not_allowed();
        let msg = message.message_mut();
        let version = msg.version();

        let mut reuse = version >= HTTP_1_1;
        let mut send_100 = false;
        let mut content_length = None;
        let mut chunked = false;
        let mut multipart = false;

        for header in msg.headers() {
            let name = header.name.as_str();
            let value = header.value.as_str();
            if name.eq_ignore_ascii_case("Expect") {
                send_100 = value.starts_with("100-continue");
            } else if name.eq_ignore_ascii_case("Connection") {
                if version == HTTP_1_1 && value.starts_with("close") {
                    reuse = false;
                }
            } else if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(parse_content_length(value)?);
            } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
                chunked = !value.starts_with("identity");
            } else if name.eq_ignore_ascii_case("Content-Type") {
                multipart = value.starts_with("multipart/byteranges");
            }
        }

        msg.set_send_100_continue(send_100);
        msg.set_reuse_connection(reuse);

        // a response to HEAD describes an entity it never carries
        if self.head_response {
            self.framing = BodyFraming::NoBody;
            self.remaining = 0;
            msg.set_has_body(false);
        } else if chunked {
            self.framing = BodyFraming::Chunked;
            self.chunk = ChunkState::Size;
            self.remaining = 0;
            msg.set_has_body(true);
        } else if let Some(length) = content_length {
            self.framing = BodyFraming::ContentLength;
            self.remaining = length;
            msg.set_has_body(length > 0);
        } else if multipart {
            return Err(HttpError::MultipartNotSupported.into());
        } else if body_not_allowed {
            self.framing = BodyFraming::NoBody;
            self.remaining = 0;
            msg.set_has_body(false);
        } else {
            self.framing = BodyFraming::UntilClose;
            self.remaining = u64::MAX;
            msg.set_has_body(true);
            msg.set_reuse_connection(false);
        }

        tracing::trace!(framing = ?self.framing, remaining = self.remaining, reuse, "Headers parsed");
        Ok(())
    }

    /// Locate the next run of body bytes without consuming them.
    pub fn parse_body(&mut self, buffer: &mut ByteBuffer) -> Result<BodyChunk> {
        if self.state != HeaderState::Complete {
            return Err(Error::InvalidState);
        }

        match self.framing {
            BodyFraming::NoBody => Ok(BodyChunk::End),
            BodyFraming::ContentLength | BodyFraming::UntilClose => self.unencoded_chunk(buffer),
            BodyFraming::Chunked => loop {
                match self.chunk {
                    ChunkState::EndChunk => {
                        buffer.read_mark();
                        if skip_line(buffer).is_none() {
                            buffer.read_reset();
                            return Ok(BodyChunk::Again);
                        }
                        buffer.read_mark();
                        self.chunk = ChunkState::Size;
                    }
                    ChunkState::Size => {
                        buffer.read_mark();
                        let Some(size) = parse_chunk_size(buffer)? else {
                            buffer.read_reset();
                            return Ok(BodyChunk::Again);
                        };
                        buffer.read_mark();
                        if size == 0 {
                            self.chunk = ChunkState::Trailer;
                            return Ok(BodyChunk::End);
                        }
                        self.remaining = size;
                        self.chunk = ChunkState::Data;
                    }
                    ChunkState::Data => return self.unencoded_chunk(buffer),
                    ChunkState::Trailer | ChunkState::Complete => return Ok(BodyChunk::End),
                }
            },
        }
    }

    fn unencoded_chunk(&self, buffer: &ByteBuffer) -> Result<BodyChunk> {
        if self.remaining == 0 {
            return Ok(BodyChunk::End);
        }
        if !buffer.is_readable() {
            if self.peer_closed {
                return Ok(BodyChunk::End);
            }
            return Ok(BodyChunk::Again);
        }
        let len = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buffer.readable());
        Ok(BodyChunk::Data {
            offset: buffer.read_position(),
            len,
        })
    }

    /// Mark `n` body bytes as consumed. Never drops below zero remaining.
    pub fn consume_body(&mut self, buffer: &mut ByteBuffer, n: usize) -> Result<()> {
        if self.state != HeaderState::Complete {
            return Err(Error::InvalidState);
        }
        if n == 0 {
            return Ok(());
        }
        if self.framing == BodyFraming::Chunked && self.chunk != ChunkState::Data {
            return Err(Error::InvalidState);
        }

        let n = u64::try_from(n).unwrap_or(u64::MAX).min(self.remaining);
        let skipped = buffer.skip(usize::try_from(n).unwrap_or(usize::MAX));
        self.remaining -= skipped as u64;
        buffer.read_mark();

        if self.remaining == 0 && self.framing == BodyFraming::Chunked {
            self.chunk = ChunkState::EndChunk;
        }
        Ok(())
    }

    /// The peer closed the connection. A close-delimited body ends once the
    /// bytes already buffered have been consumed.
    pub fn end_of_stream(&mut self) -> bool {
        if self.state == HeaderState::Complete && self.framing == BodyFraming::UntilClose {
            self.peer_closed = true;
            return true;
        }
        false
    }

    /// Discard trailer lines after the last chunk.
    pub fn skip_trailer(&mut self, buffer: &mut ByteBuffer) -> Result<Flow> {
        if self.framing != BodyFraming::Chunked || self.chunk != ChunkState::Trailer {
            return Ok(Flow::Success);
        }
        loop {
            buffer.read_mark();
            match skip_line(buffer) {
                None => {
                    buffer.read_reset();
                    return Ok(Flow::Again);
                }
                Some(0) => {
                    buffer.read_mark();
                    self.chunk = ChunkState::Complete;
                    return Ok(Flow::Success);
                }
                Some(_) => {}
            }
        }
    }
}

fn parse_content_length(value: &str) -> Result<u64> {
    if value.is_empty() || !value.bytes().all(|c| c.is_ascii_digit()) {
        return Err(HttpError::BadContentLength.into());
    }
    value.parse::<u64>().map_err(|_| HttpError::BadContentLength.into())
}

/// Consume through the next LF. Returns the line length without CR/LF.
fn skip_line(buffer: &mut ByteBuffer) -> Option<usize> {
    let mut count = 0;
    loop {
        match buffer.next_byte()? {
            b'\n' => return Some(count),
            b'\r' => {}
            _ => count += 1,
        }
    }
}

// chunk-size [ chunk-extension ] CRLF
fn parse_chunk_size(buffer: &mut ByteBuffer) -> Result<Option<u64>> {
    while buffer.peek().is_some_and(chars::is_space) {
        buffer.skip(1);
    }

    let mut size: u64 = 0;
    loop {
        let Some(c) = buffer.peek() else { return Ok(None) };
        let Some(digit) = chars::hex_value(c) else { break };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or(HttpError::BadChunkSize)?;
        buffer.skip(1);
    }

    if skip_line(buffer).is_none() {
        return Ok(None);
    }
    Ok(Some(size))
}

fn parse_version(buffer: &mut ByteBuffer, request_line: bool) -> Result<Option<u16>> {
    while buffer.peek().is_some_and(chars::is_space) {
        buffer.skip(1);
    }
    if buffer.readable() < 9 {
        return Ok(None);
    }

    let version = if buffer.starts_with(b"HTTP/1.1") {
        HTTP_1_1
    } else if buffer.starts_with(b"HTTP/1.0") {
        HTTP_1_0
    } else {
        return Err(HttpError::BadVersion.into());
    };
    buffer.skip(8);

    if request_line {
        match buffer.next_byte() {
            Some(b'\n') => {}
            Some(b'\r') => match buffer.next_byte() {
                None => return Ok(None),
                Some(b'\n') => {}
                Some(_) => return Err(HttpError::BadVersion.into()),
            },
            _ => return Err(HttpError::BadVersion.into()),
        }
    } else if !buffer.next_byte().is_some_and(chars::is_space) {
        return Err(HttpError::BadVersion.into());
    }

    Ok(Some(version))
}

impl ParseTarget for HttpRequest {
    // Request-Line = Method SP Request-URI SP HTTP-Version CRLF
    fn parse_start_line(&mut self, buffer: &mut ByteBuffer, max_field_size: usize) -> Result<Option<()>> {
        self.reset();

        let mut method = Vec::new();
        loop {
            let Some(c) = buffer.next_byte() else { return Ok(None) };
            match c {
                b' ' if !method.is_empty() => break,
                c if chars::is_token(c) && method.len() < max_field_size => method.push(c),
                _ => return Err(HttpError::BadMethod.into()),
            }
        }
        self.set_method(String::from_utf8_lossy(&method).into_owned());

        if uri::parse_request_uri(buffer, self.uri_mut())?.is_none() {
            return Ok(None);
        }

        let Some(version) = parse_version(buffer, true)? else { return Ok(None) };
        self.set_version(version);
        Ok(Some(()))
    }

    fn body_not_allowed(&self) -> bool {
        ["GET", "DELETE"].iter().any(|m| self.method().eq_ignore_ascii_case(m))
    }

    fn message_mut(&mut self) -> &mut HttpMessage {
        self
    }
}

impl ParseTarget for HttpResponse {
    // Status-Line = HTTP-Version SP Status-Code SP Reason-Phrase CRLF
    fn parse_start_line(&mut self, buffer: &mut ByteBuffer, max_field_size: usize) -> Result<Option<()>> {
        self.reset();

        let Some(version) = parse_version(buffer, false)? else { return Ok(None) };
        self.set_version(version);

        while buffer.peek().is_some_and(chars::is_space) {
            buffer.skip(1);
        }

        let mut status: u16 = 0;
        for _ in 0..3 {
            let Some(c) = buffer.next_byte() else { return Ok(None) };
            if !c.is_ascii_digit() {
                return Err(HttpError::BadStatusCode.into());
            }
            status = status * 10 + u16::from(c - b'0');
        }
        self.set_status(status);

        match buffer.peek() {
            None => return Ok(None),
            Some(b' ' | b'\t' | b'\r' | b'\n') => {}
            Some(_) => return Err(HttpError::BadStatusCode.into()),
        }

        let mut reason = Vec::new();
        let mut pending_space = false;
        loop {
            let Some(c) = buffer.next_byte() else { return Ok(None) };
            match c {
                b' ' | b'\t' => pending_space = true,
                b'\n' => break,
                b'\r' => match buffer.next_byte() {
                    None => return Ok(None),
                    Some(b'\n') => break,
                    Some(_) => return Err(HttpError::BadReasonPhrase.into()),
                },
                c if chars::is_text(c) && reason.len() < max_field_size => {
                    if pending_space && !reason.is_empty() {
                        reason.push(b' ');
                    }
                    pending_space = false;
                    reason.push(c);
                }
                _ => return Err(HttpError::BadReasonPhrase.into()),
            }
        }
        self.set_reason(String::from_utf8_lossy(&reason).into_owned());
        Ok(Some(()))
    }

    fn body_not_allowed(&self) -> bool {
        self.status() < 200 || self.status() == 204 || self.status() == 304
    }

    fn message_mut(&mut self) -> &mut HttpMessage {
        self
    }
}
