//! Structured HTTP messages.
//!
//! # Responsibilities
//! - Keep headers in wire order with case-insensitive lookup
//! - Carry the body and connection flags computed by the parser
//! - Copy messages between transactions through a header filter
//!
//! # Design Decisions
//! - Request and response wrap a shared `HttpMessage` and deref to it, so
//!   header and flag accessors are written once.
//! - `reset` clears without freeing, so a reused transaction keeps its
//!   allocations.

use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::http::uri::{RequestUri, UriKind};

/// Encoded HTTP/1.1.
pub const HTTP_1_1: u16 = 110;
/// Encoded HTTP/1.0.
pub const HTTP_1_0: u16 = 100;

/// One header field in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Verdict of a header copy filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Copy,
    Skip,
    CopyAndStop,
    SkipAndStop,
    Error,
}

/// Filter that copies every header.
pub fn copy_all(_name: &str, _value: &str) -> FilterResult {
    FilterResult::Copy
}

/// Headers, version and flags shared by requests and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    headers: Vec<Header>,
    version: u16,
    has_body: bool,
    reuse_connection: bool,
    send_100_continue: bool,
}

impl Default for HttpMessage {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            version: HTTP_1_1,
            has_body: false,
            reuse_connection: false,
            send_100_continue: false,
        }
    }
}

impl HttpMessage {
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First header named `name`, ignoring case.
    pub fn find_header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Remove every header named `name`; returns how many were removed.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// Append `other`'s headers that `filter` lets through.
    pub fn copy_headers<F>(&mut self, other: &HttpMessage, mut filter: F) -> Result<()>
    where
        F: FnMut(&str, &str) -> FilterResult,
    {
        for header in &other.headers {
            match filter(&header.name, &header.value) {
                FilterResult::Copy => self.headers.push(header.clone()),
                FilterResult::Skip => {}
                FilterResult::CopyAndStop => {
                    self.headers.push(header.clone());
                    break;
                }
                FilterResult::SkipAndStop => break,
                FilterResult::Error => return Err(Error::InvalidField),
            }
        }
        Ok(())
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn set_has_body(&mut self, has_body: bool) {
        self.has_body = has_body;
    }

    pub fn reuse_connection(&self) -> bool {
        self.reuse_connection
    }

    pub fn set_reuse_connection(&mut self, reuse: bool) {
        self.reuse_connection = reuse;
    }

    pub fn send_100_continue(&self) -> bool {
        self.send_100_continue
    }

    pub fn set_send_100_continue(&mut self, send: bool) {
        self.send_100_continue = send;
    }

    fn copy_flags(&mut self, other: &HttpMessage) {
        self.version = other.version;
        self.has_body = other.has_body;
        self.reuse_connection = other.reuse_connection;
        self.send_100_continue = other.send_100_continue;
    }

    pub fn reset(&mut self) {
        self.headers.clear();
        self.version = HTTP_1_1;
        self.has_body = false;
        self.reuse_connection = false;
        self.send_100_continue = false;
    }
}

/// Host, port and scheme a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    message: HttpMessage,
    method: String,
    uri: RequestUri,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, uri: RequestUri) -> Self {
        Self {
            message: HttpMessage::default(),
            method: method.into(),
            uri,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn uri(&self) -> &RequestUri {
        &self.uri
    }

    pub fn uri_mut(&mut self) -> &mut RequestUri {
        &mut self.uri
    }

    /// Replace this request with a filtered copy of `other`.
    pub fn copy_from<F>(&mut self, other: &HttpRequest, filter: F) -> Result<()>
    where
        F: FnMut(&str, &str) -> FilterResult,
    {
        self.reset();
        self.message.copy_flags(&other.message);
        self.method.push_str(&other.method);
        self.uri = other.uri.clone();
        self.message.copy_headers(&other.message, filter)
    }

    /// Resolve the addressed host: absolute URI first, then the Host header.
    pub fn peer_address(&self) -> Result<PeerAddress> {
        let secure = self.uri.kind() == UriKind::Https;
        let default_port = if secure { 443 } else { 80 };

        if let Some(host) = self.uri.host() {
            return Ok(PeerAddress {
                host: host.to_string(),
                port: self.uri.port().unwrap_or(default_port),
                secure,
            });
        }

        let header = self.find_header("Host").ok_or(Error::InvalidArgument)?;
        let (host, port) = match header.value.split_once(':') {
            Some((host, port)) => {
                let digits: String = port.chars().take_while(|c| c.is_ascii_digit()).collect();
                let port = digits.parse::<u16>().unwrap_or(0);
                (host, if port == 0 { default_port } else { port })
            }
            None => (header.value.as_str(), default_port),
        };

        Ok(PeerAddress {
            host: host.to_string(),
            port,
            secure,
        })
    }

    pub fn reset(&mut self) {
        self.message.reset();
        self.method.clear();
        self.uri.reset();
    }
}

impl Deref for HttpRequest {
    type Target = HttpMessage;

    fn deref(&self) -> &HttpMessage {
        &self.message
    }
}

impl DerefMut for HttpRequest {
    fn deref_mut(&mut self) -> &mut HttpMessage {
        &mut self.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    message: HttpMessage,
    status: u16,
    reason: String,
}

impl HttpResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            message: HttpMessage::default(),
            status,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    /// Replace this response with a filtered copy of `other`.
    pub fn copy_from<F>(&mut self, other: &HttpResponse, filter: F) -> Result<()>
    where
        F: FnMut(&str, &str) -> FilterResult,
    {
        self.reset();
        self.message.copy_flags(&other.message);
        self.status = other.status;
        self.reason.push_str(&other.reason);
        self.message.copy_headers(&other.message, filter)
    }

    pub fn reset(&mut self) {
        self.message.reset();
        self.status = 0;
        self.reason.clear();
    }
}

impl Deref for HttpResponse {
    type Target = HttpMessage;

    fn deref(&self) -> &HttpMessage {
        &self.message
    }
}

impl DerefMut for HttpResponse {
    fn deref_mut(&mut self) -> &mut HttpMessage {
        &mut self.message
    }
}
