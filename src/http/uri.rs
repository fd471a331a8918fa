//! Request-URI model, parsing and formatting.
//!
//! # Responsibilities
//! - Recognize `*`, `abs_path`, `http://` / `https://` absolute URIs and
//!   opaque other-scheme URIs (e.g. `sip:`)
//! - Write the same forms back, omitting default ports
//!
//! # Design Decisions
//! - Escapes are kept undecoded, so a parsed URI formats back byte for byte.
//! - Parsing runs inside the parser's start-line production. `Ok(None)`
//!   means more bytes are needed and the caller rewinds to its mark.

use crate::buffer::ByteBuffer;
use crate::error::{HttpError, Result, UriPart};
use crate::http::chars;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UriKind {
    Asterisk,
    #[default]
    Http,
    Https,
    Other,
}

/// A parsed request-URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestUri {
    kind: UriKind,
    host: Option<String>,
    port: Option<u16>,
    abs_path: Option<String>,
    query: Option<String>,
    fragment: Option<String>,
    other: Option<String>,
}

impl RequestUri {
    pub fn asterisk() -> Self {
        Self {
            kind: UriKind::Asterisk,
            ..Self::default()
        }
    }

    /// Origin-form URI such as `/index.html`.
    pub fn abs_path(path: impl Into<String>) -> Self {
        Self {
            abs_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn http(host: impl Into<String>, port: Option<u16>, path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port,
            abs_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn https(host: impl Into<String>, port: Option<u16>, path: impl Into<String>) -> Self {
        Self {
            kind: UriKind::Https,
            ..Self::http(host, port, path)
        }
    }

    /// Opaque URI of another scheme, kept verbatim.
    pub fn other(text: impl Into<String>) -> Self {
        Self {
            kind: UriKind::Other,
            other: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> UriKind {
        self.kind
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> Option<&str> {
        self.abs_path.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn other_text(&self) -> Option<&str> {
        self.other.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query;
    }

    pub fn set_fragment(&mut self, fragment: Option<String>) {
        self.fragment = fragment;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn bad(part: UriPart) -> crate::error::Error {
    HttpError::BadUri(part).into()
}

fn take_string(scratch: &mut Vec<u8>) -> String {
    let text = String::from_utf8_lossy(scratch).into_owned();
    scratch.clear();
    text
}

/// Parse a request-URI, stopping before the SP that precedes the version.
pub(crate) fn parse_request_uri(buffer: &mut ByteBuffer, uri: &mut RequestUri) -> Result<Option<()>> {
    uri.reset();

    loop {
        match buffer.peek() {
            None => return Ok(None),
            Some(c) if chars::is_space(c) => {
                buffer.skip(1);
            }
            Some(_) => break,
        }
    }

    let mut scratch = Vec::new();

    match buffer.peek() {
        Some(b'*') => {
            buffer.skip(1);
            match buffer.peek() {
                None => Ok(None),
                Some(b' ') => {
                    uri.kind = UriKind::Asterisk;
                    Ok(Some(()))
                }
                Some(_) => Err(bad(UriPart::Asterisk)),
            }
        }
        Some(b'/') => parse_path(buffer, uri, &mut scratch),
        Some(_) => parse_absolute_uri(buffer, uri, &mut scratch),
        None => Ok(None),
    }
}

fn parse_absolute_uri(buffer: &mut ByteBuffer, uri: &mut RequestUri, scratch: &mut Vec<u8>) -> Result<Option<()>> {
    // scheme = alpha *( alpha | digit | "+" | "-" | "." )
    loop {
        let Some(c) = buffer.next_byte() else { return Ok(None) };
        if scratch.is_empty() {
            if !c.is_ascii_alphabetic() {
                return Err(bad(UriPart::Scheme));
            }
            scratch.push(c);
            continue;
        }
        if c == b':' {
            break;
        }
        if c.is_ascii_alphanumeric() || matches!(c, b'+' | b'-' | b'.') {
            scratch.push(c);
            continue;
        }
        return Err(bad(UriPart::Scheme));
    }

    if scratch.eq_ignore_ascii_case(b"http") {
        uri.kind = UriKind::Http;
    } else if scratch.eq_ignore_ascii_case(b"https") {
        uri.kind = UriKind::Https;
    } else {
        scratch.push(b':');
        return parse_other(buffer, uri, scratch);
    }
    scratch.clear();

    loop {
        match buffer.peek() {
            None => return Ok(None),
            Some(b'/') => {
                buffer.skip(1);
            }
            Some(_) => break,
        }
    }

    // host = alnum *( alnum | "-" | "." )
    let terminator = loop {
        let Some(c) = buffer.peek() else { return Ok(None) };
        if scratch.is_empty() {
            if !c.is_ascii_alphanumeric() {
                return Err(bad(UriPart::Host));
            }
        } else if matches!(c, b':' | b'/' | b' ') {
            break c;
        } else if !(c.is_ascii_alphanumeric() || c == b'-' || c == b'.') {
            return Err(bad(UriPart::Host));
        }
        buffer.skip(1);
        scratch.push(c);
    };
    uri.host = Some(take_string(scratch));

    let terminator = if terminator == b':' {
        buffer.skip(1);
        let Some((port, next)) = parse_port(buffer)? else { return Ok(None) };
        uri.port = Some(port);
        next
    } else {
        terminator
    };

    if terminator == b' ' {
        return Ok(Some(()));
    }

    parse_path(buffer, uri, scratch)
}

/// `port = 1*digit`, returning the port and the byte that ended it.
fn parse_port(buffer: &mut ByteBuffer) -> Result<Option<(u16, u8)>> {
    let mut port: u32 = 0;
    let mut digits = 0;
    loop {
        let Some(c) = buffer.peek() else { return Ok(None) };
        if c.is_ascii_digit() {
            port = port * 10 + u32::from(c - b'0');
            digits += 1;
            if port > u32::from(u16::MAX) {
                return Err(bad(UriPart::Port));
            }
            buffer.skip(1);
            continue;
        }
        if matches!(c, b'/' | b' ') && digits > 0 {
            let port = u16::try_from(port).map_err(|_| bad(UriPart::Port))?;
            return Ok(Some((port, c)));
        }
        return Err(bad(UriPart::Port));
    }
}

fn is_path_char(c: u8) -> bool {
    chars::is_pchar(c) || matches!(c, b'/' | b';' | b'%')
}

fn is_uric_char(c: u8) -> bool {
    chars::is_uric(c) || c == b'%'
}

fn parse_path(buffer: &mut ByteBuffer, uri: &mut RequestUri, scratch: &mut Vec<u8>) -> Result<Option<()>> {
    scratch.clear();

    // abs_path = "/" path_segments
    let mut terminator = loop {
        let Some(c) = buffer.next_byte() else { return Ok(None) };
        if scratch.is_empty() && c != b'/' {
            return Err(bad(UriPart::AbsPath));
        }
        match c {
            b'?' | b'#' => break c,
            b' ' => {
                buffer.set_read_position(buffer.read_position() - 1);
                break c;
            }
            c if is_path_char(c) => scratch.push(c),
            _ => return Err(bad(UriPart::AbsPath)),
        }
    };
    uri.abs_path = Some(take_string(scratch));

    if terminator == b'?' {
        terminator = loop {
            let Some(c) = buffer.next_byte() else { return Ok(None) };
            match c {
                b'#' => break c,
                b' ' => {
                    buffer.set_read_position(buffer.read_position() - 1);
                    break c;
                }
                c if is_uric_char(c) => scratch.push(c),
                _ => return Err(bad(UriPart::Query)),
            }
        };
        uri.query = Some(take_string(scratch));
    }

    if terminator == b'#' {
        loop {
            let Some(c) = buffer.peek() else { return Ok(None) };
            match c {
                b' ' => break,
                c if is_uric_char(c) => {
                    buffer.skip(1);
                    scratch.push(c);
                }
                _ => return Err(bad(UriPart::Fragment)),
            }
        }
        uri.fragment = Some(take_string(scratch));
    }

    Ok(Some(()))
}

fn parse_other(buffer: &mut ByteBuffer, uri: &mut RequestUri, scratch: &mut Vec<u8>) -> Result<Option<()>> {
    loop {
        let Some(c) = buffer.peek() else { return Ok(None) };
        if c == b' ' {
            break;
        }
        if chars::is_ctl(c) {
            return Err(bad(UriPart::Scheme));
        }
        buffer.skip(1);
        scratch.push(c);
    }
    uri.kind = UriKind::Other;
    uri.other = Some(take_string(scratch));
    Ok(Some(()))
}

fn put_escaped(buffer: &mut ByteBuffer, text: &str, keep: fn(u8) -> bool) -> bool {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &c in text.as_bytes() {
        let ok = if keep(c) {
            buffer.put(c)
        } else {
            buffer.put_all(&[b'%', HEX[usize::from(c >> 4)], HEX[usize::from(c & 0x0f)]])
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Write `uri`. Returns false when the buffer ran out of space.
pub(crate) fn format_request_uri(buffer: &mut ByteBuffer, uri: &RequestUri) -> bool {
    match uri.kind {
        UriKind::Asterisk => return buffer.put(b'*'),
        UriKind::Other => return buffer.put_all(uri.other.as_deref().unwrap_or_default().as_bytes()),
        UriKind::Http | UriKind::Https => {}
    }

    if let Some(host) = uri.host.as_deref() {
        let (scheme, default_port) = match uri.kind {
            UriKind::Https => ("https://", 443),
            _ => ("http://", 80),
        };
        if !buffer.put_all(scheme.as_bytes()) || !buffer.put_all(host.as_bytes()) {
            return false;
        }
        if let Some(port) = uri.port.filter(|p| *p != default_port && *p != 0) {
            if !buffer.put_all(format!(":{port}").as_bytes()) {
                return false;
            }
        }
    }

    let path = uri.abs_path.as_deref().unwrap_or("/");
    if !path.starts_with('/') && !buffer.put(b'/') {
        return false;
    }
    if !put_escaped(buffer, path, is_path_char) {
        return false;
    }

    if let Some(query) = uri.query.as_deref() {
        if !buffer.put(b'?') || !put_escaped(buffer, query, is_uric_char) {
            return false;
        }
    }

    if let Some(fragment) = uri.fragment.as_deref() {
        if !buffer.put(b'#') || !put_escaped(buffer, fragment, is_uric_char) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Option<RequestUri>> {
        let mut buffer = ByteBuffer::from_slice(text.as_bytes());
        let mut uri = RequestUri::default();
        Ok(parse_request_uri(&mut buffer, &mut uri)?.map(|_| uri))
    }

    fn format(uri: &RequestUri) -> String {
        let mut buffer = ByteBuffer::new(256);
        assert!(format_request_uri(&mut buffer, uri));
        String::from_utf8(buffer.readable_slice().to_vec()).unwrap()
    }

    #[test]
    fn parses_origin_form_with_query_and_fragment() {
        let uri = parse("/a/b;p?x=1&y=%20#top HTTP/1.1").unwrap().unwrap();
        assert_eq!(uri.kind(), UriKind::Http);
        assert_eq!(uri.path(), Some("/a/b;p"));
        assert_eq!(uri.query(), Some("x=1&y=%20"));
        assert_eq!(uri.fragment(), Some("top"));
        assert_eq!(format(&uri), "/a/b;p?x=1&y=%20#top");
    }

    #[test]
    fn parses_absolute_uri_and_drops_default_port() {
        let uri = parse("HTTPS://Example.com:443/x HTTP/1.1").unwrap().unwrap();
        assert_eq!(uri.kind(), UriKind::Https);
        assert_eq!(uri.host(), Some("Example.com"));
        assert_eq!(uri.port(), Some(443));
        assert_eq!(format(&uri), "https://Example.com/x");

        let uri = parse("http://h:8080 HTTP/1.1").unwrap().unwrap();
        assert_eq!(uri.path(), None);
        assert_eq!(format(&uri), "http://h:8080/");
    }

    #[test]
    fn asterisk_and_other_schemes() {
        assert_eq!(parse("* HTTP/1.1").unwrap().unwrap().kind(), UriKind::Asterisk);
        assert!(matches!(parse("*x HTTP/1.1"), Err(crate::error::Error::Http(HttpError::BadUri(UriPart::Asterisk)))));

        let uri = parse("sip:alice@atlanta.com SIP/2.0").unwrap().unwrap();
        assert_eq!(uri.kind(), UriKind::Other);
        assert_eq!(format(&uri), "sip:alice@atlanta.com");
    }

    #[test]
    fn incomplete_input_asks_for_more() {
        assert!(parse("/partial").unwrap().is_none());
        assert!(parse("http://host:80").unwrap().is_none());
    }

    #[test]
    fn rejects_bad_ports_and_hosts() {
        assert!(matches!(parse("http://h:70000/ x"), Err(crate::error::Error::Http(HttpError::BadUri(UriPart::Port)))));
        assert!(matches!(parse("http://-h/ x"), Err(crate::error::Error::Http(HttpError::BadUri(UriPart::Host)))));
        assert!(matches!(parse("/a\"b x"), Err(crate::error::Error::Http(HttpError::BadUri(UriPart::AbsPath)))));
    }

    #[test]
    fn formatter_escapes_unsafe_path_bytes() {
        let uri = RequestUri::abs_path("/a b");
        assert_eq!(format(&uri), "/a%20b");
    }
}
