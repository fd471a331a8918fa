//! Messages fed to the parser in random pieces must parse exactly like the
//! same bytes delivered at once, and formatting a parsed message must give
//! bytes that parse back to it.

use evented_http::buffer::ByteBuffer;
use evented_http::error::Flow;
use evented_http::http::{
    BodyChunk, BodyFraming, FormatTarget, HttpRequest, HttpResponse, MessageFormatter, MessageParser, ParseTarget,
};

/// Small enough that most messages need the buffer compacted on the way.
const BUFFER_SIZE: usize = 64;

struct Parsed<M> {
    message: M,
    body: Vec<u8>,
    framing: BodyFraming,
}

/// Feed `wire` in pieces of 1..=`max_piece` bytes, consuming body bytes in
/// random amounts. The end of `wire` acts as the peer closing.
fn parse_in_pieces<M: ParseTarget + Default>(wire: &[u8], max_piece: usize, rng: &mut fastrand::Rng) -> Parsed<M> {
    let mut buffer = ByteBuffer::new(BUFFER_SIZE);
    let mut parser = MessageParser::default();
    let mut message = M::default();
    let mut body = Vec::new();
    let mut rest = wire;
    let mut headers_done = false;
    let mut eof = false;

    loop {
        if !headers_done {
            if parser.parse_headers(&mut buffer, &mut message).unwrap() == Flow::Success {
                headers_done = true;
                continue;
            }
        } else {
            match parser.parse_body(&mut buffer).unwrap() {
                BodyChunk::Data { offset, len } => {
                    let take = rng.usize(1..=len);
                    body.extend_from_slice(buffer.slice(offset, take));
                    parser.consume_body(&mut buffer, take).unwrap();
                    continue;
                }
                BodyChunk::End if parser.framing() != BodyFraming::Chunked => break,
                BodyChunk::End => {
                    if parser.skip_trailer(&mut buffer).unwrap() == Flow::Success {
                        break;
                    }
                }
                BodyChunk::Again => {}
            }
        }

        if rest.is_empty() {
            assert!(!eof, "parser stalled at end of input");
            assert!(parser.end_of_stream(), "input ended before the message did");
            eof = true;
            continue;
        }
        if !buffer.is_writable() {
            assert!(buffer.compact(), "parser jammed");
        }
        let n = rng.usize(1..=max_piece).min(rest.len()).min(buffer.writable());
        assert_eq!(buffer.put_slice(&rest[..n]), n);
        rest = &rest[n..];
    }

    Parsed {
        message,
        body,
        framing: parser.framing(),
    }
}

fn check<M>(wire: &[u8], expected_body: &[u8])
where
    M: ParseTarget + Default + PartialEq + std::fmt::Debug,
{
    let mut rng = fastrand::Rng::with_seed(7);
    let whole = parse_in_pieces::<M>(wire, BUFFER_SIZE, &mut rng);
    assert_eq!(whole.body, expected_body);

    for max_piece in [1, 3, 7, 19] {
        for seed in 0..25 {
            let mut rng = fastrand::Rng::with_seed(seed);
            let split = parse_in_pieces::<M>(wire, max_piece, &mut rng);
            assert_eq!(split.message, whole.message, "seed {seed}, pieces of at most {max_piece}");
            assert_eq!(split.body, whole.body, "seed {seed}, pieces of at most {max_piece}");
            assert_eq!(split.framing, whole.framing);
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

#[test]
fn request_without_body() {
    check::<HttpRequest>(
        b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\nX-Folded: one\r\n two\r\nAccept: */*\r\n\r\n",
        b"",
    );
}

#[test]
fn request_with_content_length_body() {
    let body = pattern(300);
    let mut wire = b"POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Length: 300\r\n\r\n".to_vec();
    wire.extend_from_slice(&body);
    check::<HttpRequest>(&wire, &body);
}

#[test]
fn chunked_response_with_extensions_and_trailer() {
    let body = pattern(26 + 64 + 3);
    let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    wire.extend_from_slice(b"1a;name=value\r\n");
    wire.extend_from_slice(&body[..26]);
    wire.extend_from_slice(b"\r\n40\r\n");
    wire.extend_from_slice(&body[26..90]);
    wire.extend_from_slice(b"\r\n3\r\n");
    wire.extend_from_slice(&body[90..]);
    wire.extend_from_slice(b"\r\n0\r\nX-Checksum: abc\r\n\r\n");
    check::<HttpResponse>(&wire, &body);
}

#[test]
fn close_delimited_response() {
    let body = pattern(200);
    let mut wire = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n".to_vec();
    wire.extend_from_slice(&body);
    check::<HttpResponse>(&wire, &body);
}

#[test]
fn bodyless_statuses() {
    check::<HttpResponse>(b"HTTP/1.1 204 No Content\r\nServer: test\r\n\r\n", b"");
    check::<HttpResponse>(b"HTTP/1.1 304 Not Modified\r\n\r\n", b"");
}

#[test]
fn get_with_content_length_keeps_its_body() {
    check::<HttpRequest>(b"GET /a HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world", b"hello world");
}

#[test]
fn split_parse_reports_the_same_headers() {
    let wire = b"HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\nConnection: close\r\n\r\nnop";
    let mut rng = fastrand::Rng::with_seed(1);
    let parsed = parse_in_pieces::<HttpResponse>(wire, 2, &mut rng);
    assert_eq!(parsed.message.status(), 404);
    assert_eq!(parsed.message.reason(), "Not Found");
    assert_eq!(parsed.message.find_header("connection").unwrap().value, "close");
    assert!(!parsed.message.reuse_connection());
    assert_eq!(parsed.framing, BodyFraming::ContentLength);
    assert_eq!(parsed.body, b"nop");
}

/// Format `message` with `body`, letting the message's own headers pick the
/// framing.
fn format<M: FormatTarget>(message: &M, body: &[u8]) -> Vec<u8> {
    let mut buffer = ByteBuffer::new(16 * 1024);
    let mut formatter = MessageFormatter::default();
    assert_eq!(formatter.format_headers(&mut buffer, message).unwrap(), Flow::Success);

    let mut rest = body;
    while !rest.is_empty() {
        // small blocks so chunked bodies span several chunks
        let requested = rest.len().min(40) as u64;
        let size = formatter.begin_block(&mut buffer, requested).unwrap().unwrap();
        buffer.writable_slice()[..size].copy_from_slice(&rest[..size]);
        buffer.advance_write(size);
        assert_eq!(formatter.end_block(&mut buffer).unwrap(), Flow::Success);
        rest = &rest[size..];
    }
    assert_eq!(formatter.end_body(&mut buffer).unwrap(), Flow::Success);
    buffer.readable_slice().to_vec()
}

fn round_trip<M>(wire: &[u8])
where
    M: ParseTarget + FormatTarget + Default + PartialEq + std::fmt::Debug,
{
    let mut rng = fastrand::Rng::with_seed(11);
    let first = parse_in_pieces::<M>(wire, BUFFER_SIZE, &mut rng);
    let formatted = format(&first.message, &first.body);
    let second = parse_in_pieces::<M>(&formatted, 5, &mut rng);

    assert_eq!(second.message, first.message, "{}", String::from_utf8_lossy(&formatted));
    assert_eq!(second.body, first.body);
    assert_eq!(second.framing, first.framing);
}

#[test]
fn requests_survive_format_and_reparse() {
    let mut post = b"POST http://example.com:8080/api/v1?debug=true HTTP/1.1\r\n".to_vec();
    post.extend_from_slice(b"Host: example.com\r\nTransfer-Encoding: chunked\r\n\r\n");
    post.extend_from_slice(b"2d\r\n");
    post.extend_from_slice(&pattern(45));
    post.extend_from_slice(b"\r\n0\r\n\r\n");

    let mut put = b"PURGE /cache/item HTTP/1.0\r\nContent-Length: 100\r\n\r\n".to_vec();
    put.extend_from_slice(&pattern(100));

    for wire in [
        &b"OPTIONS * HTTP/1.1\r\nHost: example.com\r\n\r\n"[..],
        &b"GET http://example.com/index.html HTTP/1.0\r\nUser-Agent: test\r\n\r\n"[..],
        post.as_slice(),
        put.as_slice(),
    ] {
        round_trip::<HttpRequest>(wire);
    }
}

#[test]
fn responses_survive_format_and_reparse() {
    let mut chunked = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n64\r\n".to_vec();
    chunked.extend_from_slice(&pattern(100));
    chunked.extend_from_slice(b"\r\n0\r\n\r\n");

    let mut sized = b"HTTP/1.1 201 Created\r\nLocation: /items/7\r\nContent-Length: 70\r\n\r\n".to_vec();
    sized.extend_from_slice(&pattern(70));

    let mut until_close = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n".to_vec();
    until_close.extend_from_slice(&pattern(90));

    for wire in [&chunked, &sized, &until_close] {
        round_trip::<HttpResponse>(wire);
    }
    round_trip::<HttpResponse>(b"HTTP/1.1 304 Not Modified\r\nETag: \"x\"\r\n\r\n");
}
