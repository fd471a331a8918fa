//! Server socket state machine driven over an in-memory pipe.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use evented_http::error::Flow;
use evented_http::http::ServerTransaction;
use evented_http::server::{ServerCounters, ServerEndState, ServerPhase, ServerSocket, ServerSocketConfig};

mod common;

use common::{pipe, MockMultiplexer, Pipe, RecordingServer};

fn accept(config: ServerSocketConfig) -> (Rc<RefCell<ServerSocket>>, Pipe, Arc<ServerCounters>) {
    let (socket, pipe) = pipe();
    let counters = Arc::new(ServerCounters::new());
    let server = ServerSocket::create(socket, ServerTransaction::default(), config, Arc::clone(&counters));
    (server, pipe, counters)
}

#[test]
fn keep_alive_serves_consecutive_requests() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"hi");
    let (server, pipe, counters) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.push(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    let response = pipe.output_text();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("Content-Length: 2\r\n\r\nhi"));
    assert_eq!(server.phase(), ServerPhase::ParsingHeaders);

    pipe.push(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert!(pipe.output_text().ends_with("\r\n\r\nhi"));
    assert_eq!(handler.paths, vec!["/a", "/b"]);
    assert_eq!(handler.ends, vec![ServerEndState::End, ServerEndState::End]);

    pipe.close_peer();
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Closed);
    server.handle_remove(&mut mux, &mut handler);

    assert_eq!(server.phase(), ServerPhase::Inactive);
    assert!(pipe.is_closed());
    assert_eq!(counters.successes(), 2);
    assert_eq!(counters.failures(), 0);
    assert_eq!(counters.average_transactions_per_connection(), 2.0);
    assert_eq!(mux.buffers_outstanding(), 0);
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"x");
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n");
    server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap();
    assert_eq!(handler.paths, vec!["/one", "/two"]);
    assert_eq!(pipe.output_text().matches("HTTP/1.1 200 OK\r\n").count(), 2);
}

#[test]
fn get_body_is_not_read_as_the_next_request() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"ok");
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"GET /a HTTP/1.1\r\nContent-Length: 26\r\n\r\nGET /hidden HTTP/1.1\r\n\r\n\r\n");
    assert_eq!(server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert_eq!(handler.paths, vec!["/a"]);
    assert_eq!(handler.request_bodies, vec![b"GET /hidden HTTP/1.1\r\n\r\n\r\n".to_vec()]);
    assert_eq!(pipe.output_text().matches("HTTP/1.1 200 OK\r\n").count(), 1);
}

#[test]
fn malformed_request_gets_400_and_close() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"unused");
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"BO\x01GUS / HTTP/1.1\r\n\r\n");
    assert_eq!(server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap(), Flow::Cleanup);
    let response = pipe.output_text();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("Content-Length: 0\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(handler.paths.is_empty());
}

#[test]
fn content_length_body_reaches_the_handler() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"");
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"POST /up HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
    server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap();
    assert_eq!(handler.request_bodies, vec![b"hello".to_vec()]);
    assert!(pipe.output_text().ends_with("Content-Length: 0\r\n\r\n"));
}

#[test]
fn chunked_body_split_across_reads() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"done");
    let (server, pipe, _) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.push(b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert_eq!(server.phase(), ServerPhase::ParsingBody);
    assert!(pipe.take_output().is_empty());

    pipe.push(b"lo\r\n0\r\nX-Trailer: t\r\n\r\n");
    server.handle_readable(&mut mux, &mut handler).unwrap();
    assert_eq!(handler.request_bodies, vec![b"hello".to_vec()]);
    assert!(pipe.output_text().ends_with("\r\n\r\ndone"));
}

#[test]
fn chunked_response_framing() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"hello");
    handler.chunked = true;
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"GET / HTTP/1.1\r\n\r\n");
    server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap();
    let response = pipe.output_text();
    assert!(response.contains("Transfer-Encoding: chunked\r\n"));
    assert!(response.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"), "{response:?}");
}

#[test]
fn connection_close_and_http_1_0_end_the_connection() {
    for request in [
        &b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n"[..],
        &b"GET / HTTP/1.0\r\n\r\n"[..],
    ] {
        let mut mux = MockMultiplexer::new();
        let mut handler = RecordingServer::new(200, b"ok");
        let (server, pipe, _) = accept(ServerSocketConfig::default());
        pipe.push(request);
        assert_eq!(server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap(), Flow::Cleanup);
        assert!(pipe.output_text().ends_with("\r\n\r\nok"));
        assert_eq!(handler.ends, vec![ServerEndState::End]);
    }
}

#[test]
fn early_response_skips_the_request() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"");
    handler.reject_with = Some(503);
    let (server, pipe, _) = accept(ServerSocketConfig::default());

    pipe.push(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap(), Flow::Cleanup);
    assert!(pipe.output_text().starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(handler.paths.is_empty());
}

#[test]
fn error_status_keeps_the_connection_when_configured() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(404, b"");
    let config = ServerSocketConfig {
        close_after_error_response: false,
    };
    let (server, pipe, _) = accept(config);

    pipe.push(b"GET /missing HTTP/1.1\r\n\r\n");
    assert_eq!(server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert!(pipe.output_text().starts_with("HTTP/1.1 404 OK\r\n"));
}

#[test]
fn slow_writer_resumes_on_writable() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"0123456789");
    let (server, pipe, _) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.set_send_limit(Some(10));
    pipe.push(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert_eq!(server.phase(), ServerPhase::FlushingBody);
    assert!(server.want_write());
    let mut response = pipe.take_output();
    assert_eq!(response.len(), 10);

    pipe.set_send_limit(None);
    assert_eq!(server.handle_writable(&mut mux, &mut handler).unwrap(), Flow::Again);
    response.extend(pipe.take_output());
    assert!(String::from_utf8(response).unwrap().ends_with("\r\n\r\n0123456789"));
    assert_eq!(handler.ends, vec![ServerEndState::End]);
}

#[test]
fn blocked_body_producer_sends_nothing_for_that_block() {
    let cases = [
        (false, "Content-Length: 5\r\n\r\nhello"),
        (true, "chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"),
    ];
    for (chunked, expected) in cases {
        let mut mux = MockMultiplexer::new();
        let mut handler = RecordingServer::new(200, b"hello");
        handler.chunked = chunked;
        handler.block_produce_once = true;
        let (server, pipe, _) = accept(ServerSocketConfig::default());
        let mut server = server.borrow_mut();

        pipe.push(b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Pause);
        assert!(!server.want_write());
        let mut response = pipe.take_output();
        assert!(response.ends_with(b"\r\n\r\n"));

        server.resume_send(&mut mux, true).unwrap();
        server.handle_writable(&mut mux, &mut handler).unwrap();
        response.extend(pipe.take_output());
        let response = String::from_utf8(response).unwrap();
        assert!(response.ends_with(expected), "{response:?}");
        assert_eq!(handler.ends, vec![ServerEndState::End]);
    }
}

#[test]
fn blocked_body_offer_drops_write_interest() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"later");
    handler.block_offer_once = true;
    let (server, pipe, _) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.push(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Pause);
    assert_eq!(server.phase(), ServerPhase::FormattingBody);
    assert!(!server.interest().write);
    // the headers are already on the wire while the body waits
    assert!(pipe.output_text().ends_with("Content-Length: 5\r\n\r\n"));

    server.resume_send(&mut mux, true).unwrap();
    assert_eq!(mux.last_interest(server.id()).map(|interest| interest.write), Some(true));
    server.handle_writable(&mut mux, &mut handler).unwrap();
    assert_eq!(pipe.output_text(), "later");
    assert_eq!(handler.offers, 3);
}

#[test]
fn bodyless_responses_skip_the_body_callbacks() {
    let requests: [(&[u8], Option<u16>); 3] = [
        (b"BAD\x01 / HTTP/1.1\r\n\r\n", None),
        (b"GET / HTTP/1.1\r\n\r\n", Some(503)),
        (b"GET / HTTP/1.1\r\n\r\n", None),
    ];
    for (request, reject_with) in requests {
        let mut mux = MockMultiplexer::new();
        let mut handler = RecordingServer::new(200, b"");
        handler.reject_with = reject_with;
        let (server, pipe, _) = accept(ServerSocketConfig::default());

        pipe.push(request);
        server.borrow_mut().handle_readable(&mut mux, &mut handler).unwrap();
        assert!(pipe.output_text().contains("Content-Length: 0\r\n"));
        assert_eq!(handler.offers, 0);
    }
}

#[test]
fn closing_mid_body_reports_recv_body() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"");
    let (server, pipe, counters) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.push(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
    pipe.close_peer();
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Closed);
    server.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ServerEndState::RecvRequestBody]);
    assert_eq!(counters.failures(), 1);
    assert_eq!(mux.destroyed_server, 1);
}

#[test]
fn synchronous_request_body_reads() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingServer::new(200, b"");
    handler.pause_at_headers = true;
    let (server, pipe, _) = accept(ServerSocketConfig::default());
    let mut server = server.borrow_mut();

    pipe.push(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody");
    assert_eq!(server.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Pause);
    assert_eq!(server.phase(), ServerPhase::ParsingBody);

    let (_, available) = server.request_body_available(&mut mux, &mut handler).unwrap();
    assert_eq!(available, Some(4));

    let mut out = [0u8; 16];
    let (_, read) = server.read_request_body(&mut mux, &mut handler, &mut out).unwrap();
    assert_eq!(&out[..read], b"body");
    assert_eq!(server.phase(), ServerPhase::FormattingHeaders);
    assert!(server.want_write());
    assert!(handler.request_bodies.is_empty());

    server.handle_writable(&mut mux, &mut handler).unwrap();
    assert!(pipe.output_text().starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(handler.ends, vec![ServerEndState::End]);
}
