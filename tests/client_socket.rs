//! Client socket state machine driven over an in-memory pipe.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use evented_http::client::{ClientCounters, ClientEndState, ClientPhase, ClientSocket, ClientSocketConfig};
use evented_http::error::{Error, Flow};
use evented_http::http::{ClientTransaction, HttpRequest, RequestUri};
use evented_http::stream::Interest;

mod common;

use common::{pipe, MockMultiplexer, Pipe, RecordingClient};

fn transaction(method: &str, path: &str) -> ClientTransaction {
    let mut transaction = ClientTransaction::default();
    let mut request = HttpRequest::new(method, RequestUri::abs_path(path));
    request.add_header("Host", "example.com");
    *transaction.request_mut() = request;
    transaction.set_peer_address(common::peer());
    transaction
}

fn connect(
    transaction: ClientTransaction,
    config: ClientSocketConfig,
) -> (Rc<RefCell<ClientSocket>>, Pipe, Arc<ClientCounters>) {
    let (socket, pipe) = pipe();
    let counters = Arc::new(ClientCounters::new());
    let client = ClientSocket::create(socket, transaction, config, Arc::clone(&counters));
    (client, pipe, counters)
}

#[test]
fn get_round_trip_then_reuse() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = connect(transaction("GET", "/first"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();

    assert!(client.want_connect());
    assert_eq!(client.handle_connect(&mut mux, &mut handler).unwrap(), Flow::Again);
    let sent = pipe.output_text();
    assert!(sent.starts_with("GET /first HTTP/1.1\r\n"), "{sent}");
    assert!(sent.contains("Host: example.com\r\n"));
    assert!(sent.ends_with("\r\n\r\n"));
    assert_eq!(client.phase(), ClientPhase::ParsingHeaders);
    assert_eq!(client.interest(), Interest { read: true, write: false });

    pipe.push(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Success);
    assert!(client.is_finished());
    assert_eq!(handler.statuses, vec![200]);
    assert_eq!(handler.response_body, b"hello");
    assert!(handler.response_ended);

    client.handle_remove(&mut mux, &mut handler);
    assert_eq!(handler.ends, vec![ClientEndState::End]);
    assert!(client.reusable());
    assert_eq!(mux.buffers_outstanding(), 0);

    client.reset(transaction("GET", "/second")).unwrap();
    assert_eq!(client.handle_writable(&mut mux, &mut handler).unwrap(), Flow::Again);
    assert!(pipe.output_text().starts_with("GET /second HTTP/1.1\r\n"));
    pipe.push(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Success);
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End, ClientEndState::End]);
    assert_eq!(client.requests_per_connection(), 2);
    assert_eq!(counters.successes(), 2);
    assert_eq!(mux.destroyed_client, 2);
    assert!(!pipe.is_closed());
}

#[test]
fn response_arriving_a_byte_at_a_time() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.set_recv_chunk(1);
    pipe.push(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n");
    let mut rounds = 0;
    while !client.is_finished() {
        let flow = client.handle_readable(&mut mux, &mut handler).unwrap();
        assert!(matches!(flow, Flow::Again | Flow::Success), "{flow}");
        rounds += 1;
        assert!(rounds < 1000);
    }
    assert_eq!(handler.response_body, b"abcde");
}

#[test]
fn request_body_follows_the_headers() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    handler.request_body = b"hello world".to_vec();
    let mut request = transaction("POST", "/upload");
    request.request_mut().add_header("Content-Length", "11");
    let (client, pipe, _) = connect(request, ClientSocketConfig::default());

    client.borrow_mut().handle_connect(&mut mux, &mut handler).unwrap();
    let sent = pipe.output_text();
    assert!(sent.starts_with("POST /upload HTTP/1.1\r\n"));
    assert!(sent.ends_with("Content-Length: 11\r\n\r\nhello world"), "{sent}");
}

#[test]
fn connection_close_response_is_not_reused() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.push(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok");
    client.handle_readable(&mut mux, &mut handler).unwrap();
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End]);
    assert!(!client.reusable());
    assert!(pipe.is_closed());
    assert_eq!(counters.closed_connections(), 1);
}

#[test]
fn disabled_reuse_asks_the_server_to_close() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let config = ClientSocketConfig {
        reuse_connections: false,
    };
    let (client, pipe, _) = connect(transaction("GET", "/"), config);
    client.borrow_mut().handle_connect(&mut mux, &mut handler).unwrap();
    assert!(pipe.output_text().contains("Connection: close\r\n"));
}

#[test]
fn close_delimited_body_ends_at_end_of_stream() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.push(b"HTTP/1.0 200 OK\r\n\r\npartial");
    pipe.close_peer();
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Success);
    assert_eq!(handler.response_body, b"partial");

    client.handle_remove(&mut mux, &mut handler);
    assert_eq!(handler.ends, vec![ClientEndState::End]);
    assert!(!client.reusable());
}

#[test]
fn peer_closing_mid_headers_ends_in_recv_headers() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.push(b"HTTP/1.1 200 O");
    pipe.close_peer();
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Closed);
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::RecvResponseHeaders]);
    assert_eq!(counters.failures(), 1);
    assert!(mux.executed.is_empty());
}

/// A connection that answered one transaction and now sits in the pool.
fn pooled(
    mux: &mut MockMultiplexer,
    handler: &mut RecordingClient,
) -> (Rc<RefCell<ClientSocket>>, Pipe, Arc<ClientCounters>) {
    let (client, pipe, counters) = connect(transaction("GET", "/first"), ClientSocketConfig::default());
    {
        let mut client = client.borrow_mut();
        client.handle_connect(mux, handler).unwrap();
        pipe.push(b"HTTP/1.1 204 No Content\r\n\r\n");
        client.handle_readable(mux, handler).unwrap();
        client.handle_remove(mux, handler);
    }
    pipe.take_output();
    (client, pipe, counters)
}

#[test]
fn stale_pooled_connection_retries_the_transaction() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, _) = pooled(&mut mux, &mut handler);
    let mut client = client.borrow_mut();

    client.reset(transaction("GET", "/retry")).unwrap();
    pipe.reset_peer();
    assert!(matches!(client.handle_writable(&mut mux, &mut handler), Err(Error::Io(_))));
    client.handle_remove(&mut mux, &mut handler);

    // the handler only hears about the first transaction
    assert_eq!(handler.ends, vec![ClientEndState::End]);
    assert_eq!(mux.executed.len(), 1);
    assert_eq!(mux.executed[0].request().uri().path(), Some("/retry"));
    assert!(!client.reusable());
    assert!(pipe.is_closed());
}

#[test]
fn refused_retry_ends_in_begin() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = pooled(&mut mux, &mut handler);
    let mut client = client.borrow_mut();

    client.reset(transaction("GET", "/retry")).unwrap();
    pipe.reset_peer();
    assert!(client.handle_writable(&mut mux, &mut handler).is_err());
    mux.refuse_execute = true;
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End, ClientEndState::Begin]);
    assert_eq!(counters.failures(), 1);
}

#[test]
fn close_after_the_request_went_out_is_not_retried() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = pooled(&mut mux, &mut handler);
    let mut client = client.borrow_mut();

    client.reset(transaction("GET", "/sent")).unwrap();
    client.handle_writable(&mut mux, &mut handler).unwrap();
    assert!(pipe.output_text().starts_with("GET /sent HTTP/1.1\r\n"));
    pipe.close_peer();
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Closed);
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End, ClientEndState::RecvResponseHeaders]);
    assert!(mux.executed.is_empty());
    assert_eq!(counters.failures(), 1);
}

#[test]
fn handler_failure_on_a_reused_connection_is_not_retried() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, counters) = pooled(&mut mux, &mut handler);
    let mut client = client.borrow_mut();

    client.reset(transaction("GET", "/refused")).unwrap();
    handler.fail_begin = true;
    assert!(matches!(client.handle_writable(&mut mux, &mut handler), Err(Error::InvalidState)));
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End, ClientEndState::Begin]);
    assert!(mux.executed.is_empty());
    assert_eq!(counters.failures(), 1);
    assert!(pipe.output_text().is_empty());
    assert!(pipe.is_closed());
}

#[test]
fn capitalised_connection_close_still_allows_reuse() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.push(b"HTTP/1.1 200 OK\r\nConnection: Close\r\nContent-Length: 2\r\n\r\nok");
    client.handle_readable(&mut mux, &mut handler).unwrap();
    client.handle_remove(&mut mux, &mut handler);

    assert_eq!(handler.ends, vec![ClientEndState::End]);
    assert!(client.reusable());
    assert!(!pipe.is_closed());
}

#[test]
fn blocked_request_body_source_leaves_no_partial_chunk() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    handler.request_body = b"hello".to_vec();
    handler.block_produce_once = true;
    let mut request = transaction("POST", "/upload");
    request.request_mut().add_header("Transfer-Encoding", "chunked");
    let (client, pipe, _) = connect(request, ClientSocketConfig::default());
    let mut client = client.borrow_mut();

    assert_eq!(client.handle_connect(&mut mux, &mut handler).unwrap(), Flow::Pause);
    let sent = pipe.output_text();
    assert!(sent.ends_with("Transfer-Encoding: chunked\r\n\r\n"), "{sent}");
    assert!(!client.want_write());

    client.resume_send(&mut mux, true).unwrap();
    client.handle_writable(&mut mux, &mut handler).unwrap();
    assert_eq!(pipe.output_text(), "5\r\nhello\r\n0\r\n\r\n");
}

#[test]
fn reset_refuses_a_busy_socket() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, _pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    let failed = client.reset(transaction("GET", "/other")).unwrap_err();
    assert!(matches!(failed.error, Error::InvalidState));
    assert_eq!(failed.transaction.request().uri().path(), Some("/other"));
}

#[test]
fn pausing_receive_drops_read_interest() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, _pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();
    let id = client.id();

    client.pause_recv(&mut mux, true).unwrap();
    assert_eq!(mux.last_interest(id), Some(Interest::NONE));
    assert!(matches!(client.handle_readable(&mut mux, &mut handler), Err(Error::InvalidState)));

    client.resume_recv(&mut mux, true).unwrap();
    assert_eq!(mux.last_interest(id), Some(Interest { read: true, write: false }));
}

#[test]
fn abort_removes_the_socket_once() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    let (client, _pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    client.abort(&mut mux, true).unwrap();
    assert_eq!(mux.removed, vec![client.id()]);
    assert!(matches!(client.abort(&mut mux, true), Err(Error::InvalidState)));
    assert!(matches!(client.pause_recv(&mut mux, true), Err(Error::InvalidState)));

    client.handle_remove(&mut mux, &mut handler);
    assert_eq!(handler.ends, vec![ClientEndState::RecvResponseHeaders]);
    assert!(!client.reusable());
}

#[test]
fn synchronous_reads_after_a_paused_header_callback() {
    let mut mux = MockMultiplexer::new();
    let mut handler = RecordingClient::new();
    handler.pause_at_headers = true;
    let (client, pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());
    let mut client = client.borrow_mut();
    client.handle_connect(&mut mux, &mut handler).unwrap();

    pipe.push(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    assert_eq!(client.handle_readable(&mut mux, &mut handler).unwrap(), Flow::Pause);
    assert_eq!(client.phase(), ClientPhase::ParsingBody);

    let mut out = [0u8; 3];
    let (_, read) = client.read_response_body(&mut mux, &mut handler, &mut out).unwrap();
    assert_eq!(&out[..read], b"hel");

    let mut out = [0u8; 8];
    let (_, read) = client.read_response_body(&mut mux, &mut handler, &mut out).unwrap();
    assert_eq!(&out[..read], b"lo");
    assert!(client.is_finished());
    assert_eq!(mux.removed, vec![client.id()]);
    assert!(handler.response_body.is_empty());
}

#[test]
fn shutdown_stops_the_state_machine() {
    let mut mux = MockMultiplexer::new();
    mux.shutdown = true;
    let mut handler = RecordingClient::new();
    let (client, pipe, _) = connect(transaction("GET", "/"), ClientSocketConfig::default());

    assert_eq!(client.borrow_mut().handle_connect(&mut mux, &mut handler).unwrap(), Flow::Shutdown);
    assert!(pipe.take_output().is_empty());
}
