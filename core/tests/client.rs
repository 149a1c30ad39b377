/*
 * client.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */


//! End-to-end request lifecycle tests over in-memory transports.
//!
//! `MockConnector` hands the client one half of a `tokio::io::duplex` pair per connection and
//! passes the other half to the test, which plays the server.

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use corriere_core::auth::negotiate::StaticSpnegoEngine;
use corriere_core::body::{
    Body, BodyGenerator, FeedableBodyGenerator, InputStreamBody, InputStreamBodyGenerator,
};
use corriere_core::filter::{FilterContext, FilterError, IoExceptionFilter, ReplayOnIoErrorFilter};
use corriere_core::multipart::Part;
use corriere_core::net::{BoxedTransport, ConnectTarget, Connector};
use corriere_core::{
    AsyncHandler, ClientConfig, GetError, HandlerState, HttpClient, HttpError, HttpResponseStatus,
    ProxyServer, Realm, ResponseBodyPart, TimeoutKind,
};

const WAIT: Duration = Duration::from_secs(5);

struct MockConnector {
    peers: mpsc::UnboundedSender<(ConnectTarget, Peer)>,
    connects: AtomicUsize,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &ConnectTarget) -> io::Result<BoxedTransport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.peers
            .send((target.clone(), Peer::new(server)))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no server"))?;
        Ok(Box::new(client))
    }

    async fn upgrade_tls(&self, transport: BoxedTransport, _host: &str) -> io::Result<BoxedTransport> {
        Ok(transport)
    }
}

type Peers = mpsc::UnboundedReceiver<(ConnectTarget, Peer)>;

fn mock() -> (Arc<MockConnector>, Peers) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        peers: tx,
        connects: AtomicUsize::new(0),
    });
    (connector, rx)
}

fn client(config: ClientConfig, connector: &Arc<MockConnector>) -> HttpClient {
    HttpClient::with_connector(config, connector.clone())
}

async fn accept(peers: &mut Peers) -> (ConnectTarget, Peer) {
    timeout(WAIT, peers.recv())
        .await
        .expect("no connection opened")
        .expect("connector dropped")
}

/// A request as the server saw it.
struct Received {
    head: String,
    body: Vec<u8>,
}

impl Received {
    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            if n.trim().eq_ignore_ascii_case(name) {
                Some(v.trim().to_string())
            } else {
                None
            }
        })
    }
}

/// Server side of one connection.
struct Peer {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn fill(&mut self) -> usize {
        let mut tmp = [0u8; 4096];
        let n = self.stream.read(&mut tmp).await.unwrap();
        self.buf.extend_from_slice(&tmp[..n]);
        n
    }

    async fn read_until(&mut self, delimiter: &[u8]) -> Vec<u8> {
        loop {
            if let Some(pos) = self.buf.windows(delimiter.len()).position(|w| w == delimiter) {
                return self.buf.drain(..pos + delimiter.len()).collect();
            }
            assert!(timeout(WAIT, self.fill()).await.unwrap() > 0, "client closed the connection");
        }
    }

    async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        while self.buf.len() < len {
            assert!(timeout(WAIT, self.fill()).await.unwrap() > 0, "client closed the connection");
        }
        self.buf.drain(..len).collect()
    }

    async fn read_head(&mut self) -> String {
        String::from_utf8(self.read_until(b"\r\n\r\n").await).unwrap()
    }

    async fn read_chunked(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            let line = String::from_utf8(self.read_until(b"\r\n").await).unwrap();
            let size = usize::from_str_radix(line.trim(), 16).unwrap();
            if size == 0 {
                self.read_until(b"\r\n").await;
                return body;
            }
            body.extend(self.read_exact(size).await);
            self.read_exact(2).await;
        }
    }

    async fn request(&mut self) -> Received {
        let head = self.read_head().await;
        let mut received = Received {
            head,
            body: Vec::new(),
        };
        if let Some(len) = received.header("content-length") {
            received.body = self.read_exact(len.parse().unwrap()).await;
        } else if received.header("transfer-encoding").as_deref() == Some("chunked") {
            received.body = self.read_chunked().await;
        }
        received
    }

    async fn send(&mut self, raw: &str) {
        self.stream.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn ok(&mut self, body: &str) {
        self.send(&format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body))
            .await;
    }
}

fn execution_error<T: std::fmt::Debug>(outcome: Result<T, GetError>) -> Arc<HttpError> {
    match outcome {
        Err(GetError::Execution(e)) => e,
        other => panic!("expected an execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn get_reads_length_delimited_body() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client.prepare_get("http://example.com/path?q=1").build().unwrap();
    let future = client.execute_request(request);

    let (target, mut peer) = accept(&mut peers).await;
    assert_eq!(target.host, "example.com");
    assert_eq!(target.port, 80);
    assert!(!target.secure);
    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET /path?q=1 HTTP/1.1");
    assert_eq!(received.header("host").as_deref(), Some("example.com"));
    assert_eq!(received.header("accept").as_deref(), Some("*/*"));
    assert!(received.header("user-agent").unwrap().starts_with("Corriere/"));
    peer.send("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\n\r\nhello").await;

    let response = future.get().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "hello");
    assert_eq!(response.header("x-test"), Some("yes"));
}

#[tokio::test]
async fn keep_alive_reuses_the_channel() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
        .await;
    assert_eq!(first.get().await.unwrap().text(), "hello world");
    assert_eq!(client.idle_channels(), 1);

    let second = client.execute_request(request);
    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET / HTTP/1.1");
    peer.ok("again").await;
    assert_eq!(second.get().await.unwrap().text(), "again");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn read_until_close_is_not_pooled() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let future = client.execute_request(client.prepare_get("http://example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.0 200 OK\r\n\r\nstreamed").await;
    drop(peer);
    assert_eq!(future.get().await.unwrap().text(), "streamed");
    assert_eq!(client.idle_channels(), 0);
}

#[tokio::test]
async fn post_redirect_switches_to_get() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().follow_redirect(true), &connector);
    let request = client.prepare_post("http://example.com/a").text_body("data").build().unwrap();
    let future = client.execute_request(request);

    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert_eq!(received.request_line(), "POST /a HTTP/1.1");
    assert_eq!(received.body, b"data");
    peer.send("HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 4\r\n\r\nmove").await;

    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET /b HTTP/1.1");
    assert_eq!(received.header("content-length"), None);
    assert!(received.body.is_empty());
    peer.ok("done").await;

    let response = future.get().await.unwrap();
    assert_eq!(response.text(), "done");
    assert_eq!(response.url().as_str(), "http://example.com/b");
    assert_eq!(future.redirect_count(), 1);
}

#[tokio::test]
async fn temporary_redirect_keeps_method_and_body() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().follow_redirect(true), &connector);
    let request = client.prepare_post("http://example.com/a").text_body("data").build().unwrap();
    let future = client.execute_request(request);

    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.1 307 Temporary Redirect\r\nLocation: http://other.example.com/c\r\nContent-Length: 0\r\n\r\n")
        .await;

    let (target, mut other) = accept(&mut peers).await;
    assert_eq!(target.host, "other.example.com");
    let received = other.request().await;
    assert_eq!(received.request_line(), "POST /c HTTP/1.1");
    assert_eq!(received.header("host").as_deref(), Some("other.example.com"));
    assert_eq!(received.body, b"data");
    other.ok("").await;
    assert_eq!(future.get().await.unwrap().status(), 200);
    // The first origin's channel went back to the pool.
    assert_eq!(client.idle_channels(), 2);
}

#[tokio::test]
async fn too_many_redirects_fail() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().follow_redirect(true).max_redirects(1), &connector);
    let future = client.execute_request(client.prepare_get("http://example.com/").build().unwrap());

    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.1 301 Moved\r\nLocation: /x\r\nContent-Length: 0\r\n\r\n").await;
    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET /x HTTP/1.1");
    peer.send("HTTP/1.1 301 Moved\r\nLocation: /y\r\nContent-Length: 0\r\n\r\n").await;

    let error = execution_error(future.get().await);
    assert!(matches!(*error, HttpError::MaxRedirects(1)));
}

#[tokio::test]
async fn redirects_are_delivered_unless_followed() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let future = client.execute_request(client.prepare_get("http://example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.1 302 Found\r\nLocation: /x\r\nContent-Length: 0\r\n\r\n").await;
    let response = future.get().await.unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("/x"));
}

#[tokio::test]
async fn basic_challenge_is_answered_on_the_same_channel() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client
        .prepare_get("http://example.com/secret")
        .realm(Realm::basic("u", "p").preemptive(false))
        .build()
        .unwrap();
    let future = client.execute_request(request);

    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert_eq!(received.header("authorization"), None);
    peer.send("HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"test\"\r\nContent-Length: 0\r\n\r\n")
        .await;

    let received = peer.request().await;
    assert_eq!(received.header("authorization").as_deref(), Some("Basic dTpw"));
    peer.ok("secret").await;
    assert_eq!(future.get().await.unwrap().text(), "secret");
    assert!(future.is_in_auth());
}

#[tokio::test]
async fn rejected_preemptive_credentials_are_delivered() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().realm(Realm::basic("u", "wrong")), &connector);
    let future = client.execute_request(client.prepare_get("http://example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert!(received.header("authorization").unwrap().starts_with("Basic "));
    peer.send("HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"test\"\r\nContent-Length: 0\r\n\r\n")
        .await;
    assert_eq!(future.get().await.unwrap().status(), 401);
}

#[tokio::test]
async fn dead_pooled_channel_is_retried_on_a_new_connection() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("one").await;
    first.get().await.unwrap();
    drop(peer);

    let second = client.execute_request(request);
    let (_, mut fresh) = accept(&mut peers).await;
    fresh.request().await;
    fresh.ok("two").await;
    assert_eq!(second.get().await.unwrap().text(), "two");
    assert_eq!(second.retry_count(), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retry_budget_reports_io_error() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().max_request_retry(0), &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("one").await;
    first.get().await.unwrap();
    drop(peer);

    let error = execution_error(client.execute_request(request).get().await);
    assert!(error.is_io());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_timeout_fails_the_future() {
    let (connector, mut peers) = mock();
    let config = ClientConfig::new().request_timeout(Some(Duration::from_millis(100)));
    let client = client(config, &connector);
    let future = client.execute_request(client.prepare_get("http://example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;

    let error = execution_error(future.get().await);
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::Request));
    assert_eq!(error.to_string(), "Request timeout to example.com:80 after 100 ms");
    drop(peer);
}

#[derive(Default)]
struct Recorder {
    errors: Arc<AtomicUsize>,
    abort_on_headers: bool,
    parts: Vec<(usize, bool)>,
}

impl AsyncHandler for Recorder {
    type Output = Vec<(usize, bool)>;

    fn on_status_received(&mut self, _status: &HttpResponseStatus) -> HandlerState {
        HandlerState::Continue
    }

    fn on_headers_received(&mut self, _headers: &HeaderMap) -> HandlerState {
        if self.abort_on_headers {
            HandlerState::Abort
        } else {
            HandlerState::Continue
        }
    }

    fn on_body_part_received(&mut self, part: ResponseBodyPart) -> HandlerState {
        self.parts.push((part.len(), part.is_last));
        HandlerState::Continue
    }

    fn on_completed(&mut self) -> corriere_core::Result<Self::Output> {
        Ok(std::mem::take(&mut self.parts))
    }

    fn on_throwable(&mut self, _error: &HttpError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn cancel_closes_the_channel_and_reports_once() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let errors = Arc::new(AtomicUsize::new(0));
    let handler = Recorder {
        errors: errors.clone(),
        ..Default::default()
    };
    let future = client.execute(client.prepare_get("http://example.com/").build().unwrap(), handler);
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;

    assert!(future.cancel());
    assert!(!future.cancel());
    let error = execution_error(future.get().await);
    assert!(error.is_cancelled());
    assert!(future.is_cancelled());
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    let mut tmp = [0u8; 16];
    let n = timeout(WAIT, peer.stream.read(&mut tmp)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn body_parts_end_with_a_last_part() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let future = client.execute(
        client.prepare_get("http://example.com/").build().unwrap(),
        Recorder::default(),
    );
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("abc").await;
    let parts = future.get().await.unwrap();
    assert_eq!(parts.last(), Some(&(0, true)));
    assert_eq!(parts.iter().map(|(len, _)| len).sum::<usize>(), 3);
}

#[tokio::test]
async fn handler_abort_discards_the_channel() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let handler = Recorder {
        abort_on_headers: true,
        ..Default::default()
    };
    let future = client.execute(client.prepare_get("http://example.com/").build().unwrap(), handler);
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("ignored").await;
    assert!(future.get().await.unwrap().is_empty());
    assert_eq!(client.idle_channels(), 0);
}

#[tokio::test]
async fn unknown_length_body_is_sent_chunked() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let generator = InputStreamBodyGenerator::new(Box::new(Cursor::new(b"hello chunked world".to_vec())));
    let request = client
        .prepare_post("http://example.com/upload")
        .generator_body(Arc::new(generator))
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert_eq!(received.header("transfer-encoding").as_deref(), Some("chunked"));
    assert_eq!(received.header("content-length"), None);
    assert_eq!(received.body, b"hello chunked world");
    peer.ok("").await;
    assert_eq!(future.get().await.unwrap().status(), 200);
}

#[tokio::test]
async fn expect_continue_holds_the_body() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client
        .prepare_post("http://example.com/upload")
        .header("Expect", "100-continue")
        .text_body("payload")
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let head = peer.read_head().await;
    assert!(head.contains("content-length: 7\r\n"));
    assert!(timeout(Duration::from_millis(100), peer.fill()).await.is_err());
    assert!(peer.buf.is_empty());

    peer.send("HTTP/1.1 100 Continue\r\n\r\n").await;
    assert_eq!(peer.read_exact(7).await, b"payload");
    peer.ok("stored").await;
    assert_eq!(future.get().await.unwrap().text(), "stored");
}

#[tokio::test]
async fn multipart_body_carries_boundary() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client
        .prepare_post("http://example.com/form")
        .part(Part::string("field", "value"))
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    let content_type = received.header("content-type").unwrap();
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .unwrap()
        .to_string();
    let body = String::from_utf8(received.body).unwrap();
    assert!(body.starts_with(&format!("--{}\r\n", boundary)));
    assert!(body.contains("Content-Disposition: form-data; name=\"field\""));
    assert!(body.contains("\r\n\r\nvalue\r\n"));
    assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    peer.ok("").await;
    future.get().await.unwrap();
}

#[tokio::test]
async fn secure_target_is_tunnelled_through_proxy() {
    let (connector, mut peers) = mock();
    let config = ClientConfig::new().proxy_server(ProxyServer::new("proxy", 3128));
    let client = client(config, &connector);
    let future = client.execute_request(client.prepare_get("https://secure.example.com/x").build().unwrap());

    let (target, mut peer) = accept(&mut peers).await;
    assert_eq!(target.host, "proxy");
    assert_eq!(target.port, 3128);
    assert!(!target.secure);
    let head = peer.read_head().await;
    assert!(head.starts_with("CONNECT secure.example.com:443 HTTP/1.1\r\n"));
    assert!(head.contains("host: secure.example.com:443\r\n"));
    peer.send("HTTP/1.1 200 Connection established\r\n\r\n").await;

    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET /x HTTP/1.1");
    assert_eq!(received.header("host").as_deref(), Some("secure.example.com"));
    peer.ok("tunnelled").await;
    assert_eq!(future.get().await.unwrap().text(), "tunnelled");
}

#[tokio::test]
async fn refused_tunnel_is_delivered() {
    let (connector, mut peers) = mock();
    let config = ClientConfig::new().proxy_server(ProxyServer::new("proxy", 3128));
    let client = client(config, &connector);
    let future = client.execute_request(client.prepare_get("https://secure.example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    peer.read_head().await;
    peer.send("HTTP/1.1 403 Forbidden\r\nContent-Length: 6\r\n\r\ndenied").await;
    let response = future.get().await.unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(response.text(), "denied");
}

#[tokio::test]
async fn plain_target_is_forwarded_in_absolute_form() {
    let (connector, mut peers) = mock();
    let proxy = ProxyServer::new("proxy", 3128).realm(Realm::basic("u", "p"));
    let client = client(ClientConfig::new().proxy_server(proxy), &connector);
    let future = client.execute_request(client.prepare_get("http://plain.example.com/x?y=1").build().unwrap());
    let (target, mut peer) = accept(&mut peers).await;
    assert_eq!(target.host, "proxy");
    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET http://plain.example.com/x?y=1 HTTP/1.1");
    assert_eq!(received.header("proxy-authorization").as_deref(), Some("Basic dTpw"));
    peer.ok("").await;
    future.get().await.unwrap();
}

#[tokio::test]
async fn connection_limit_rejects_extra_requests() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().max_connections(1), &connector);
    let first = client.execute_request(client.prepare_get("http://a.example.com/").build().unwrap());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;

    let second = client.execute_request(client.prepare_get("http://b.example.com/").build().unwrap());
    let error = execution_error(second.get().await);
    assert!(matches!(*error, HttpError::TooManyConnections(_)));

    peer.ok("").await;
    first.get().await.unwrap();
}

/// Sleeps in `on_headers_received` so the response is fully buffered by the time it returns.
struct SlowHeaders {
    entered: std::sync::mpsc::Sender<()>,
    parts: Arc<AtomicUsize>,
}

impl AsyncHandler for SlowHeaders {
    type Output = ();

    fn on_status_received(&mut self, _status: &HttpResponseStatus) -> HandlerState {
        HandlerState::Continue
    }

    fn on_headers_received(&mut self, _headers: &HeaderMap) -> HandlerState {
        let _ = self.entered.send(());
        std::thread::sleep(Duration::from_millis(200));
        HandlerState::Continue
    }

    fn on_body_part_received(&mut self, _part: ResponseBodyPart) -> HandlerState {
        self.parts.fetch_add(1, Ordering::SeqCst);
        HandlerState::Continue
    }

    fn on_completed(&mut self) -> corriere_core::Result<()> {
        Ok(())
    }

    fn on_throwable(&mut self, _error: &HttpError) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_parts_are_dropped_after_cancel() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let (entered, headers_seen) = std::sync::mpsc::channel();
    let parts = Arc::new(AtomicUsize::new(0));
    let handler = SlowHeaders {
        entered,
        parts: parts.clone(),
    };
    let future = client.execute(client.prepare_get("http://example.com/").build().unwrap(), handler);
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.send("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n")
        .await;

    let canceller = {
        let future = future.clone();
        std::thread::spawn(move || {
            headers_seen.recv().unwrap();
            future.cancel()
        })
    };
    assert!(execution_error(future.get().await).is_cancelled());
    assert!(canceller.join().unwrap());
    // give the exchange time to walk past the buffered chunks
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(parts.load(Ordering::SeqCst), 0);
    assert_eq!(client.idle_channels(), 0);
}

/// Stream body with a declared length that may not match what the stream holds.
struct DeclaredLength {
    data: &'static [u8],
    length: u64,
}

impl BodyGenerator for DeclaredLength {
    fn create_body(&self) -> io::Result<Box<dyn Body>> {
        Ok(Box::new(InputStreamBody::with_length(
            Box::new(Cursor::new(self.data)),
            self.length,
        )))
    }
}

#[tokio::test]
async fn longer_stream_is_cut_at_declared_length() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let request = client
        .prepare_post("http://example.com/upload")
        .generator_body(Arc::new(DeclaredLength {
            data: b"0123456789",
            length: 5,
        }))
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert_eq!(received.header("content-length").as_deref(), Some("5"));
    assert_eq!(received.body, b"01234");
    peer.ok("").await;
    future.get().await.unwrap();

    // nothing of the first body leaks into the next request on the pooled channel
    let next = client.execute_request(client.prepare_get("http://example.com/next").build().unwrap());
    let received = peer.request().await;
    assert_eq!(received.request_line(), "GET /next HTTP/1.1");
    peer.ok("").await;
    next.get().await.unwrap();
}

#[tokio::test]
async fn shorter_stream_fails_and_closes_the_channel() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::new().max_request_retry(0), &connector);
    let request = client
        .prepare_post("http://example.com/upload")
        .generator_body(Arc::new(DeclaredLength {
            data: b"abc",
            length: 8,
        }))
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let head = peer.read_head().await;
    assert!(head.contains("content-length: 8\r\n"));

    let error = execution_error(future.get().await);
    assert!(error.is_io());
    let mut rest = Vec::new();
    timeout(WAIT, peer.stream.read_to_end(&mut rest)).await.unwrap().unwrap();
    peer.buf.extend(rest);
    assert_eq!(peer.buf, b"abc");
    assert_eq!(client.idle_channels(), 0);
}

#[tokio::test]
async fn fed_body_resumes_when_data_arrives() {
    let (connector, mut peers) = mock();
    let client = client(ClientConfig::default(), &connector);
    let generator = FeedableBodyGenerator::new();
    let request = client
        .prepare_post("http://example.com/feed")
        .generator_body(Arc::new(generator.clone()))
        .build()
        .unwrap();
    let future = client.execute_request(request);
    let (_, mut peer) = accept(&mut peers).await;
    let head = peer.read_head().await;
    assert!(head.contains("transfer-encoding: chunked\r\n"));
    // the writer is parked on an empty queue
    assert!(timeout(Duration::from_millis(100), peer.fill()).await.is_err());
    assert!(peer.buf.is_empty());

    let feeder = tokio::spawn(async move {
        generator.feed(&b"hello "[..], false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        generator.feed(&b"world"[..], true).unwrap();
    });
    assert_eq!(peer.read_chunked().await, b"hello world");
    feeder.await.unwrap();
    peer.ok("fed").await;
    assert_eq!(future.get().await.unwrap().text(), "fed");
}

/// Counts consultations, then defers to `ReplayOnIoErrorFilter`.
#[derive(Default)]
struct CountingReplay {
    calls: AtomicUsize,
}

impl IoExceptionFilter for CountingReplay {
    fn filter(&self, ctx: FilterContext) -> Result<FilterContext, FilterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReplayOnIoErrorFilter.filter(ctx)
    }
}

#[tokio::test]
async fn io_exception_filter_replays_on_a_new_connection() {
    let (connector, mut peers) = mock();
    let filter = Arc::new(CountingReplay::default());
    let client = client(ClientConfig::new().io_exception_filter(filter.clone()), &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("one").await;
    first.get().await.unwrap();
    drop(peer);

    let second = client.execute_request(request);
    let (_, mut fresh) = accept(&mut peers).await;
    fresh.request().await;
    fresh.ok("two").await;
    assert_eq!(second.get().await.unwrap().text(), "two");
    assert_eq!(filter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.retry_count(), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn io_exception_filter_replay_respects_retry_budget() {
    let (connector, mut peers) = mock();
    let filter = Arc::new(CountingReplay::default());
    let config = ClientConfig::new()
        .max_request_retry(0)
        .io_exception_filter(filter.clone());
    let client = client(config, &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    peer.request().await;
    peer.ok("one").await;
    first.get().await.unwrap();
    drop(peer);

    let second = client.execute_request(request);
    assert!(execution_error(second.get().await).is_io());
    assert_eq!(filter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.retry_count(), 0);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ntlm_type1_is_sent_once_per_channel() {
    let (connector, mut peers) = mock();
    let realm = Realm::ntlm("u", "p").preemptive(true);
    let client = client(ClientConfig::new().realm(realm), &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert!(received.header("authorization").unwrap().starts_with("NTLM "));
    peer.ok("").await;
    first.get().await.unwrap();

    let second = client.execute_request(request);
    let received = peer.request().await;
    assert_eq!(received.header("authorization"), None);
    peer.ok("").await;
    second.get().await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn negotiate_token_is_sent_once_per_channel() {
    let (connector, mut peers) = mock();
    let config = ClientConfig::new()
        .realm(Realm::spnego().preemptive(true))
        .spnego_engine(Arc::new(StaticSpnegoEngine::new("dG9rZW4=")));
    let client = client(config, &connector);
    let request = client.prepare_get("http://example.com/").build().unwrap();

    let first = client.execute_request(request.clone());
    let (_, mut peer) = accept(&mut peers).await;
    let received = peer.request().await;
    assert_eq!(received.header("authorization").as_deref(), Some("Negotiate dG9rZW4="));
    peer.ok("").await;
    first.get().await.unwrap();

    let second = client.execute_request(request);
    let received = peer.request().await;
    assert_eq!(received.header("authorization"), None);
    peer.ok("").await;
    second.get().await.unwrap();
}
