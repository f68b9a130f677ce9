//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http_dispatch::net::{Connection, Endpoint, Waiter};
use http_dispatch::{ConnectError, ConnectionPool, PoolMetrics};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Request head as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Canned response written by a mock backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            headers: vec![("Location".to_string(), location.to_string())],
            body: String::new(),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Start a programmable mock backend on an ephemeral port.
///
/// Every request head is recorded before `f` picks the response.
pub async fn start_programmable_backend<F>(f: F) -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>)
where
    F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let log = recorded.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let log = log.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_head(&mut socket).await else {
                            return;
                        };
                        log.lock().unwrap().push(request.clone());

                        let response = f(&request);
                        let mut head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str("\r\n");
                        head.push_str(&response.body);

                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, recorded)
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&buf).to_string();
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    Some(RecordedRequest { method, target, headers })
}

/// Pool whose behaviour is scripted by the test.
///
/// Queued connections are handed out first, then queued failures; with
/// neither queued the waiter is held for the test to resolve.
#[derive(Default)]
pub struct ScriptedPool {
    pub acquisitions: AtomicUsize,
    pub shutdowns: AtomicUsize,
    connections: Mutex<VecDeque<Connection>>,
    failures: Mutex<VecDeque<ConnectError>>,
    held: Mutex<Vec<Waiter>>,
}

impl ScriptedPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_connection(&self, conn: Connection) {
        self.connections.lock().unwrap().push_back(conn);
    }

    pub fn push_failure(&self, err: ConnectError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn take_waiters(&self) -> Vec<Waiter> {
        std::mem::take(&mut *self.held.lock().unwrap())
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn serve(&self, waiter: Waiter) {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(conn) = self.connections.lock().unwrap().pop_front() {
            let _ = waiter.on_connection_established(conn);
            return;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            let _ = waiter.on_failure(err);
            return;
        }
        self.held.lock().unwrap().push(waiter);
    }
}

impl ConnectionPool for ScriptedPool {
    fn acquire_request_connection(&self, waiter: Waiter) {
        self.serve(waiter);
    }

    fn acquire_websocket_connection(&self, waiter: Waiter) {
        self.serve(waiter);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            waiting: self.held.lock().unwrap().len(),
            ..PoolMetrics::default()
        }
    }
}

/// In-memory connection to `host:port`; the other half is returned for the
/// test to play the server.
pub fn duplex_connection(host: &str, port: u16) -> (Connection, tokio::io::DuplexStream) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    (Connection::new(client, Endpoint::new(host, port, false)), server)
}
