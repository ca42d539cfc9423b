//! Loopback HTTP/1.1 responder for engine and orchestrator tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub(crate) struct TestResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl TestResponse {
    pub(crate) fn ok(body: Vec<u8>) -> Self {
        TestResponse {
            status: 200,
            content_type: "application/octet-stream",
            body,
        }
    }

    pub(crate) fn status(status: u16, body: Vec<u8>) -> Self {
        TestResponse {
            status,
            content_type: "text/plain",
            body,
        }
    }

    pub(crate) fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    /// Binds an ephemeral port and serves `routes` (request path, query
    /// stripped) until the test runtime shuts down.
    pub(crate) async fn spawn(routes: HashMap<String, TestResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                tokio::spawn(handle_connection(stream, Arc::clone(&routes)));
            }
        });

        TestServer { addr }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn handle_connection(mut stream: TcpStream, routes: Arc<HashMap<String, TestResponse>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];

    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }

        if request.len() > 65536 {
            return;
        }
    }

    let request_text = String::from_utf8_lossy(&request);
    let path = request_text
        .split_whitespace()
        .nth(1)
        .and_then(|target| target.split('?').next())
        .unwrap_or("/");

    let response = routes
        .get(path)
        .cloned()
        .unwrap_or_else(|| TestResponse::status(404, b"not found".to_vec()));
    let reason = match response.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    };

    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason,
        response.content_type,
        response.body.len()
    );

    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(&response.body).await;
    let _ = stream.shutdown().await;
}

static TEMP_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Fresh directory under the system temp dir, unique per test invocation.
pub(crate) fn unique_temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vdl-test-{}-{}-{}",
        label,
        std::process::id(),
        TEMP_DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
