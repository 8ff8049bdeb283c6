//! Shared scaffolding for end-to-end tests.
//!
//! Spins up a raw-TCP mock backend and a gateway instance, both on ephemeral
//! ports, and talks to the gateway over a plain socket so tests can observe
//! the exact wire-level response (status line, headers, body).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokengate::config::GatewayConfig;
use tokengate::gateway_service::GatewayService;
use tokengate::logging_layer::logging_layer;
use tokengate::registry::ServiceRegistry;
use tokengate::server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tower::ServiceBuilder;

/// A mock backend that records the head of every request it receives and
/// answers each with the same canned raw response.
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Request heads (status line + headers) received so far, in order.
    pub async fn received(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

/// Spawn a mock backend answering every request with `response` (a complete
/// raw HTTP response; use [`backend_response`] to build one).
pub async fn spawn_backend(response: String) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                // Requests in these tests carry no body; the head is enough
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                recorded
                    .lock()
                    .await
                    .push(String::from_utf8_lossy(&head).into_owned());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            });
        }
    });

    MockBackend { addr, requests }
}

/// Build a complete raw HTTP/1.1 response with a correct Content-Length.
pub fn backend_response(status_line: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {}\r\n", status_line);
    for (name, value) in extra_headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    response
}

/// A gateway listening on an ephemeral port. Dropping it releases the
/// shutdown channel, which stops the accept loop.
pub struct TestGateway {
    pub addr: SocketAddr,
    _shutdown: broadcast::Sender<()>,
}

/// Spawn a gateway over the given registry, with the same middleware stack
/// the binary uses.
pub async fn spawn_gateway(registry: ServiceRegistry) -> TestGateway {
    spawn_gateway_with_config(registry, GatewayConfig::default()).await
}

pub async fn spawn_gateway_with_config(
    registry: ServiceRegistry,
    config: GatewayConfig,
) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let gateway = GatewayService::new(Arc::new(registry), config.clone()).unwrap();
    let stack = ServiceBuilder::new().layer(logging_layer()).service(gateway);

    let (shutdown_tx, _) = broadcast::channel(1);
    let serve_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = server::serve(listener, stack, config, serve_shutdown, Duration::from_secs(1)).await;
    });

    TestGateway {
        addr,
        _shutdown: shutdown_tx,
    }
}

/// A parsed raw HTTP response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Header names matching a prefix, case-insensitive.
    pub fn header_names_with_prefix(&self, prefix: &str) -> Vec<&str> {
        self.headers
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| n.to_ascii_lowercase().starts_with(prefix))
            .collect()
    }
}

/// Send a raw HTTP request and read the connection to EOF.
///
/// Requests must include `Connection: close` so the gateway ends the
/// connection after one exchange.
pub async fn send_request(addr: SocketAddr, raw: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await.unwrap();
    parse_response(&bytes)
}

/// Convenience for a GET with no body.
pub async fn get(addr: SocketAddr, path: &str, extra_headers: &[(&str, &str)]) -> RawResponse {
    let mut raw = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", path);
    for (name, value) in extra_headers {
        raw.push_str(&format!("{}: {}\r\n", name, value));
    }
    raw.push_str("\r\n");
    send_request(addr, &raw).await
}

fn parse_response(bytes: &[u8]) -> RawResponse {
    let text = String::from_utf8_lossy(bytes);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .expect("response has a header/body separator");

    let mut lines = head.lines();
    let status_line = lines.next().expect("response has a status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status line has a numeric code");

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"));
    let body = if chunked {
        decode_chunked(body)
    } else {
        body.to_string()
    };

    RawResponse {
        status,
        headers,
        body,
    }
}

fn decode_chunked(raw: &str) -> String {
    let mut decoded = String::new();
    let mut rest = raw;
    loop {
        let Some((size_line, after)) = rest.split_once("\r\n") else {
            break;
        };
        let Ok(size) = usize::from_str_radix(size_line.trim(), 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        decoded.push_str(&after[..size]);
        // Skip the chunk's trailing CRLF
        rest = &after[size + 2..];
    }
    decoded
}
