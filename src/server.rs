//! Connection handling: accept loop, graceful shutdown, concurrency limits.
//!
//! The server owns everything between the TCP listener and the gateway
//! service: socket tuning, the per-connection hyper plumbing, the
//! concurrency semaphore (overflow gets an immediate 503), and the drain
//! phase on shutdown.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::sleep;
use tower::ServiceExt;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// Tracks in-flight connections for the shutdown drain phase.
#[derive(Clone)]
struct ConnectionTracker {
    active_connections: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    fn new() -> Self {
        Self {
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn increment(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

/// Run the accept loop until a shutdown signal arrives, then drain.
///
/// `service` handles one request at a time per hyper's dispatch; it is
/// cloned per connection. Any error it returns is converted to an HTTP
/// response at this boundary, so connections never see a transport error
/// for an application-level failure.
pub async fn serve<S, B>(
    listener: tokio::net::TcpListener,
    service: S,
    config: GatewayConfig,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_grace: Duration,
) -> GatewayResult<()>
where
    S: tower::Service<Request<Incoming>, Response = Response<B>, Error = GatewayError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let connection_tracker = ConnectionTracker::new();
    let tracker_drain = connection_tracker.clone();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_streams));
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => {
                                warn!(
                                    peer = %peer_addr,
                                    max_streams = config.max_concurrent_streams,
                                    "Rejected connection: max concurrent streams reached"
                                );
                                tokio::spawn(async move {
                                    let _ = send_503_response(stream).await;
                                });
                                continue;
                            }
                        };

                        if let Err(e) = configure_tcp_stream(&stream, &config) {
                            error!(error = %e, "Failed to configure socket");
                        }

                        let service = service.clone();
                        let mut conn_shutdown_rx = shutdown_tx.subscribe();
                        let tracker = connection_tracker.clone();
                        tracker.increment();

                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, service, &mut conn_shutdown_rx).await
                            {
                                error!(error = %e, "Connection handling error");
                            }
                            tracker.decrement();
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping new connections");
                break;
            }
        }
    }

    info!(
        active_connections = tracker_drain.count(),
        grace_secs = shutdown_grace.as_secs(),
        "Waiting for active connections to drain"
    );

    let start = std::time::Instant::now();
    while tracker_drain.count() > 0 {
        if start.elapsed() >= shutdown_grace {
            warn!(
                active_connections = tracker_drain.count(),
                "Shutdown grace period reached, forcing exit"
            );
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    if tracker_drain.count() == 0 {
        info!("All connections drained, shutting down cleanly");
    }

    Ok(())
}

/// Serve a single connection, converting pipeline errors to HTTP responses.
async fn handle_connection<S, B>(
    stream: TcpStream,
    service: S,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> GatewayResult<()>
where
    S: tower::Service<Request<Incoming>, Response = Response<B>, Error = GatewayError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let io = TokioIo::new(stream);

    let svc_fn = hyper::service::service_fn(move |req| {
        let svc = service.clone();
        async move {
            let result: Result<Response<BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>>, Infallible> =
                match svc.oneshot(req).await {
                    Ok(response) => Ok(response.map(|body| body.map_err(Into::into).boxed())),
                    Err(e) => {
                        // Application errors become status-coded responses here
                        warn!(error = %e, "Request rejected");
                        Ok(e.to_response().map(|body| {
                            body.map_err(|never: Infallible| -> Box<
                                dyn std::error::Error + Send + Sync,
                            > {
                                match never {}
                            })
                            .boxed()
                        }))
                    }
                };
            result
        }
    });

    let executor = hyper_util::rt::TokioExecutor::new();
    let builder = auto::Builder::new(executor);
    let conn = builder.serve_connection(io, svc_fn);

    tokio::pin!(conn);

    tokio::select! {
        result = &mut conn => {
            if let Err(e) = result {
                error!(error = %e, "Connection error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, gracefully closing connection");
            conn.as_mut().graceful_shutdown();
            let _ = tokio::time::timeout(Duration::from_secs(5), conn).await;
        }
    }

    Ok(())
}

/// Configure an accepted TcpStream with the tuned socket options.
fn configure_tcp_stream(stream: &TcpStream, config: &GatewayConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let socket = socket2::SockRef::from(stream);

    let keepalive =
        socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive_secs));
    socket.set_tcp_keepalive(&keepalive)?;

    socket.set_recv_buffer_size(config.socket_buffer_size)?;
    socket.set_send_buffer_size(config.socket_buffer_size)?;

    Ok(())
}

/// Send a 503 Service Unavailable response when the semaphore is exhausted.
async fn send_503_response(mut stream: TcpStream) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = "503 Service Unavailable\n\n\
                The gateway has reached its maximum concurrent stream limit.\n\
                Please retry your request in a moment.";
    let response = format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Retry-After: 1\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
