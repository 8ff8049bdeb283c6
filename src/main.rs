//! tokengate - authorizing reverse proxy with opportunistic token issuance.
//!
//! Resolves the first path segment of each inbound request to a registered
//! backend, gates the request on that backend's secret, forwards it, and
//! mints signed tokens when the backend's response asks for one.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokengate::config::GatewayConfig;
use tokengate::gateway_service::GatewayService;
use tokengate::logging_layer::logging_layer;
use tokengate::registry::ServiceRegistry;
use tokengate::server;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tracing::{error, info};

/// Command-line configuration for the gateway server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TOKENGATE_PORT", default_value = "4141")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "TOKENGATE_SHUTDOWN_TIMEOUT", default_value = "30")]
    shutdown_timeout: u64,

    /// Path to the YAML registry seed file listing backend services
    #[arg(short, long, env = "TOKENGATE_SERVICES")]
    services: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let registry = Arc::new(ServiceRegistry::from_file(&cli.services)?);
    let gateway = GatewayService::new(registry, config.clone())?;
    let service_stack = ServiceBuilder::new()
        .layer(logging_layer())
        .service(gateway);

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        bind = %cli.bind,
        port = cli.port,
        services = %cli.services.display(),
        max_concurrent_streams = config.max_concurrent_streams,
        token_ttl_secs = config.token_ttl.as_secs(),
        "tokengate starting"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let shutdown_tx_sigint = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                let _ = shutdown_tx_sigint.send(());
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        let shutdown_tx_sigterm = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    let _ = shutdown_tx_sigterm.send(());
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    server::serve(
        listener,
        service_stack,
        config,
        shutdown_tx,
        Duration::from_secs(cli.shutdown_timeout),
    )
    .await?;

    Ok(())
}
