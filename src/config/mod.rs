//! Runtime configuration for the gateway.
//!
//! All knobs have sensible defaults and can be overridden via `TOKENGATE_*`
//! environment variables. The service registry itself is seeded from a YAML
//! file (see [`crate::registry`]); this module only covers process-level
//! tuning and the token issuance defaults.

pub mod duration_format;

use std::time::Duration;

/// Default validity window for issued tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Enable TCP_NODELAY on accepted and upstream connections
    pub tcp_nodelay: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: u64,

    /// Maximum concurrent in-flight requests before new connections get 503
    pub max_concurrent_streams: usize,

    /// Socket buffer size (SO_RCVBUF / SO_SNDBUF)
    pub socket_buffer_size: usize,

    /// Maximum idle upstream connections kept per host
    pub pool_max_idle_per_host: usize,

    /// Total timeout for a single upstream call
    pub upstream_timeout: Duration,

    /// Validity window applied to issued tokens when neither the service
    /// descriptor nor the backend response overrides it
    pub token_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
            max_concurrent_streams: 10000,
            socket_buffer_size: 262144, // 256 KB
            pool_max_idle_per_host: 32,
            upstream_timeout: Duration::from_secs(30),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `TOKENGATE_TCP_NODELAY` (default: true)
    /// - `TOKENGATE_TCP_KEEPALIVE_SECS` (default: 60)
    /// - `TOKENGATE_MAX_CONCURRENT_STREAMS` (default: 10000)
    /// - `TOKENGATE_SOCKET_BUFFER_SIZE` (default: 262144)
    /// - `TOKENGATE_POOL_MAX_IDLE_PER_HOST` (default: 32)
    /// - `TOKENGATE_UPSTREAM_TIMEOUT_SECS` (default: 30)
    /// - `TOKENGATE_TOKEN_TTL` (default: `2h`, duration string)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            tcp_nodelay: std::env::var("TOKENGATE_TCP_NODELAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_nodelay),

            tcp_keepalive_secs: std::env::var("TOKENGATE_TCP_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_keepalive_secs),

            max_concurrent_streams: std::env::var("TOKENGATE_MAX_CONCURRENT_STREAMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_concurrent_streams),

            socket_buffer_size: std::env::var("TOKENGATE_SOCKET_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.socket_buffer_size),

            pool_max_idle_per_host: std::env::var("TOKENGATE_POOL_MAX_IDLE_PER_HOST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.pool_max_idle_per_host),

            upstream_timeout: std::env::var("TOKENGATE_UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.upstream_timeout),

            token_ttl: std::env::var("TOKENGATE_TOKEN_TTL")
                .ok()
                .and_then(|v| duration_format::parse_duration(&v).ok())
                .unwrap_or(default.token_ttl),
        }
    }
}
