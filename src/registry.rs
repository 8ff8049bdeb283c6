//! Service registry: alias -> backend descriptor lookup.
//!
//! The registry is the only shared state the request pipeline touches, and
//! the pipeline only ever reads from it. Mutation (seeding at startup,
//! registration by an operator tool) goes through [`ServiceRegistry::insert`]
//! behind a reader-writer lock; the authorization and issuance gates never
//! see the lock, only a cloned `Arc<ServiceDescriptor>`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::duration_format;

/// Errors that can occur while loading or mutating the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Seed file could not be read
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    /// Seed file exists but contains nothing
    #[error("registry file is empty")]
    EmptyFile,

    /// Seed file is not valid YAML for the expected schema
    #[error("failed to parse registry file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Two descriptors claim the same alias; aliases are the registry key
    #[error("duplicate path alias '{0}' in registry file")]
    DuplicateAlias(String),

    /// A descriptor has an empty alias and could never be routed to
    #[error("service '{0}' has an empty path alias")]
    EmptyAlias(String),

    /// A secured descriptor has no secret to verify or sign with
    #[error("secured service '{0}' has no secret")]
    MissingSecret(String),
}

/// Sentinel for a service that has never been resolved.
fn last_used_unset() -> AtomicI64 {
    AtomicI64::new(-1)
}

fn default_enabled() -> bool {
    true
}

/// One registered backend service.
///
/// `path_alias` is the registry key: the first path segment clients use to
/// select this service. `secret` is dual-use, verifying inbound bearer
/// tokens and signing newly issued ones, so tokens are never portable
/// across services.
#[derive(Debug, Deserialize)]
pub struct ServiceDescriptor {
    /// Display identifier, not unique
    pub name: String,

    /// Upstream origin requests are forwarded to, e.g. `http://localhost:8080`
    pub base_url: String,

    /// Unique routing key; the first path segment of client requests
    pub path_alias: String,

    /// Symmetric key for verifying inbound tokens and signing issued ones
    #[serde(default)]
    pub secret: String,

    /// When false, every request to this service bypasses authorization
    #[serde(default)]
    pub secured: bool,

    /// Sub-paths (relative to the alias, each with its own leading `/`)
    /// that bypass authorization even when `secured` is true
    #[serde(default)]
    pub public_routes: Vec<String>,

    /// Per-service override of the default token validity window
    #[serde(default, deserialize_with = "duration_format::deserialize_option")]
    pub token_ttl: Option<Duration>,

    /// Disabled services resolve as unregistered
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Unix millis of the last successful resolve, -1 if never.
    /// Registry bookkeeping only; the request pipeline does not read it.
    #[serde(skip, default = "last_used_unset")]
    pub last_used: AtomicI64,
}

impl ServiceDescriptor {
    /// Create an unsecured descriptor. Mostly useful for tests and tooling;
    /// deployments load descriptors from the registry seed file.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        path_alias: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            path_alias: path_alias.into(),
            secret: secret.into(),
            secured: false,
            public_routes: Vec::new(),
            token_ttl: None,
            enabled: true,
            last_used: last_used_unset(),
        }
    }

    /// Turn on authorization for this descriptor, with the given public routes.
    pub fn secured(mut self, public_routes: Vec<String>) -> Self {
        self.secured = true;
        self.public_routes = public_routes;
        self
    }

    /// Override the token validity window for this service.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    /// The validity window for tokens issued on behalf of this service,
    /// before any per-response override from the backend.
    pub fn effective_token_ttl(&self, deployment_default: Duration) -> Duration {
        self.token_ttl.unwrap_or(deployment_default)
    }
}

/// Schema of the registry seed file.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    services: Vec<ServiceDescriptor>,
}

/// Alias-keyed lookup of service descriptors.
///
/// Reads take a shared lock and clone out an `Arc`, so descriptors stay
/// valid for the rest of the request even if the registry is mutated
/// concurrently.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a registry from a YAML seed file.
    ///
    /// Validation enforces the alias-uniqueness invariant and rejects
    /// descriptors that could never work (empty alias, secured without a
    /// secret).
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Err(RegistryError::EmptyFile);
        }

        let file: RegistryFile = serde_yaml::from_str(&contents)?;

        let mut services = HashMap::with_capacity(file.services.len());
        for descriptor in file.services {
            if descriptor.path_alias.is_empty() {
                return Err(RegistryError::EmptyAlias(descriptor.name));
            }
            if descriptor.secured && descriptor.secret.is_empty() {
                return Err(RegistryError::MissingSecret(descriptor.path_alias));
            }
            let alias = descriptor.path_alias.clone();
            if services.insert(alias.clone(), Arc::new(descriptor)).is_some() {
                return Err(RegistryError::DuplicateAlias(alias));
            }
        }

        info!(services = services.len(), path = %path.display(), "Registry loaded");

        Ok(Self {
            services: RwLock::new(services),
        })
    }

    /// Insert or replace a descriptor under its alias.
    pub async fn insert(&self, descriptor: ServiceDescriptor) {
        let alias = descriptor.path_alias.clone();
        let mut services = self.services.write().await;
        services.insert(alias, Arc::new(descriptor));
    }

    /// Resolve an alias to its descriptor, if registered and enabled.
    ///
    /// Stamps `last_used` on hit.
    pub async fn resolve(&self, alias: &str) -> Option<Arc<ServiceDescriptor>> {
        let services = self.services.read().await;
        let descriptor = services.get(alias).filter(|d| d.enabled)?.clone();
        drop(services);

        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(-1);
        descriptor.last_used.store(now_millis, Ordering::Relaxed);

        debug!(alias = alias, service = %descriptor.name, "Resolved service");
        Some(descriptor)
    }

    /// Number of registered services (enabled or not).
    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    /// Whether the registry holds no services at all.
    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}
