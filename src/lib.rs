//! tokengate - authorizing reverse proxy with opportunistic token issuance.
//!
//! tokengate sits in front of a set of registered backend services. The first
//! path segment of every inbound request (the *alias*) selects a backend; the
//! request is then gated on that backend's symmetric secret before being
//! forwarded. Backends can ask the proxy to mint a short-lived signed token on
//! their behalf by attaching reserved `X-Proxy-Token-*` headers to a response.
//!
//! # Request Flow
//!
//! ```text
//! client ──► router (alias split) ──► registry lookup ──► authorization gate
//!                                                               │ allow
//!                                                               ▼
//! client ◄── token issuance gate ◄── upstream response ◄── forwarding client
//! ```
//!
//! The authorization gate and the issuance gate are pure functions of the
//! request/response plus a read-only service descriptor; everything stateful
//! (registry, connection pool) lives outside them.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway_service;
pub mod logging_layer;
pub mod registry;
pub mod router;
pub mod server;
