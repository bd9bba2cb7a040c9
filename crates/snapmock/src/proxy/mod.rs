//! Intercepting capture proxy.
//!
//! # Module Structure
//!
//! - `server` - ProxySession, ProxyHandle and the accept loop
//! - `handler` - CONNECT interception and request dispatch
//! - `forwarding` - upstream relay and exchange capture
//! - `client` - pooled upstream client
//! - `tls` - leaf-presenting TLS acceptor and the opt-out upstream verifier
//! - `headers` - hop-by-hop handling

mod client;
mod context;
mod forwarding;
mod handler;
pub(crate) mod headers;
mod server;
mod tls;

pub use client::{create_http_client, HttpClient};
pub use context::CaptureStats;
pub use handler::CA_DOWNLOAD_HOST;
pub use headers::is_hop_by_hop;
pub use server::{ProxyHandle, ProxySession};
pub use tls::NoVerifier;
