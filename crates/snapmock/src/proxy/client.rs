//! Shared upstream HTTP client.

use super::tls::NoVerifier;
use crate::config::UpstreamConfig;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pooled client used for every forwarded request.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Create the upstream client with connection pooling.
///
/// Origins are verified against the platform trust store unless
/// `insecure_skip_verify` is set. A host without native roots gets an empty
/// store, so plain HTTP keeps working and HTTPS origins fail per request.
pub fn create_http_client(config: &UpstreamConfig) -> HttpClient {
    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false);

    let builder = hyper_rustls::HttpsConnectorBuilder::new();
    let https_connector = if config.insecure_skip_verify {
        warn!("Upstream TLS certificate verification DISABLED (development/testing only)");
        builder
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        match builder.with_native_roots() {
            Ok(builder) => builder.https_or_http().enable_http1().wrap_connector(http_connector),
            Err(e) => {
                warn!("No native root certificates ({e}); HTTPS origins will fail verification");
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(
                        rustls::ClientConfig::builder()
                            .with_root_certificates(rustls::RootCertStore::empty())
                            .with_no_client_auth(),
                    )
                    .https_or_http()
                    .enable_http1()
                    .wrap_connector(http_connector)
            }
        }
    };

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build(https_connector);

    info!(
        "Upstream pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, connect_timeout={}s",
        config.max_idle_per_host, config.idle_timeout_secs, config.connect_timeout_secs
    );

    client
}
