//! TLS termination for intercepted tunnels and the opt-out upstream verifier.

use crate::ca::CertificateAuthority;
use crate::error::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{DigitallySignedStruct, ServerConfig};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::debug;

/// Upstream verifier used when `insecureSkipVerify` is set.
///
/// # Warning
/// Accepts any certificate. Only for origins with self-signed certificates.
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Resolver that presents one leaf regardless of the hello.
#[derive(Debug)]
struct LeafResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for LeafResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

fn server_config(certified: Arc<CertifiedKey>) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(LeafResolver(certified)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Terminate TLS on a hijacked CONNECT stream.
///
/// The leaf is minted for the SNI name, or for `connect_host` when the client
/// sends none (IP literals). Returns the stream and the host the leaf covers.
pub(crate) async fn accept_intercepted<IO>(
    io: IO,
    ca: Arc<CertificateAuthority>,
    connect_host: &str,
) -> Result<(TlsStream<IO>, String)>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), io)
        .await
        .map_err(|e| Error::proxy(format!("TLS client hello from {connect_host}: {e}")))?;

    let host = start
        .client_hello()
        .server_name()
        .map(str::to_string)
        .unwrap_or_else(|| connect_host.to_string());
    if host.is_empty() {
        return Err(Error::proxy("TLS handshake without a host name"));
    }

    let leaf = {
        let host = host.clone();
        tokio::task::spawn_blocking(move || ca.leaf_for(&host))
            .await
            .map_err(|e| Error::ca(format!("leaf generation task failed: {e}")))??
    };
    debug!("Presenting leaf for {}", leaf.host());

    let stream = start
        .into_stream(server_config(leaf.certified_key()))
        .await
        .map_err(|e| Error::proxy(format!("TLS handshake for {host}: {e}")))?;
    Ok((stream, host))
}
