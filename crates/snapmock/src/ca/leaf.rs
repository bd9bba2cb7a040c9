//! Per-host leaf certificates.

use crate::error::{Error, Result};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

/// Leaf validity; comfortably longer than any capture session
const LEAF_TTL_DAYS: i64 = 397;
/// Backdate `not_before` to tolerate client clock skew
const NOT_BEFORE_SKEW_SECS: i64 = 60;

/// A host certificate signed by the root, ready for a TLS handshake.
pub struct LeafCertificate {
    host: String,
    cert_pem: String,
    key_pem: String,
    certified: Arc<CertifiedKey>,
}

impl LeafCertificate {
    pub(crate) fn generate(host: &str, issuer: &Issuer<'static, KeyPair>) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.serial_number = Some(random_serial());

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;
        params.subject_alt_names = subject_alt_names(host)?;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::seconds(NOT_BEFORE_SKEW_SECS);
        params.not_after = now + Duration::days(LEAF_TTL_DAYS);

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::ca(format!("failed to generate key for {host}: {e}")))?;
        let cert = params
            .signed_by(&key_pair, issuer)
            .map_err(|e| Error::ca(format!("failed to sign certificate for {host}: {e}")))?;

        Self::from_pem(host, cert.pem(), key_pair.serialize_pem())
    }

    pub(crate) fn from_pem(host: &str, cert_pem: String, key_pem: String) -> Result<Self> {
        let cert_der = first_cert(&cert_pem)?;
        let key_der = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| Error::ca(format!("failed to parse key for {host}: {e}")))?
            .ok_or_else(|| Error::ca(format!("no private key found for {host}")))?;
        let signer = rustls::crypto::ring::sign::any_supported_type(&key_der)
            .map_err(|e| Error::ca(format!("unsupported key for {host}: {e}")))?;

        Ok(Self {
            host: host.to_string(),
            cert_pem,
            key_pem,
            certified: Arc::new(CertifiedKey::new(vec![cert_der], signer)),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.certified.cert[0]
    }

    /// DER private key, for building a server config outside the proxy
    pub fn key_der(&self) -> Result<PrivateKeyDer<'static>> {
        rustls_pemfile::private_key(&mut self.key_pem.as_bytes())
            .map_err(|e| Error::ca(format!("failed to parse key for {}: {e}", self.host)))?
            .ok_or_else(|| Error::ca(format!("no private key found for {}", self.host)))
    }

    /// Signing material for `rustls`
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }
}

/// On-disk leaf cache: one `<host>.pem` file holding cert then key.
pub(crate) struct LeafDiskCache {
    dir: PathBuf,
}

impl LeafDiskCache {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn load(&self, host: &str) -> Option<LeafCertificate> {
        let path = self.path_for(host);
        let pem = fs::read_to_string(&path).ok()?;
        let (cert_pem, key_pem) = split_bundle(&pem)?;
        match LeafCertificate::from_pem(host, cert_pem, key_pem) {
            Ok(leaf) => {
                debug!("Reusing cached leaf for {} from {:?}", host, path);
                Some(leaf)
            }
            Err(e) => {
                warn!("Ignoring unusable cached leaf {:?}: {}", path, e);
                None
            }
        }
    }

    pub(crate) fn store(&self, leaf: &LeafCertificate) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::store(&self.dir, e))?;
        let path = self.path_for(leaf.host());
        let bundle = format!("{}{}", leaf.cert_pem(), leaf.key_pem());
        write_private(&path, bundle.as_bytes())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store(&self.dir, e)),
        }
    }

    fn path_for(&self, host: &str) -> PathBuf {
        self.dir
            .join(format!("{}.pem", crate::recording::host_dir_name(host)))
    }
}

/// Write a file readable only by the owner where the platform supports it.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| Error::store(path, e))?;
        file.write_all(contents).map_err(|e| Error::store(path, e))
    }
    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| Error::store(path, e))
    }
}

pub(crate) fn first_cert(pem: &str) -> Result<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| Error::ca("no certificate found in PEM"))?
        .map_err(|e| Error::ca(format!("failed to parse certificate PEM: {e}")))
}

fn split_bundle(pem: &str) -> Option<(String, String)> {
    let marker = "-----END CERTIFICATE-----";
    let end = pem.find(marker)? + marker.len();
    let (cert, key) = pem.split_at(end);
    let cert = format!("{}\n", cert.trim_end());
    let key = key.trim_start().to_string();
    if key.is_empty() {
        return None;
    }
    Some((cert, key))
}

fn subject_alt_names(host: &str) -> Result<Vec<SanType>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SanType::IpAddress(ip)]);
    }
    let name = host
        .try_into()
        .map_err(|_| Error::ca(format!("invalid host name for certificate: {host}")))?;
    Ok(vec![SanType::DnsName(name)])
}

fn random_serial() -> SerialNumber {
    let (hi, _) = uuid::Uuid::new_v4().as_u64_pair();
    // Keep the DER integer positive
    SerialNumber::from(hi >> 1)
}
