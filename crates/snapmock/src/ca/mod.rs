//! Root CA management and per-host certificate minting for TLS interception.
//!
//! The root certificate and key live in two PEM files. Leaf certificates
//! are generated on first use for a host and cached for the lifetime of the
//! [`CertificateAuthority`]; with `leafCacheDir` configured they are also
//! persisted and reused across runs.

mod leaf;

pub use leaf::LeafCertificate;

use crate::config::CaConfig;
use crate::error::{Error, Result};
use leaf::{first_cert, write_private, LeafDiskCache};
use parking_lot::RwLock;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

const ROOT_COMMON_NAME: &str = "snapmock Root CA";
const ROOT_ORGANIZATION: &str = "snapmock";
const ROOT_TTL_DAYS: i64 = 3650;

struct Root {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    verifier: Arc<WebPkiServerVerifier>,
}

impl Root {
    /// Whether `leaf` chains to this root and is currently valid for its host
    fn issued(&self, leaf: &LeafCertificate) -> bool {
        let Ok(name) = ServerName::try_from(leaf.host().to_string()) else {
            return false;
        };
        self.verifier
            .verify_server_cert(leaf.cert_der(), &[], &name, &[], UnixTime::now())
            .is_ok()
    }
}

pub struct CertificateAuthority {
    config: CaConfig,
    root: RwLock<Option<Arc<Root>>>,
    /// host -> leaf, filled on first use
    leaves: RwLock<HashMap<String, Arc<LeafCertificate>>>,
    disk_cache: Option<LeafDiskCache>,
}

impl CertificateAuthority {
    /// A manager with no root loaded yet
    pub fn new(config: CaConfig) -> Self {
        let disk_cache = config.leaf_cache_dir.as_ref().map(LeafDiskCache::new);
        Self {
            config,
            root: RwLock::new(None),
            leaves: RwLock::new(HashMap::new()),
            disk_cache,
        }
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.root.read().is_some()
    }

    /// Load the root if both files exist, otherwise generate and persist one.
    ///
    /// Only one of the two files existing is an error rather than a reason to
    /// overwrite it.
    pub fn ensure(&self) -> Result<()> {
        let cert_exists = self.config.cert_path.exists();
        let key_exists = self.config.key_path.exists();
        match (cert_exists, key_exists) {
            (true, true) => self.load(),
            (false, false) => self.generate(),
            _ => Err(Error::ca(format!(
                "incomplete CA material: expected both {} and {}",
                self.config.cert_path.display(),
                self.config.key_path.display()
            ))),
        }
    }

    /// Create a new root, overwriting any existing one.
    ///
    /// Previously minted leaves are discarded, including any on disk.
    pub fn generate(&self) -> Result<()> {
        let (cert_pem, key_pem) = generate_root()?;

        for path in [&self.config.cert_path, &self.config.key_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::ca(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        fs::write(&self.config.cert_path, &cert_pem).map_err(|e| {
            Error::ca(format!(
                "cannot write {}: {e}",
                self.config.cert_path.display()
            ))
        })?;
        write_private(&self.config.key_path, key_pem.as_bytes())
            .map_err(|e| Error::ca(e.to_string()))?;

        let root = parse_root(&cert_pem, &key_pem)?;
        self.install(root)?;
        info!("Generated new root CA at {:?}", self.config.cert_path);
        Ok(())
    }

    /// Read existing root material only; never creates a CA.
    pub fn load(&self) -> Result<()> {
        let cert_pem = read_pem(&self.config.cert_path)?;
        let key_pem = read_pem(&self.config.key_path)?;
        let root = parse_root(&cert_pem, &key_pem)?;
        *self.root.write() = Some(Arc::new(root));
        self.leaves.write().clear();
        info!("Loaded root CA from {:?}", self.config.cert_path);
        Ok(())
    }

    /// Certificate for `host` signed by the root, generated on first use.
    ///
    /// Disk-cached leaves are reused only if they chain to the loaded root.
    pub fn leaf_for(&self, host: &str) -> Result<Arc<LeafCertificate>> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(Error::ca("cannot issue a certificate without a host name"));
        }
        if let Some(leaf) = self.leaves.read().get(&host) {
            return Ok(leaf.clone());
        }

        let root = self.root()?;
        let cached = self.disk_cache.as_ref().and_then(|c| c.load(&host));
        let (leaf, fresh) = match cached {
            Some(leaf) if root.issued(&leaf) => (leaf, false),
            stale => {
                if stale.is_some() {
                    warn!("Cached leaf for {} does not chain to the current root; reissuing", host);
                }
                let leaf = LeafCertificate::generate(&host, &root.issuer)?;
                debug!("Issued leaf certificate for {}", host);
                (leaf, true)
            }
        };

        // Key generation runs unlocked; the first insert for a host wins
        let leaf = match self.leaves.write().entry(host) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot.insert(Arc::new(leaf)).clone(),
        };
        if fresh {
            if let Some(cache) = &self.disk_cache {
                cache.store(&leaf)?;
            }
        }
        Ok(leaf)
    }

    /// Root certificate as PEM, for trust installation
    pub fn ca_cert_pem(&self) -> Result<String> {
        Ok(self.root()?.cert_pem.clone())
    }

    pub fn root_cert_der(&self) -> Result<CertificateDer<'static>> {
        Ok(self.root()?.cert_der.clone())
    }

    fn root(&self) -> Result<Arc<Root>> {
        self.root
            .read()
            .clone()
            .ok_or_else(|| Error::ca("no root CA loaded"))
    }

    fn install(&self, root: Root) -> Result<()> {
        *self.root.write() = Some(Arc::new(root));
        self.leaves.write().clear();
        if let Some(cache) = &self.disk_cache {
            cache.clear()?;
        }
        Ok(())
    }
}

fn generate_root() -> Result<(String, String)> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, ROOT_COMMON_NAME);
    dn.push(DnType::OrganizationName, ROOT_ORGANIZATION);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::minutes(1);
    params.not_after = now + Duration::days(ROOT_TTL_DAYS);

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::ca(format!("failed to generate root key: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::ca(format!("failed to self-sign root: {e}")))?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn parse_root(cert_pem: &str, key_pem: &str) -> Result<Root> {
    let key_pair = KeyPair::from_pem(key_pem)
        .map_err(|e| Error::ca(format!("failed to parse root key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
        .map_err(|e| Error::ca(format!("failed to parse root certificate: {e}")))?;
    let cert_der = first_cert(cert_pem)?;
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(cert_der.clone())
        .map_err(|e| Error::ca(format!("root certificate is not a usable trust anchor: {e}")))?;
    let verifier = WebPkiServerVerifier::builder_with_provider(
        Arc::new(roots),
        Arc::new(rustls::crypto::ring::default_provider()),
    )
    .build()
    .map_err(|e| Error::ca(format!("failed to build root verifier: {e}")))?;
    Ok(Root {
        issuer,
        cert_pem: cert_pem.to_string(),
        cert_der,
        verifier,
    })
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ca(format!("root CA not found at {}", path.display()))
        } else {
            Error::ca(format!("cannot read {}: {e}", path.display()))
        }
    })
}

/// Lowercase, without brackets or a trailing dot
fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ca_in(tmp: &TempDir) -> CertificateAuthority {
        CertificateAuthority::new(CaConfig::in_dir(tmp.path().join("ca")))
    }

    fn verify_chain(ca: &CertificateAuthority, leaf: &LeafCertificate, host: &str) {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(ca.root_cert_der().unwrap()).unwrap();
        let verifier = WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()
        .unwrap();
        let name = ServerName::try_from(host.to_string()).unwrap();
        verifier
            .verify_server_cert(leaf.cert_der(), &[], &name, &[], UnixTime::now())
            .unwrap();
    }

    #[test]
    fn test_ensure_generates_then_loads() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        assert!(ca.config().cert_path.exists());
        assert!(ca.config().key_path.exists());
        let pem = ca.ca_cert_pem().unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));

        let again = ca_in(&tmp);
        again.ensure().unwrap();
        assert_eq!(again.ca_cert_pem().unwrap(), pem);
    }

    #[test]
    fn test_load_never_creates() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        assert!(matches!(ca.load(), Err(Error::Ca(_))));
        assert!(!ca.config().cert_path.exists());
        assert!(ca.ca_cert_pem().is_err());
        assert!(ca.leaf_for("example.com").is_err());
    }

    #[test]
    fn test_corrupt_material_is_ca_error() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        fs::write(&ca.config().key_path, "garbage").unwrap();
        assert!(matches!(ca_in(&tmp).ensure(), Err(Error::Ca(_))));
    }

    #[test]
    fn test_incomplete_material_is_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        fs::remove_file(&ca.config().key_path).unwrap();
        let before = fs::read_to_string(&ca.config().cert_path).unwrap();
        assert!(ca_in(&tmp).ensure().is_err());
        assert_eq!(fs::read_to_string(&ca.config().cert_path).unwrap(), before);
    }

    #[test]
    fn test_leaf_is_cached_per_host() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();

        let a1 = ca.leaf_for("api.example.com").unwrap();
        let a2 = ca.leaf_for("API.example.com").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.cert_der(), a2.cert_der());
        assert_eq!(a1.key_pem(), a2.key_pem());

        let b = ca.leaf_for("cdn.example.com").unwrap();
        assert_ne!(a1.cert_der(), b.cert_der());
    }

    #[test]
    fn test_leaves_chain_to_root() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        for host in ["api.example.com", "cdn.example.com"] {
            let leaf = ca.leaf_for(host).unwrap();
            verify_chain(&ca, &leaf, host);
        }
    }

    #[test]
    fn test_ip_host() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        let leaf = ca.leaf_for("127.0.0.1").unwrap();
        verify_chain(&ca, &leaf, "127.0.0.1");
    }

    #[test]
    fn test_generate_replaces_root_and_drops_leaves() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        let old_pem = ca.ca_cert_pem().unwrap();
        let old_leaf = ca.leaf_for("example.com").unwrap();

        ca.generate().unwrap();
        assert_ne!(ca.ca_cert_pem().unwrap(), old_pem);
        let new_leaf = ca.leaf_for("example.com").unwrap();
        assert!(!Arc::ptr_eq(&old_leaf, &new_leaf));
        verify_chain(&ca, &new_leaf, "example.com");
    }

    #[test]
    fn test_leaf_disk_cache_survives_restart() {
        let tmp = TempDir::new().unwrap();
        let config = CaConfig {
            leaf_cache_dir: Some(tmp.path().join("leaves")),
            ..CaConfig::in_dir(tmp.path().join("ca"))
        };
        let first = CertificateAuthority::new(config.clone());
        first.ensure().unwrap();
        let leaf = first.leaf_for("example.com").unwrap();
        assert!(tmp.path().join("leaves").join("example.com.pem").is_file());

        let second = CertificateAuthority::new(config);
        second.ensure().unwrap();
        let reloaded = second.leaf_for("example.com").unwrap();
        assert_eq!(reloaded.cert_pem(), leaf.cert_pem());

        second.generate().unwrap();
        assert!(!tmp.path().join("leaves").exists());
    }

    #[test]
    fn test_disk_leaf_from_another_root_is_reissued() {
        let tmp = TempDir::new().unwrap();
        let shared = tmp.path().join("leaves");
        let with_cache = |dir: &str| CaConfig {
            leaf_cache_dir: Some(shared.clone()),
            ..CaConfig::in_dir(tmp.path().join(dir))
        };

        let a = CertificateAuthority::new(with_cache("a"));
        a.ensure().unwrap();
        let from_a = a.leaf_for("api.test").unwrap();

        CertificateAuthority::new(CaConfig::in_dir(tmp.path().join("b")))
            .generate()
            .unwrap();
        let b = CertificateAuthority::new(with_cache("b"));
        b.load().unwrap();
        let from_b = b.leaf_for("api.test").unwrap();
        assert_ne!(from_b.cert_pem(), from_a.cert_pem());
        verify_chain(&b, &from_b, "api.test");

        // The replacement is what the cache now holds
        let b_again = CertificateAuthority::new(with_cache("b"));
        b_again.load().unwrap();
        assert_eq!(b_again.leaf_for("api.test").unwrap().cert_pem(), from_b.cert_pem());
    }

    #[test]
    fn test_concurrent_first_use_yields_one_leaf() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        let leaves: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| ca.leaf_for("busy.test").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(leaves.iter().all(|leaf| Arc::ptr_eq(leaf, &leaves[0])));
    }

    #[test]
    fn test_empty_host_rejected() {
        let tmp = TempDir::new().unwrap();
        let ca = ca_in(&tmp);
        ca.ensure().unwrap();
        assert!(ca.leaf_for("").is_err());
    }
}
