//! Certificate authority for the MITM transport.
//!
//! Loads a long-lived CA keypair from disk (generating one on first run),
//! and mints short-lived ECDSA P-256 leaf certificates for arbitrary
//! hostnames on demand, memoizing them in a concurrent per-hostname cache.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{debug, info};

const CA_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to read CA file {path}: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CA PEM: {0}")]
    BadPem(#[from] rcgen::Error),
    #[error("failed to parse CA private key: {0}")]
    BadKey(String),
    #[error("certificate generation failed: {0}")]
    CryptoError(String),
}

/// A DER-encoded leaf certificate and its private key, ready to hand to a
/// `rustls::ServerConfig`.
#[derive(Clone)]
pub struct LeafCertificate {
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

impl LeafCertificate {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// Signs leaf certificates on demand and caches them by hostname.
pub struct CertificateAuthority {
    ca_cert: Certificate,
    ca_keypair: KeyPair,
    ca_cert_pem: String,
    cache: RwLock<HashMap<String, Arc<LeafCertificate>>>,
}

impl CertificateAuthority {
    /// Load the CA from `cert_path`/`key_path`, generating and persisting a
    /// fresh self-signed CA if neither file exists yet.
    pub async fn load_or_create(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        if cert_path.exists() && key_path.exists() {
            info!(?cert_path, "loading existing CA");
            Self::load(cert_path, key_path).await
        } else {
            info!(?cert_path, "no CA found, generating a new one");
            Self::create(cert_path, key_path).await
        }
    }

    /// Load an existing CA; accepts both PKCS#1 and PKCS#8 private keys via
    /// `rcgen::KeyPair::from_pem`, which auto-detects the PEM block type.
    pub async fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem =
            tokio::fs::read_to_string(cert_path)
                .await
                .map_err(|source| CaError::MissingFile {
                    path: cert_path.to_path_buf(),
                    source,
                })?;
        let key_pem =
            tokio::fs::read_to_string(key_path)
                .await
                .map_err(|source| CaError::MissingFile {
                    path: key_path.to_path_buf(),
                    source,
                })?;

        let ca_keypair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaError::BadKey(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
        let ca_cert = params.self_signed(&ca_keypair)?;

        Ok(Self {
            ca_cert,
            ca_keypair,
            ca_cert_pem: cert_pem,
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn create(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        if let Some(parent) = cert_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CaError::MissingFile {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let ca_keypair = KeyPair::generate().map_err(|e| CaError::CryptoError(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "mitmkit local CA");
        dn.push(DnType::OrganizationName, "mitmkit");
        params.distinguished_name = dn;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(CA_VALIDITY_DAYS);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let ca_cert = params
            .self_signed(&ca_keypair)
            .map_err(|e| CaError::CryptoError(e.to_string()))?;

        let ca_cert_pem = ca_cert.pem();
        let ca_key_pem = ca_keypair.serialize_pem();

        tokio::fs::write(cert_path, &ca_cert_pem)
            .await
            .map_err(|source| CaError::MissingFile {
                path: cert_path.to_path_buf(),
                source,
            })?;
        tokio::fs::write(key_path, &ca_key_pem)
            .await
            .map_err(|source| CaError::MissingFile {
                path: key_path.to_path_buf(),
                source,
            })?;

        info!(?cert_path, "wrote new CA certificate; trust it on clients");

        Ok(Self {
            ca_cert,
            ca_keypair,
            ca_cert_pem,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// PEM-encoded CA certificate, for distribution/trust installation.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Get or mint a leaf certificate for `hostname`, caching by hostname
    /// for the process lifetime.
    pub async fn issue_leaf(&self, hostname: &str) -> Result<Arc<LeafCertificate>, CaError> {
        {
            let cache = self.cache.read().await;
            if let Some(cert) = cache.get(hostname) {
                debug!(hostname, "using cached leaf certificate");
                return Ok(cert.clone());
            }
        }

        debug!(hostname, "issuing leaf certificate");
        let leaf = Arc::new(self.generate_leaf(hostname)?);

        let mut cache = self.cache.write().await;
        let leaf = cache.entry(hostname.to_string()).or_insert(leaf).clone();
        Ok(leaf)
    }

    fn generate_leaf(&self, hostname: &str) -> Result<LeafCertificate, CaError> {
        let leaf_keypair = KeyPair::generate().map_err(|e| CaError::CryptoError(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;

        params.subject_alt_names = vec![SanType::DnsName(
            hostname
                .to_string()
                .try_into()
                .map_err(|_| CaError::CryptoError(format!("invalid hostname: {hostname}")))?,
        )];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;

        let leaf_cert = params
            .signed_by(&leaf_keypair, &self.ca_cert, &self.ca_keypair)
            .map_err(|e| CaError::CryptoError(e.to_string()))?;

        Ok(LeafCertificate {
            cert_der: leaf_cert.der().clone(),
            key_der: leaf_keypair.serialize_der(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.crt");
        let key_path = dir.path().join("ca.key");

        let ca = CertificateAuthority::load_or_create(&cert_path, &key_path)
            .await
            .unwrap();
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));

        let reloaded = CertificateAuthority::load_or_create(&cert_path, &key_path)
            .await
            .unwrap();
        assert_eq!(reloaded.ca_cert_pem(), ca.ca_cert_pem());
    }

    #[tokio::test]
    async fn issue_leaf_caches_by_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(
            &dir.path().join("ca.crt"),
            &dir.path().join("ca.key"),
        )
        .await
        .unwrap();

        let leaf1 = ca.issue_leaf("example.test").await.unwrap();
        let leaf2 = ca.issue_leaf("example.test").await.unwrap();
        assert_eq!(leaf1.cert_der, leaf2.cert_der);

        let other = ca.issue_leaf("other.test").await.unwrap();
        assert_ne!(leaf1.cert_der, other.cert_der);
    }
}
