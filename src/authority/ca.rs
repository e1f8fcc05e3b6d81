//! Root CA material for TLS interception.
//!
//! The proxy signs a fresh leaf for every intercepted host with a long-lived
//! root CA that clients have been told to trust. This module loads that CA
//! from PEM files and can create a new one on disk.
//!
//! # Security Model
//!
//! - The CA private key is written with 0600 permissions
//! - Existing CA files are never overwritten unless explicitly forced
//! - The loaded key stays in memory and is only used for signing leaves
//!
//! # Example
//!
//! ```ignore
//! use intercept_proxy::authority::{create_ca, CaContext};
//!
//! create_ca(Path::new("proxy-ca.crt"), Path::new("proxy-ca.key"), false)?;
//! let ca = CaContext::load(Path::new("proxy-ca.crt"), Path::new("proxy-ca.key"))?;
//! ```

use super::error::CaError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};
use rustls_pki_types::CertificateDer;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Validity period of a newly created root CA (10 years).
const CA_VALIDITY_DAYS: i64 = 3650;

/// Subject common name used for newly created root CAs.
pub const CA_COMMON_NAME: &str = "intercept-proxy CA";

/// A loaded root CA, ready to sign leaf certificates.
///
/// Read-only after construction; share it behind an `Arc`.
pub struct CaContext {
    issuer: Issuer<'static, KeyPair>,
    certificate: CertificateDer<'static>,
    cert_pem: String,
}

/// PEM-encoded material of a freshly generated root CA.
pub struct CaMaterial {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
}

impl CaContext {
    /// Load the CA certificate and private key from PEM files.
    ///
    /// # Errors
    ///
    /// Returns error if either file is unreadable or does not hold valid PEM.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|source| CaError::ReadFile {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let key_pem = fs::read_to_string(key_path).map_err(|source| CaError::ReadFile {
            path: key_path.to_path_buf(),
            source,
        })?;

        let ca = Self::from_pem(&cert_pem, &key_pem)?;
        info!("Loaded CA certificate from {:?}", cert_path);
        Ok(ca)
    }

    /// Build a CA from PEM strings.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Parse(format!("private key: {e}")))?;

        let certificate = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate found in PEM".to_string()))?
            .map_err(|e| CaError::Parse(format!("certificate: {e}")))?;

        let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| CaError::Parse(format!("certificate: {e}")))?;

        Ok(Self {
            issuer,
            certificate,
            cert_pem: cert_pem.to_string(),
        })
    }

    /// Generate a throwaway in-memory CA.
    pub fn generate() -> Result<Self, CaError> {
        let material = generate_ca_material()?;
        Self::from_pem(&material.cert_pem, &material.key_pem)
    }

    /// The signing identity used for leaf certificates.
    pub fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }

    /// DER-encoded CA certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// PEM-encoded CA certificate.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }
}

/// Generate a self-signed root CA using ECDSA P-384.
pub fn generate_ca_material() -> Result<CaMaterial, CaError> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
        .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(CA_COMMON_NAME.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("intercept-proxy".to_string()),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::minutes(5);
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CaError::CertGeneration(e.to_string()))?;

    Ok(CaMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Create a new root CA and write it to `cert_path` and `key_path`.
///
/// The key file is created with 0600 permissions. Existing files are left
/// untouched unless `overwrite` is set.
///
/// # Errors
///
/// Returns error if:
/// - Either file already exists and `overwrite` is false
/// - Key or certificate generation fails
/// - File write fails
pub fn create_ca(cert_path: &Path, key_path: &Path, overwrite: bool) -> Result<CaContext, CaError> {
    if !overwrite {
        for path in [cert_path, key_path] {
            if path.exists() {
                return Err(CaError::AlreadyExists(path.to_path_buf()));
            }
        }
    }

    info!("Generating root CA certificate");
    let material = generate_ca_material()?;

    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(CaError::WriteFile)?;
        }
    }

    fs::write(cert_path, &material.cert_pem).map_err(CaError::WriteFile)?;
    write_restricted_file(key_path, &material.key_pem)?;

    debug!("Root CA written: cert={:?}, key={:?}", cert_path, key_path);

    CaContext::from_pem(&material.cert_pem, &material.key_pem)
}

/// Write a file with restricted permissions (0600).
fn write_restricted_file(path: &Path, content: &str) -> Result<(), CaError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(CaError::WriteFile)?;

    file.write_all(content.as_bytes())
        .map_err(CaError::WriteFile)?;

    Ok(())
}
