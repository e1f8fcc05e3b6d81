//! Per-host leaf certificate issuance.

use super::ca::CaContext;
use super::error::CaError;
use super::serial::{SERIAL_LEN, random_serial};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, RsaKeySize, SanType, SerialNumber,
};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, DnsName, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::IpAddr;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// How long an issued leaf stays valid.
pub const LEAF_VALIDITY: Duration = Duration::days(30);

/// Backdating applied to `not_before` to absorb client clock skew.
pub const CLOCK_SKEW: Duration = Duration::seconds(300);

/// Signs short-lived leaf certificates with a shared [`CaContext`].
///
/// Cheap to clone. Issuance does RSA key generation and is CPU bound, so async
/// callers should run it on a blocking thread.
#[derive(Clone)]
pub struct LeafIssuer {
    ca: Arc<CaContext>,
}

/// A freshly minted leaf and the TLS server configuration that presents it.
///
/// The private key lives only inside the server configuration.
pub struct IssuedLeaf {
    hostname: String,
    serial: [u8; SERIAL_LEN],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    chain: Vec<CertificateDer<'static>>,
    server_config: Arc<ServerConfig>,
}

impl LeafIssuer {
    /// Create an issuer backed by `ca`.
    pub fn new(ca: Arc<CaContext>) -> Self {
        Self { ca }
    }

    /// The CA this issuer signs with.
    pub fn ca(&self) -> &CaContext {
        &self.ca
    }

    /// Issue a leaf for `hostname` valid from now.
    pub fn issue(&self, hostname: &str) -> Result<IssuedLeaf, CaError> {
        self.issue_at(hostname, OffsetDateTime::now_utc())
    }

    /// Issue a leaf for `hostname` as if the current time were `now`.
    ///
    /// The leaf is valid from `now - CLOCK_SKEW` through `now + LEAF_VALIDITY`,
    /// carries a fresh RSA-2048 key and a random 128-bit serial, and is served
    /// with the chain `[leaf, ca]`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `hostname` is empty or not a valid DNS name or IP literal
    /// - The random source or key generation fails
    /// - Signing fails
    pub fn issue_at(&self, hostname: &str, now: OffsetDateTime) -> Result<IssuedLeaf, CaError> {
        let san = subject_alt_name(hostname)?;
        let serial = random_serial()?;

        let key_pair = KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_2048)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));
        params.distinguished_name = dn;
        params.subject_alt_names = vec![san];

        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;

        let not_before = now - CLOCK_SKEW;
        let not_after = now + LEAF_VALIDITY;
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params
            .signed_by(&key_pair, self.ca.issuer())
            .map_err(|e| CaError::Signing(e.to_string()))?;

        let chain = vec![cert.der().clone(), self.ca.certificate().clone()];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain.clone(), key)
            .map_err(|e| CaError::TlsConfig(e.to_string()))?;

        // The intercept server speaks HTTP/1.1 only. Advertising h2 here would
        // make clients open a connection that hyper's http1 server cannot read.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        debug!("Issued leaf certificate for {}", hostname);

        Ok(IssuedLeaf {
            hostname: hostname.to_string(),
            serial,
            not_before,
            not_after,
            chain,
            server_config: Arc::new(config),
        })
    }
}

impl IssuedLeaf {
    /// Hostname the leaf was issued for.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Raw serial number bytes.
    pub fn serial(&self) -> &[u8; SERIAL_LEN] {
        &self.serial
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// DER-encoded leaf certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    /// Certificate chain presented to clients, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// TLS server configuration presenting this leaf.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

/// Map a hostname to the SAN entry clients will match against.
fn subject_alt_name(hostname: &str) -> Result<SanType, CaError> {
    if hostname.is_empty() {
        return Err(CaError::InvalidHostname(hostname.to_string()));
    }

    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }

    let invalid = || CaError::InvalidHostname(hostname.to_string());

    // DnsName decides which names are accepted; Ia5String only checks the charset.
    DnsName::try_from(hostname).map_err(|_| invalid())?;
    let name = hostname.try_into().map_err(|_| invalid())?;
    Ok(SanType::DnsName(name))
}
