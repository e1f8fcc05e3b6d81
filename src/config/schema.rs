//! Configuration schema definitions.
//!
//! Every scalar is optional in the file format so that a later source only
//! overrides what it actually sets. Accessors on [`Config`] apply defaults
//! and validate.
//!
//! ```toml
//! [proxy]
//! listen = "127.0.0.1:8080"
//! intercept = true
//! connect_timeout_ms = 10000
//! extra_roots = ["/etc/intercept-proxy/internal-ca.pem"]
//!
//! [ca]
//! cert_path = "proxy-ca.crt"
//! key_path = "proxy-ca.key"
//!
//! [logging]
//! level = "info"
//! dump_requests = true
//!
//! [audit]
//! syslog = false
//! ```

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default upstream dial timeout for tunnels, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default CA certificate path.
pub const DEFAULT_CA_CERT: &str = "proxy-ca.crt";

/// Default CA private key path.
pub const DEFAULT_CA_KEY: &str = "proxy-ca.key";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener and forwarding settings.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Root CA locations.
    #[serde(default)]
    pub ca: CaConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Audit settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists (extra_roots) are merged (appended).
    /// Scalars are overridden when set.
    pub fn merge(&mut self, other: Config) {
        self.proxy.merge(other.proxy);
        self.ca.merge(other.ca);
        self.logging.merge(other.logging);
        self.audit.merge(other.audit);
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = self.proxy.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
        listen.parse().map_err(|e| ConfigError::InvalidValue {
            field: "proxy.listen",
            message: format!("'{}': {}", listen, e),
        })
    }

    /// Whether CONNECT requests are intercepted.
    pub fn intercept(&self) -> bool {
        self.proxy.intercept.unwrap_or(true)
    }

    /// Upstream dial timeout for tunnels.
    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        match self.proxy.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS) {
            0 => Err(ConfigError::InvalidValue {
                field: "proxy.connect_timeout_ms",
                message: "must be greater than zero".to_string(),
            }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    /// Extra trust anchor files for upstream TLS.
    pub fn extra_roots(&self) -> &[PathBuf] {
        &self.proxy.extra_roots
    }

    /// CA certificate path.
    pub fn ca_cert_path(&self) -> &Path {
        self.ca
            .cert_path
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_CA_CERT))
    }

    /// CA private key path.
    pub fn ca_key_path(&self) -> &Path {
        self.ca
            .key_path
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_CA_KEY))
    }

    /// Log level: trace, debug, info, warn, error
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Whether request heads are dumped.
    pub fn dump_requests(&self) -> bool {
        self.logging.dump_requests.unwrap_or(true)
    }

    /// Whether audit events go to syslog.
    pub fn syslog_audit(&self) -> bool {
        self.audit.syslog.unwrap_or(false)
    }
}

/// Listener and forwarding settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// Address to listen on.
    #[serde(default)]
    pub listen: Option<String>,

    /// Whether CONNECT requests are intercepted.
    #[serde(default)]
    pub intercept: Option<bool>,

    /// Upstream dial timeout for tunnels in milliseconds.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// PEM files with additional trust anchors for upstream TLS.
    #[serde(default)]
    pub extra_roots: Vec<PathBuf>,
}

impl ProxySettings {
    fn merge(&mut self, other: ProxySettings) {
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.intercept.is_some() {
            self.intercept = other.intercept;
        }
        if other.connect_timeout_ms.is_some() {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        self.extra_roots.extend(other.extra_roots);
    }
}

/// Root CA locations.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CaConfig {
    /// CA certificate path.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// CA private key path.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl CaConfig {
    fn merge(&mut self, other: CaConfig) {
        if other.cert_path.is_some() {
            self.cert_path = other.cert_path;
        }
        if other.key_path.is_some() {
            self.key_path = other.key_path;
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level when no `-v` flag or `RUST_LOG` is given.
    #[serde(default)]
    pub level: Option<String>,

    /// Whether request heads are dumped.
    #[serde(default)]
    pub dump_requests: Option<bool>,
}

impl LoggingConfig {
    fn merge(&mut self, other: LoggingConfig) {
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.dump_requests.is_some() {
            self.dump_requests = other.dump_requests;
        }
    }
}

/// Audit settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Send audit events to the local syslog daemon.
    #[serde(default)]
    pub syslog: Option<bool>,
}

impl AuditConfig {
    fn merge(&mut self, other: AuditConfig) {
        if other.syslog.is_some() {
            self.syslog = other.syslog;
        }
    }
}
