//! Error types for proxy operations.
//!
//! Every variant maps to the HTTP status the client sees when a request
//! fails before a response is produced:
//! - Bad client input (missing or malformed targets) is a 400
//! - Upstream dial failures and timeouts are a 503
//! - Everything else (issuance, hijacking, relay) is a 500

use crate::authority::CaError;
use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request target could not be resolved to `host:port`.
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    /// TLS error during handshake or configuration.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Leaf certificate issuance failed.
    #[error("Certificate generation failed: {0}")]
    CertGeneration(#[from] CaError),

    /// Connection timeout.
    #[error("Timed out connecting to '{0}'")]
    Timeout(String),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The server connection cannot hand over its raw stream.
    #[error("Connection hijacking is not supported")]
    HijackUnsupported,

    /// Upgrade to tunnel failed.
    #[error("HTTP upgrade failed: {0}")]
    UpgradeFailed(String),

    /// The intercept relay no longer accepts connections.
    #[error("Intercept relay is closed")]
    RelayClosed,

    /// Invalid proxy configuration.
    #[error("Invalid proxy configuration: {0}")]
    Config(String),
}

impl ProxyError {
    /// HTTP status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamConnect { .. } | ProxyError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ProxyError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProxyError::Io(std::io::Error::other(err))
    }
}
