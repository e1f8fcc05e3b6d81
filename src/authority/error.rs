//! Error types for the certificate authority.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from CA loading, creation and leaf issuance.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to read a CA file from disk.
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// CA certificate or key material could not be parsed.
    #[error("Failed to parse CA material: {0}")]
    Parse(String),

    /// Failed to generate key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Failed to sign certificate.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// The OS random source failed to produce a serial number.
    #[error("Failed to generate serial number: {0}")]
    SerialNumber(String),

    /// Hostname is empty or not usable as a subject name.
    #[error("Invalid hostname '{0}'")]
    InvalidHostname(String),

    /// Issued material was rejected by the TLS stack.
    #[error("Failed to build TLS configuration: {0}")]
    TlsConfig(String),

    /// Refusing to overwrite existing CA files.
    #[error("Refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),

    /// Failed to write certificate or key file.
    #[error("Failed to write file: {0}")]
    WriteFile(#[source] std::io::Error),
}
