//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading, parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read, or an explicitly
    /// requested file is missing.
    #[error("Cannot read config file {path}: {source}")]
    ReadError {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config file is not valid TOML for the schema.
    #[error("Cannot parse config file {path}: {source}")]
    ParseError {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A setting parsed but holds an unusable value.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted key of the setting, e.g. `proxy.listen`.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}
