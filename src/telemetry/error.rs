//! Telemetry error types.

use thiserror::Error;

/// Errors raised while setting up audit logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The local syslog daemon could not be reached.
    #[error("Cannot reach local syslog daemon: {0}")]
    SyslogUnavailable(String),
}
