//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `INTERCEPT_PROXY` tag.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for interception logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Proxy started accepting connections.
    SessionStart {
        /// Address the proxy is listening on.
        listen: String,
        /// Whether CONNECT requests are intercepted.
        intercept: bool,
        /// Process ID of the proxy.
        pid: u32,
    },

    /// Proxy stopped.
    SessionEnd {
        /// Duration of the session in seconds.
        duration_sec: u64,
    },

    /// A leaf was issued and the client connection handed to the intercept server.
    Intercept {
        /// Hostname from the CONNECT target.
        host: String,
        /// Port from the CONNECT target.
        port: u16,
        /// Hex serial of the issued leaf.
        serial: String,
    },

    /// Leaf issuance failed for a CONNECT target.
    IssueFailed {
        /// Hostname from the CONNECT target.
        host: String,
        /// Error message.
        error: String,
    },

    /// A blind tunnel was opened.
    Tunnel {
        /// `host:port` of the upstream.
        target: String,
    },

    /// The upstream of a tunnel could not be reached.
    UpstreamUnreachable {
        /// `host:port` of the upstream.
        target: String,
        /// Error message.
        error: String,
    },

    /// A new root CA was written to disk.
    CaCreated {
        /// Certificate path.
        cert_path: String,
        /// Private key path.
        key_path: String,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
