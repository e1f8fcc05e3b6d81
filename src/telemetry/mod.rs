//! Telemetry, audit logging and request dumps for intercept-proxy.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): Interception events go to syslog as JSON
//! - **Debug logging** (tracing): Operational logs go to stderr via `tracing`
//! - **Request dumps** (tracing): Incoming request heads, on their own target
//!
//! The audit logger is created once at startup and passed to the proxy behind
//! an `Arc`. When syslog auditing is disabled a null logger is used.
//!
//! # Event Format
//!
//! Events are logged as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"intercept","host":"example.com","port":443,"serial":"3f9a..."}
//! ```

mod dump;
mod error;
mod events;
mod syslog;

pub use dump::{DUMP_TARGET, RequestDump};
pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use syslog::{AuditLogger, SYSLOG_TAG};
