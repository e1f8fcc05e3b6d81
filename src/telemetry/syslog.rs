//! Audit sinks.
//!
//! Audit events are written to the local syslog daemon under the
//! `INTERCEPT_PROXY` tag as one JSON object per message. A null sink drops
//! events, and an in-memory sink keeps them for inspection in tests.

use std::sync::Mutex;
use syslog::{Facility, Formatter3164, LoggerBackend};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "INTERCEPT_PROXY";

enum Sink {
    Null,
    Syslog(Mutex<syslog::Logger<LoggerBackend, Formatter3164>>),
    Memory(Mutex<Vec<AuditEvent>>),
}

/// Writes audit events to the configured sink.
///
/// Shared between connection tasks behind an `Arc`; `log` takes `&self` and
/// never fails the caller.
pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    /// Connect to the local syslog daemon over its Unix socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogUnavailable(e.to_string()))?;
        debug!("Audit events go to syslog as '{}'", SYSLOG_TAG);

        Ok(Self {
            sink: Sink::Syslog(Mutex::new(writer)),
        })
    }

    /// A logger that discards every event.
    pub fn new_null() -> Self {
        Self { sink: Sink::Null }
    }

    /// A logger that keeps events in memory; see [`AuditLogger::events`].
    pub fn in_memory() -> Self {
        Self {
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Record an audit event.
    pub fn log(&self, event: AuditEvent) {
        match &self.sink {
            Sink::Null => {}
            Sink::Memory(events) => match events.lock() {
                Ok(mut events) => events.push(event),
                Err(e) => error!("Audit buffer lock poisoned: {}", e),
            },
            Sink::Syslog(writer) => {
                let json = match serde_json::to_string(&event.with_timestamp()) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize audit event: {}", e);
                        return;
                    }
                };

                match writer.lock() {
                    Ok(mut writer) => {
                        if let Err(e) = writer.info(&json) {
                            error!("Failed to write to syslog: {}", e);
                        }
                    }
                    Err(e) => error!("Syslog writer lock poisoned: {}", e),
                }
                debug!("Audit: {}", json);
            }
        }
    }

    /// Events recorded so far by an in-memory logger. Empty for other sinks.
    pub fn events(&self) -> Vec<AuditEvent> {
        match &self.sink {
            Sink::Memory(events) => events.lock().map(|e| e.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Whether events are discarded.
    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }
}
