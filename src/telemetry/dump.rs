//! Request dumps.
//!
//! Every request the proxy handles can be logged with its method, URI,
//! version and full header block on the `intercept_proxy::dump` target, so
//! dumps can be filtered independently of operational logs.

use hyper::Request;
use std::fmt::Write;
use tracing::info;

/// Tracing target for request dumps.
pub const DUMP_TARGET: &str = "intercept_proxy::dump";

/// Logs request heads when enabled.
#[derive(Debug, Clone, Copy)]
pub struct RequestDump {
    enabled: bool,
}

impl RequestDump {
    /// Create a dump collaborator.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether dumps are emitted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log `req` if dumping is enabled.
    pub fn log<B>(&self, req: &Request<B>) {
        if self.enabled {
            info!(target: DUMP_TARGET, url = %req.uri(), "\n{}", render(req));
        }
    }
}

/// Render a request head in wire-like form. The body is not included.
pub fn render<B>(req: &Request<B>) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} {} {:?}\r\n", req.method(), req.uri(), req.version());
    for (name, value) in req.headers() {
        let _ = write!(
            out,
            "{}: {}\r\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        );
    }
    out.push_str("\r\n");
    out
}
