//! HTTP CONNECT handling shared by the tunnel and intercept paths.
//!
//! The flow for a plain tunnel is:
//!
//! 1. Client sends: `CONNECT api.example.com:443 HTTP/1.1`
//! 2. Proxy claims the client connection (500 if it cannot be hijacked)
//! 3. Proxy dials the target (503 if unreachable or too slow)
//! 4. Proxy returns `200` and the upgrade completes
//! 5. Bytes are copied both ways until either side finishes, then both
//!    connections are closed
//!
//! The intercept path reuses the target parsing and hijack helpers here.

use super::error::ProxyError;
use super::response::{ProxyBody, empty_response, error_response};
use crate::telemetry::{AuditEvent, AuditLogger};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Settings for blind CONNECT tunnels.
#[derive(Clone)]
pub struct TunnelOptions {
    /// Upper bound on the upstream dial.
    pub connect_timeout: Duration,
    /// Audit sink for tunnel events.
    pub audit: Arc<AuditLogger>,
}

/// The `host:port` a CONNECT request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Hostname or IP literal, without brackets.
    pub host: String,
    /// Destination port.
    pub port: u16,
}

impl ConnectTarget {
    /// Extract the target from the request-target authority, falling back to
    /// the `Host` header.
    pub fn from_request<B>(req: &Request<B>) -> Result<Self, ProxyError> {
        if let Some(authority) = req.uri().authority() {
            return parse_host_port(authority.as_str());
        }

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProxyError::InvalidTarget("missing CONNECT authority".into()))?;
        parse_host_port(host)
    }

    /// `host:port` suitable for dialing, with IPv6 literals bracketed.
    pub fn addr(&self) -> String {
        if self.host.parse::<IpAddr>().is_ok_and(|ip| ip.is_ipv6()) {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parse a `host:port` authority. Both parts are required.
///
/// Examples:
/// - `api.example.com:443` -> ("api.example.com", 443)
/// - `[::1]:8443` -> ("::1", 8443)
/// - `api.example.com` -> error
pub fn parse_host_port(authority: &str) -> Result<ConnectTarget, ProxyError> {
    let (host, port_str) = authority
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::InvalidTarget(format!("missing port in '{}'", authority)))?;

    let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(ipv6) => ipv6,
        // An unbracketed host containing ':' is an IPv6 literal without a port.
        None if host.contains(':') => {
            return Err(ProxyError::InvalidTarget(format!(
                "missing port in '{}'",
                authority
            )));
        }
        None => host,
    };

    if host.is_empty() {
        return Err(ProxyError::InvalidTarget(format!(
            "missing host in '{}'",
            authority
        )));
    }

    let port = port_str
        .parse::<u16>()
        .map_err(|_| ProxyError::InvalidTarget(format!("invalid port: {}", port_str)))?;

    Ok(ConnectTarget {
        host: host.to_string(),
        port,
    })
}

/// Take the upgrade handle out of a request.
///
/// Fails if the serving connection cannot hand over its stream, which lets
/// handlers report that before committing to a 200.
pub fn hijack<B>(req: &mut Request<B>) -> Result<OnUpgrade, ProxyError> {
    req.extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(ProxyError::HijackUnsupported)
}

/// Handle a CONNECT request by splicing the client to the target.
pub async fn tunnel(mut req: Request<Incoming>, options: &TunnelOptions) -> Response<ProxyBody> {
    match open_tunnel(&mut req, options).await {
        Ok(response) => response,
        Err(e) => {
            warn!("CONNECT {} failed: {}", req.uri(), e);
            error_response(e.status())
        }
    }
}

async fn open_tunnel(
    req: &mut Request<Incoming>,
    options: &TunnelOptions,
) -> Result<Response<ProxyBody>, ProxyError> {
    let target = ConnectTarget::from_request(req)?;
    let addr = target.addr();
    let on_upgrade = hijack(req)?;

    let upstream = match dial(&target, options.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            options.audit.log(AuditEvent::UpstreamUnreachable {
                target: addr,
                error: e.to_string(),
            });
            return Err(e);
        }
    };

    info!("Tunneling to {}", addr);
    options.audit.log(AuditEvent::Tunnel {
        target: addr.clone(),
    });

    tokio::spawn(async move {
        if let Err(e) = run_tunnel(on_upgrade, upstream, &addr).await {
            warn!("Tunnel to {} abandoned: {}", addr, e);
        }
    });

    Ok(empty_response(StatusCode::OK))
}

async fn run_tunnel(
    on_upgrade: OnUpgrade,
    upstream: TcpStream,
    addr: &str,
) -> Result<(), ProxyError> {
    let upgraded = on_upgrade
        .await
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;
    splice(upgraded, upstream, addr).await;
    Ok(())
}

/// Open a TCP connection to `target`, bounded by `timeout`.
pub async fn dial(target: &ConnectTarget, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let addr = target.addr();
    let connect = TcpStream::connect((target.host.as_str(), target.port));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            debug!("Connected to upstream {}", addr);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            addr,
            message: e.to_string(),
        }),
        Err(_) => Err(ProxyError::Timeout(addr)),
    }
}

/// Copy bytes both ways until either direction ends, then drop both sides.
async fn splice(upgraded: Upgraded, mut upstream: TcpStream, addr: &str) {
    let (mut client_read, mut client_write) = tokio::io::split(TokioIo::new(upgraded));
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let client_to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let upstream_to_client = tokio::io::copy(&mut upstream_read, &mut client_write);

    tokio::select! {
        result = client_to_upstream => {
            if let Err(e) = result {
                debug!("Client->upstream copy ended: {}", e);
            }
        }
        result = upstream_to_client => {
            if let Err(e) = result {
                debug!("Upstream->client copy ended: {}", e);
            }
        }
    }

    debug!("Tunnel closed for {}", addr);
}
