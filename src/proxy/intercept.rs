//! TLS interception of CONNECT requests.
//!
//! The flow for an intercepted CONNECT is:
//!
//! 1. Client sends: `CONNECT api.example.com:443 HTTP/1.1`
//! 2. [`InterceptHandler`] mints a leaf for `api.example.com`
//! 3. Proxy returns `200` and takes over the client connection
//! 4. The raw connection is wrapped in a [`ServerTlsConn`] presenting the leaf
//!    and pushed into the relay
//! 5. [`InterceptServer`] accepts it from the relay, completes the handshake
//!    lazily and serves the decrypted requests
//! 6. Each request is rewritten to `https://<Host>/...` and forwarded
//!
//! No TLS work happens on the CONNECT handler's task; a slow or broken client
//! handshake only ever stalls the connection task that owns it.

use super::connect::{ConnectTarget, hijack};
use super::error::ProxyError;
use super::forward::Forwarder;
use super::listener::serve;
use super::relay::{self, RelaySender};
use super::response::{ProxyBody, empty_response, error_response};
use super::tls::ServerTlsConn;
use crate::authority::{IssuedLeaf, LeafIssuer, serial_hex};
use crate::telemetry::{AuditEvent, AuditLogger, RequestDump};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::upgrade::{OnUpgrade, Upgraded};
use rustls::ServerConfig;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A hijacked client connection awaiting its TLS handshake.
pub type InterceptedConn = ServerTlsConn<TokioIo<Upgraded>>;

/// Answers CONNECT requests by issuing a leaf and handing the connection to
/// the intercept server.
#[derive(Clone)]
pub struct InterceptHandler {
    issuer: LeafIssuer,
    relay: RelaySender<InterceptedConn>,
    audit: Arc<AuditLogger>,
}

impl InterceptHandler {
    /// Create a handler that issues with `issuer` and delivers to `relay`.
    pub fn new(
        issuer: LeafIssuer,
        relay: RelaySender<InterceptedConn>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            issuer,
            relay,
            audit,
        }
    }

    /// Handle a CONNECT request.
    ///
    /// Responds 400 for an unusable target, 500 if issuance fails or the
    /// connection cannot be hijacked, and 200 otherwise.
    pub async fn handle(&self, mut req: Request<Incoming>) -> Response<ProxyBody> {
        match self.intercept(&mut req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("CONNECT {} not intercepted: {}", req.uri(), e);
                error_response(e.status())
            }
        }
    }

    async fn intercept(
        &self,
        req: &mut Request<Incoming>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let target = ConnectTarget::from_request(req)?;
        let leaf = self.issue(&target.host).await?;
        let on_upgrade = hijack(req)?;

        info!("Intercepting {}", target.addr());
        self.audit.log(AuditEvent::Intercept {
            host: target.host.clone(),
            port: target.port,
            serial: serial_hex(leaf.serial()),
        });

        let relay = self.relay.clone();
        let config = leaf.server_config();
        let host = target.host;

        tokio::spawn(async move {
            match hand_off(on_upgrade, config, &relay).await {
                Ok(()) => {}
                Err(ProxyError::RelayClosed) => {
                    debug!("Relay closed, dropping intercepted connection for {}", host);
                }
                Err(e) => warn!("Intercept of {} abandoned: {}", host, e),
            }
        });

        Ok(empty_response(StatusCode::OK))
    }

    /// Issue a leaf on the blocking pool.
    async fn issue(&self, host: &str) -> Result<IssuedLeaf, ProxyError> {
        let issuer = self.issuer.clone();
        let hostname = host.to_string();

        let result = tokio::task::spawn_blocking(move || issuer.issue(&hostname)).await?;

        result.map_err(|e| {
            error!("Failed to issue certificate for {}: {}", host, e);
            self.audit.log(AuditEvent::IssueFailed {
                host: host.to_string(),
                error: e.to_string(),
            });
            ProxyError::CertGeneration(e)
        })
    }
}

/// Wait for the client connection to be released, wrap it for TLS and queue
/// it on the relay.
async fn hand_off(
    on_upgrade: OnUpgrade,
    config: Arc<ServerConfig>,
    relay: &RelaySender<InterceptedConn>,
) -> Result<(), ProxyError> {
    let upgraded = on_upgrade
        .await
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;

    relay.send(ServerTlsConn::new(TokioIo::new(upgraded), config))?;
    Ok(())
}

/// Serves decrypted client traffic arriving through the relay.
pub struct InterceptServer<C = InterceptedConn> {
    relay: RelaySender<C>,
    task: JoinHandle<io::Result<()>>,
}

impl<C> InterceptServer<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn the intercept server.
    ///
    /// It stops when the relay is closed or `shutdown` flips to true.
    pub fn start(forwarder: Forwarder, dump: RequestDump, shutdown: watch::Receiver<bool>) -> Self {
        let (relay, listener) = relay::channel();

        let handler = move |req: Request<Incoming>| {
            let forwarder = forwarder.clone();
            async move { handle_decrypted(req, &forwarder, dump).await }
        };

        let task = tokio::spawn(serve(listener, handler, shutdown));
        debug!("Intercept server started");

        Self { relay, task }
    }

    /// Sender half of the relay feeding this server.
    pub fn sender(&self) -> RelaySender<C> {
        self.relay.clone()
    }

    /// Close the relay; queued connections are dropped.
    pub fn close(&self) -> bool {
        self.relay.close()
    }

    /// Whether the relay has been closed.
    pub fn is_closed(&self) -> bool {
        self.relay.is_closed()
    }

    /// Close the relay and wait for the accept loop to finish.
    pub async fn shutdown(self) -> Result<(), ProxyError> {
        self.close();
        self.task.await??;
        debug!("Intercept server stopped");
        Ok(())
    }
}

/// Handle one request read off an intercepted TLS connection.
async fn handle_decrypted(
    mut req: Request<Incoming>,
    forwarder: &Forwarder,
    dump: RequestDump,
) -> Response<ProxyBody> {
    if let Err(e) = rewrite_to_origin(&mut req) {
        warn!("Rejecting intercepted request: {}", e);
        return error_response(e.status());
    }

    dump.log(&req);
    forwarder.forward(req).await
}

/// Point an origin-form request at `https://<Host>`.
///
/// The path and query are kept; a missing path becomes `/`.
pub fn rewrite_to_origin<B>(req: &mut Request<B>) -> Result<(), ProxyError> {
    let authority: Authority = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProxyError::InvalidTarget("missing Host header".into()))?
        .parse()
        .map_err(|e| ProxyError::InvalidTarget(format!("invalid Host header: {}", e)))?;

    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::HTTPS);
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    *req.uri_mut() = Uri::from_parts(parts)
        .map_err(|e| ProxyError::InvalidTarget(format!("cannot build origin URI: {}", e)))?;
    Ok(())
}
