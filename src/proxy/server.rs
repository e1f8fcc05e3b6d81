//! HTTP proxy server implementation.
//!
//! This module provides the main proxy server that:
//! - Listens for client connections on a TCP socket
//! - Forwards plain HTTP requests to their origin
//! - Intercepts or tunnels CONNECT requests depending on policy
//! - Runs the intercept server that serves decrypted traffic
//!
//! # Architecture
//!
//! The proxy uses hyper's HTTP/1.1 server with upgrade support for CONNECT.
//! Each connection is handled in a separate Tokio task. Intercepted
//! connections are pushed through an in-process relay to a second HTTP/1.1
//! server that owns their TLS handshakes.
//!
//! # Example
//!
//! ```ignore
//! use intercept_proxy::proxy::ProxyServerBuilder;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServerBuilder::new()
//!     .listen_addr("127.0.0.1:8080".parse()?)
//!     .ca(ca)
//!     .bind(shutdown_rx)
//!     .await?;
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::connect::TunnelOptions;
use super::dispatch::{Dispatcher, InterceptPolicy};
use super::error::ProxyError;
use super::forward::Forwarder;
use super::intercept::{InterceptHandler, InterceptServer, InterceptedConn};
use super::listener::serve;
use crate::authority::{CaContext, LeafIssuer};
use crate::telemetry::{AuditLogger, RequestDump};
use hyper::Request;
use hyper::body::Incoming;
use rustls_pki_types::CertificateDer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Default bound on upstream dials for CONNECT tunnels.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the proxy server.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Root CA used to sign intercepted leaves.
    pub ca: Arc<CaContext>,
    /// Whether CONNECT requests are intercepted.
    pub intercept: InterceptPolicy,
    /// Upper bound on upstream dials for tunnels.
    pub connect_timeout: Duration,
    /// Extra trust anchors for upstream TLS.
    pub extra_roots: Vec<CertificateDer<'static>>,
    /// Whether request heads are dumped.
    pub dump_requests: bool,
    /// Reference to the audit logger.
    pub audit: Arc<AuditLogger>,
}

/// The main proxy server, bound and ready to run.
pub struct ProxyServer {
    config: ProxyConfig,
    listener: TcpListener,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind the listening socket.
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy configuration.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub async fn bind(
        config: ProxyConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Self {
            config,
            listener,
            shutdown_rx,
        })
    }

    /// Address the proxy is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the proxy server.
    ///
    /// Returns when the shutdown signal is received. The intercept relay is
    /// closed on the way out, so connections not yet picked up are dropped.
    pub async fn run(self) -> Result<(), ProxyError> {
        let addr = self.local_addr()?;
        let forwarder = Forwarder::new(&self.config.extra_roots)?;
        let dump = RequestDump::new(self.config.dump_requests);

        let interceptor = match self.config.intercept {
            InterceptPolicy::Intercept => Some(InterceptServer::<InterceptedConn>::start(
                forwarder.clone(),
                dump,
                self.shutdown_rx.clone(),
            )),
            InterceptPolicy::Tunnel => None,
        };

        let intercept_handler = interceptor.as_ref().map(|server| {
            InterceptHandler::new(
                LeafIssuer::new(Arc::clone(&self.config.ca)),
                server.sender(),
                Arc::clone(&self.config.audit),
            )
        });

        let tunnel = TunnelOptions {
            connect_timeout: self.config.connect_timeout,
            audit: Arc::clone(&self.config.audit),
        };

        let dispatcher = Arc::new(Dispatcher::new(forwarder, tunnel, intercept_handler, dump));

        info!(
            "Proxy listening on {} (intercept: {})",
            addr,
            self.config.intercept == InterceptPolicy::Intercept
        );

        let handler = move |req: Request<Incoming>| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.handle(req).await }
        };

        let result = serve(self.listener, handler, self.shutdown_rx).await;

        if let Some(server) = interceptor {
            server.shutdown().await?;
        }

        info!("Proxy shut down");
        Ok(result?)
    }
}

/// Builder for ProxyServer configuration.
pub struct ProxyServerBuilder {
    listen_addr: SocketAddr,
    ca: Option<Arc<CaContext>>,
    intercept: InterceptPolicy,
    connect_timeout: Duration,
    extra_roots: Vec<CertificateDer<'static>>,
    dump_requests: bool,
    audit: Option<Arc<AuditLogger>>,
}

impl ProxyServerBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ca: None,
            intercept: InterceptPolicy::Intercept,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            extra_roots: Vec::new(),
            dump_requests: true,
            audit: None,
        }
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the root CA.
    pub fn ca(mut self, ca: Arc<CaContext>) -> Self {
        self.ca = Some(ca);
        self
    }

    /// Set the CONNECT policy.
    pub fn intercept(mut self, policy: InterceptPolicy) -> Self {
        self.intercept = policy;
        self
    }

    /// Set the upstream dial timeout for tunnels.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add trust anchors for upstream TLS.
    pub fn extra_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.extra_roots.extend(roots);
        self
    }

    /// Enable or disable request dumps.
    pub fn dump_requests(mut self, enabled: bool) -> Self {
        self.dump_requests = enabled;
        self
    }

    /// Set the audit logger. Defaults to a null logger.
    pub fn audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns error if no CA was set.
    pub fn build(self) -> Result<ProxyConfig, ProxyError> {
        let ca = self
            .ca
            .ok_or_else(|| ProxyError::Config("ca is required".into()))?;

        Ok(ProxyConfig {
            listen_addr: self.listen_addr,
            ca,
            intercept: self.intercept,
            connect_timeout: self.connect_timeout,
            extra_roots: self.extra_roots,
            dump_requests: self.dump_requests,
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(AuditLogger::new_null())),
        })
    }

    /// Build the configuration and bind the listening socket.
    pub async fn bind(self, shutdown_rx: watch::Receiver<bool>) -> Result<ProxyServer, ProxyError> {
        ProxyServer::bind(self.build()?, shutdown_rx).await
    }
}

impl Default for ProxyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
