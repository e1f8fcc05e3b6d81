//! TLS plumbing for the interception path.
//!
//! This module provides:
//! - [`ServerTlsConn`], a server-side TLS stream whose handshake is deferred
//!   until the first read or write
//! - The client configuration used for upstream connections
//! - PEM loading for extra trust anchors
//!
//! # Critical ALPN Note
//!
//! Leaf server configurations advertise only `http/1.1`. If we allowed HTTP/2
//! negotiation, modern clients would switch to H2 after the handshake and the
//! intercept server, which speaks HTTP/1.1, could not read their requests.

use super::error::ProxyError;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::CertificateDer;
use std::fs;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, warn};

/// A server-side TLS connection over a hijacked byte stream.
///
/// Construction is cheap and never touches the network. The handshake runs the
/// first time the connection is read from or written to, so it happens on
/// whichever task ends up serving the connection. A failed handshake surfaces
/// as an I/O error on that first operation and on every one after it.
pub struct ServerTlsConn<IO> {
    state: TlsState<IO>,
}

enum TlsState<IO> {
    Handshaking(Pin<Box<tokio_rustls::Accept<IO>>>),
    Established(Box<TlsStream<IO>>),
    Failed,
}

impl<IO> ServerTlsConn<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `io` so that it will be served with `config`.
    pub fn new(io: IO, config: Arc<ServerConfig>) -> Self {
        let accept = TlsAcceptor::from(config).accept(io);
        Self {
            state: TlsState::Handshaking(Box::pin(accept)),
        }
    }

    /// Whether the handshake has completed successfully.
    pub fn is_established(&self) -> bool {
        matches!(self.state, TlsState::Established(_))
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<&mut TlsStream<IO>>> {
        if let TlsState::Handshaking(accept) = &mut self.state {
            match ready!(accept.as_mut().poll(cx)) {
                Ok(stream) => {
                    debug!("Client TLS handshake complete");
                    self.state = TlsState::Established(Box::new(stream));
                }
                Err(e) => {
                    debug!("Client TLS handshake failed: {}", e);
                    self.state = TlsState::Failed;
                    return Poll::Ready(Err(e));
                }
            }
        }

        match &mut self.state {
            TlsState::Established(stream) => Poll::Ready(Ok(stream.as_mut())),
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS handshake failed",
            ))),
        }
    }
}

impl<IO> AsyncRead for ServerTlsConn<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let stream = ready!(self.get_mut().poll_handshake(cx))?;
        Pin::new(stream).poll_read(cx, buf)
    }
}

impl<IO> AsyncWrite for ServerTlsConn<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let stream = ready!(self.get_mut().poll_handshake(cx))?;
        Pin::new(stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let stream = ready!(self.get_mut().poll_handshake(cx))?;
        Pin::new(stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let stream = ready!(self.get_mut().poll_handshake(cx))?;
        Pin::new(stream).poll_shutdown(cx)
    }
}

/// Build the TLS client configuration for upstream connections.
///
/// Trusts the platform's native roots plus `extra_roots`. An empty store is
/// allowed but logged, since every upstream handshake will then fail.
pub fn client_tls_config(
    extra_roots: &[CertificateDer<'static>],
) -> Result<ClientConfig, ProxyError> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();

    // Log any errors but continue with successfully loaded certs
    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }

    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    for cert in extra_roots {
        root_store.add(cert.clone())?;
    }

    if root_store.is_empty() {
        warn!("No trusted root certificates available; upstream TLS will fail");
    } else {
        debug!("Loaded {} root certificates", root_store.len());
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Read every certificate from a PEM file.
pub fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let pem = fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}
