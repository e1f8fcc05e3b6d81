//! Listener abstraction and the shared HTTP/1.1 accept loop.
//!
//! Both the client-facing TCP socket and the in-process intercept relay are
//! served by [`serve`]. A listener that reports `UnexpectedEof` is finished and
//! ends the loop cleanly; any other accept error is logged and the loop keeps
//! going.

use super::response::ProxyBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, warn};

/// A source of byte-stream connections.
pub trait Listener: Send + 'static {
    /// Connection type yielded by `accept`.
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// Peer or listener address type.
    type Addr: Debug + Send + 'static;

    /// Wait for the next connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<Self::Addr>;
}

impl Listener for TcpListener {
    type Io = tokio::net::TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> io::Result<(Self::Io, Self::Addr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        TcpListener::local_addr(self)
    }
}

/// Serve HTTP/1.1 with upgrades on every connection `listener` yields.
///
/// Each connection runs in its own task and `handler` is invoked once per
/// request. Returns when the listener is closed or `shutdown` flips to true.
pub async fn serve<L, F, Fut>(
    mut listener: L,
    handler: F,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    L: Listener,
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<ProxyBody>> + Send + 'static,
{
    if *shutdown.borrow_and_update() {
        return Ok(());
    }

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((io, addr)) => {
                        debug!("Accepted connection from {:?}", addr);
                        spawn_connection(io, handler.clone());
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("Listener closed");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Accept loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Spawn a task to handle a single connection.
fn spawn_connection<I, F, Fut>(io: I, handler: F)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<ProxyBody>> + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let response = handler(req);
            async move { Ok::<_, Infallible>(response.await) }
        });

        // Upgrades are needed for CONNECT.
        if let Err(e) = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await
        {
            // Resets and aborted handshakes are routine for a proxy.
            debug!("Connection ended: {}", e);
        }
    });
}
