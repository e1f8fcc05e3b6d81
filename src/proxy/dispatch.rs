//! Method-based routing of proxy requests.

use super::connect::{TunnelOptions, tunnel};
use super::forward::Forwarder;
use super::intercept::InterceptHandler;
use super::response::ProxyBody;
use crate::telemetry::RequestDump;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};

/// Whether CONNECT requests are intercepted or tunneled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterceptPolicy {
    /// Decrypt CONNECT traffic with a minted leaf.
    #[default]
    Intercept,
    /// Splice CONNECT traffic through untouched.
    Tunnel,
}

impl From<bool> for InterceptPolicy {
    fn from(intercept: bool) -> Self {
        if intercept {
            InterceptPolicy::Intercept
        } else {
            InterceptPolicy::Tunnel
        }
    }
}

/// Where a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward as a plain HTTP request.
    Forward,
    /// Open a blind CONNECT tunnel.
    Tunnel,
    /// Intercept the CONNECT with a minted leaf.
    Intercept,
}

/// Pick the route for a request method under `policy`.
pub fn route(method: &Method, policy: InterceptPolicy) -> Route {
    match (method == Method::CONNECT, policy) {
        (false, _) => Route::Forward,
        (true, InterceptPolicy::Intercept) => Route::Intercept,
        (true, InterceptPolicy::Tunnel) => Route::Tunnel,
    }
}

/// Entry point for every request on the client-facing listener.
pub struct Dispatcher {
    forwarder: Forwarder,
    tunnel: TunnelOptions,
    intercept: Option<InterceptHandler>,
    dump: RequestDump,
}

impl Dispatcher {
    /// Create a dispatcher. CONNECT requests are intercepted only when an
    /// intercept handler is supplied.
    pub fn new(
        forwarder: Forwarder,
        tunnel: TunnelOptions,
        intercept: Option<InterceptHandler>,
        dump: RequestDump,
    ) -> Self {
        Self {
            forwarder,
            tunnel,
            intercept,
            dump,
        }
    }

    /// The policy this dispatcher applies to CONNECT.
    pub fn policy(&self) -> InterceptPolicy {
        InterceptPolicy::from(self.intercept.is_some())
    }

    /// Dump `req` and hand it to the handler for its route.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        self.dump.log(&req);

        match (route(req.method(), self.policy()), &self.intercept) {
            (Route::Intercept, Some(handler)) => handler.handle(req).await,
            (Route::Forward, _) => self.forwarder.forward(req).await,
            _ => tunnel(req, &self.tunnel).await,
        }
    }
}
