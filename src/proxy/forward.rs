//! Single-request forwarding to origin servers.
//!
//! Used for plain-HTTP proxy requests and for every request decrypted by the
//! intercept server. Each call performs one upstream round trip; the origin's
//! status, headers (repeated ones included) and body are relayed unchanged.

use super::error::ProxyError;
use super::response::{ProxyBody, error_response};
use super::tls::client_tls_config;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName};
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls_pki_types::CertificateDer;
use tracing::{debug, warn};

/// Hop-by-hop headers addressed to the proxy itself.
const PROXY_HEADERS: [&str; 2] = ["proxy-connection", "proxy-authorization"];

/// Forwards absolute-form requests to their origin over HTTP or HTTPS.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
}

impl Forwarder {
    /// Build a forwarder trusting native roots plus `extra_roots`.
    pub fn new(extra_roots: &[CertificateDer<'static>]) -> Result<Self, ProxyError> {
        let tls_config = client_tls_config(extra_roots)?;

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .build(https);

        Ok(Self { client })
    }

    /// Forward `req` and return the origin's response.
    ///
    /// Failures never propagate: a request without an absolute URI yields a
    /// 400 and a failed round trip yields a 503.
    pub async fn forward(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        match self.round_trip(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding failed: {}", e);
                error_response(e.status())
            }
        }
    }

    async fn round_trip(
        &self,
        mut req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let uri = req.uri();
        let (Some(_), Some(authority)) = (uri.scheme(), uri.authority()) else {
            return Err(ProxyError::InvalidTarget(format!(
                "request URI '{}' is not absolute",
                uri
            )));
        };
        let addr = authority.to_string();

        strip_proxy_headers(req.headers_mut());
        debug!("Forwarding {} {}", req.method(), req.uri());

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr,
                message: e.to_string(),
            })?;

        Ok(response.map(|body| body.boxed()))
    }
}

/// Remove headers meant for this proxy before the request goes upstream.
fn strip_proxy_headers(headers: &mut HeaderMap) {
    for name in PROXY_HEADERS {
        headers.remove(HeaderName::from_static(name));
    }
}
