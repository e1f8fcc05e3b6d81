//! Response and body helpers shared by the proxy handlers.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Create an empty response body.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A bodiless response with the given status.
pub fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

/// A plain-text error response whose body is the canonical reason phrase.
pub fn error_response(status: StatusCode) -> Response<ProxyBody> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(full_body(reason));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
