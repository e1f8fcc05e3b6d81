use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderValue, SET_COOKIE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use intercept_proxy::authority::{CaContext, LeafIssuer, serial_hex};
use intercept_proxy::proxy::{InterceptPolicy, ProxyError, ProxyServerBuilder};
use intercept_proxy::telemetry::{AuditEvent, AuditLogger};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use x509_parser::prelude::*;

struct TestProxy {
    addr: SocketAddr,
    audit: Arc<AuditLogger>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ProxyError>>,
}

impl TestProxy {
    async fn start(
        ca: Arc<CaContext>,
        policy: InterceptPolicy,
        extra_roots: Vec<CertificateDer<'static>>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let audit = Arc::new(AuditLogger::in_memory());
        let server = ProxyServerBuilder::new()
            .listen_addr("127.0.0.1:0".parse().unwrap())
            .ca(ca)
            .intercept(policy)
            .connect_timeout(Duration::from_secs(2))
            .extra_roots(extra_roots)
            .audit(Arc::clone(&audit))
            .bind(shutdown_rx)
            .await
            .expect("Failed to bind proxy");

        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            audit,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("proxy did not shut down")
            .unwrap()
            .unwrap();
    }
}

/// Origin handler: echoes what it saw and sets a repeated header.
async fn origin(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = format!(
        "{} {} host={} proxy-connection={}",
        req.method(),
        req.uri(),
        host,
        req.headers().contains_key("proxy-connection")
    );

    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .append(SET_COOKIE, HeaderValue::from_static("a=1"));
    response
        .headers_mut()
        .append(SET_COOKIE, HeaderValue::from_static("b=2"));
    Ok(response)
}

async fn spawn_plain_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(
                http1::Builder::new().serve_connection(TokioIo::new(stream), service_fn(origin)),
            );
        }
    });
    addr
}

async fn spawn_tls_origin(origin_ca: Arc<CaContext>) -> SocketAddr {
    let leaf = LeafIssuer::new(origin_ca).issue("localhost").unwrap();
    let acceptor = TlsAcceptor::from(leaf.server_config());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(tls), service_fn(origin))
                        .await;
                }
            });
        }
    });
    addr
}

fn connector_trusting(ca: &CaContext) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(ca.certificate().clone()).unwrap();
    TlsConnector::from(Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

/// Read a response head byte by byte so nothing after it is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

async fn send_connect(proxy: SocketAddr, target: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut stream).await;
    (stream, head)
}

async fn get<S>(io: S, req: Request<Empty<Bytes>>) -> (Response<()>, String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .unwrap();
    tokio::spawn(conn);

    let response = sender.send_request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();
    (Response::from_parts(parts, ()), body)
}

#[tokio::test]
async fn test_intercepted_https_reaches_origin() {
    let proxy_ca = Arc::new(CaContext::generate().unwrap());
    let origin_ca = Arc::new(CaContext::generate().unwrap());
    let origin_addr = spawn_tls_origin(origin_ca.clone()).await;
    let proxy = TestProxy::start(
        proxy_ca.clone(),
        InterceptPolicy::Intercept,
        vec![origin_ca.certificate().clone()],
    )
    .await;

    let target = format!("localhost:{}", origin_addr.port());
    let (stream, head) = send_connect(proxy.addr, &target).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {head}");

    let tls = connector_trusting(&proxy_ca)
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .expect("client should trust the minted leaf");

    let presented = tls.get_ref().1.peer_certificates().unwrap().to_vec();
    assert_eq!(presented.len(), 2);
    assert_eq!(&presented[1], proxy_ca.certificate());
    let (_, leaf) = X509Certificate::from_der(&presented[0]).unwrap();
    assert_eq!(
        leaf.subject().iter_common_name().next().unwrap().as_str().unwrap(),
        "localhost"
    );

    let events = proxy.audit.events();
    let [AuditEvent::Intercept { host, port, serial }] = events.as_slice() else {
        panic!("expected one intercept event, got {events:?}");
    };
    assert_eq!(host, "localhost");
    assert_eq!(*port, origin_addr.port());
    assert_eq!(
        serial.trim_start_matches('0'),
        serial_hex(leaf.raw_serial()).trim_start_matches('0')
    );

    let req = Request::get("/hello?x=1")
        .header(HOST, target.as_str())
        .body(Empty::<Bytes>::new())
        .unwrap();
    let (response, body) = get(tls, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    assert_eq!(
        body,
        format!("GET /hello?x=1 host={target} proxy-connection=false")
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_plain_http_is_forwarded() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let origin_addr = spawn_plain_origin().await;
    let proxy = TestProxy::start(ca, InterceptPolicy::Intercept, Vec::new()).await;

    let stream = TcpStream::connect(proxy.addr).await.unwrap();
    let req = Request::get(format!("http://{origin_addr}/path?q=1"))
        .header(HOST, origin_addr.to_string())
        .header("proxy-connection", "keep-alive")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let (response, body) = get(stream, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies: Vec<_> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
    assert_eq!(
        body,
        format!("GET /path?q=1 host={origin_addr} proxy-connection=false")
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_unreachable_upstream_is_503() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let proxy = TestProxy::start(ca, InterceptPolicy::Tunnel, Vec::new()).await;

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_port = closed.local_addr().unwrap().port();
    drop(closed);

    let (mut stream, head) = send_connect(proxy.addr, &format!("127.0.0.1:{closed_port}")).await;
    assert!(head.starts_with("HTTP/1.1 503"), "unexpected head: {head}");

    let mut body = [0u8; 19];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"Service Unavailable");

    let events = proxy.audit.events();
    let [AuditEvent::UpstreamUnreachable { target, .. }] = events.as_slice() else {
        panic!("unexpected audit events: {events:?}");
    };
    assert_eq!(*target, format!("127.0.0.1:{closed_port}"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_forward_to_unreachable_origin_is_503() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let proxy = TestProxy::start(ca, InterceptPolicy::Intercept, Vec::new()).await;

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let stream = TcpStream::connect(proxy.addr).await.unwrap();
    let req = Request::get(format!("http://{closed_addr}/"))
        .header(HOST, closed_addr.to_string())
        .body(Empty::<Bytes>::new())
        .unwrap();
    let (response, body) = get(stream, req).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Service Unavailable");

    proxy.stop().await;
}

#[tokio::test]
async fn test_connect_without_port_is_400() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let proxy = TestProxy::start(ca, InterceptPolicy::Intercept, Vec::new()).await;

    let (_stream, head) = send_connect(proxy.addr, "localhost").await;
    assert!(head.starts_with("HTTP/1.1 400"), "unexpected head: {head}");

    proxy.stop().await;
}

#[tokio::test]
async fn test_issuance_failure_is_500_without_hijack() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let proxy = TestProxy::start(ca, InterceptPolicy::Intercept, Vec::new()).await;

    let (mut stream, head) = send_connect(proxy.addr, "-bad-.example:443").await;
    assert!(head.starts_with("HTTP/1.1 500"), "unexpected head: {head}");
    assert!(head.to_ascii_lowercase().contains("content-type: text/plain"));

    // A regular HTTP body follows, so the connection was never handed over.
    let mut body = [0u8; 21];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"Internal Server Error");

    let events = proxy.audit.events();
    let [AuditEvent::IssueFailed { host, .. }] = events.as_slice() else {
        panic!("unexpected audit events: {events:?}");
    };
    assert_eq!(host, "-bad-.example");

    proxy.stop().await;
}

#[tokio::test]
async fn test_blind_tunnel_splices_bytes() {
    let ca = Arc::new(CaContext::generate().unwrap());
    let origin_addr = spawn_plain_origin().await;
    let proxy = TestProxy::start(ca, InterceptPolicy::Tunnel, Vec::new()).await;

    let (stream, head) = send_connect(proxy.addr, &origin_addr.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {head}");

    let req = Request::get("/through-tunnel")
        .header(HOST, origin_addr.to_string())
        .body(Empty::<Bytes>::new())
        .unwrap();
    let (response, body) = get(stream, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body.starts_with("GET /through-tunnel"));
    assert!(matches!(
        proxy.audit.events().as_slice(),
        [AuditEvent::Tunnel { .. }]
    ));

    proxy.stop().await;
}

#[tokio::test]
async fn test_stalled_handshake_does_not_block_others() {
    let proxy_ca = Arc::new(CaContext::generate().unwrap());
    let origin_ca = Arc::new(CaContext::generate().unwrap());
    let origin_addr = spawn_tls_origin(origin_ca.clone()).await;
    let proxy = TestProxy::start(
        proxy_ca.clone(),
        InterceptPolicy::Intercept,
        vec![origin_ca.certificate().clone()],
    )
    .await;

    let target = format!("localhost:{}", origin_addr.port());

    // Hijacked but never starts TLS.
    let (_stalled, head) = send_connect(proxy.addr, &target).await;
    assert!(head.starts_with("HTTP/1.1 200"));

    let (stream, head) = send_connect(proxy.addr, &target).await;
    assert!(head.starts_with("HTTP/1.1 200"));

    let tls = tokio::time::timeout(
        Duration::from_secs(5),
        connector_trusting(&proxy_ca).connect(ServerName::try_from("localhost").unwrap(), stream),
    )
    .await
    .expect("second handshake was blocked")
    .unwrap();

    let req = Request::get("/")
        .header(HOST, target.as_str())
        .body(Empty::<Bytes>::new())
        .unwrap();
    let (response, _) = get(tls, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    proxy.stop().await;
}
