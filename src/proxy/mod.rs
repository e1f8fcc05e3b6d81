//! Forward HTTP proxy with TLS interception.
//!
//! This module provides:
//! - Plain HTTP forwarding for absolute-form requests
//! - Blind CONNECT tunnels
//! - CONNECT interception with per-host leaf certificates
//! - An in-process relay feeding hijacked connections to the intercept server
//!
//! # Architecture
//!
//! ```text
//!  client ──► listener ──► Dispatcher ─┬─► Forwarder ──────────────► origin
//!                                      ├─► tunnel (byte splice) ───► origin
//!                                      └─► InterceptHandler
//!                                              │ issue leaf, 200, hijack
//!                                              ▼
//!                                           relay ──► InterceptServer
//!                                                      │ TLS, rewrite
//!                                                      ▼
//!                                                   Forwarder ─────► origin
//! ```

pub mod connect;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod intercept;
pub mod listener;
pub mod relay;
pub mod response;
pub mod server;
pub mod tls;

// Re-export main types for convenient access
pub use connect::{ConnectTarget, TunnelOptions, parse_host_port};
pub use dispatch::{Dispatcher, InterceptPolicy, Route, route};
pub use error::ProxyError;
pub use forward::Forwarder;
pub use intercept::{InterceptHandler, InterceptServer, InterceptedConn, rewrite_to_origin};
pub use listener::{Listener, serve};
pub use relay::{ChannelListener, RelayAddr, RelayClosed, RelaySender};
pub use response::ProxyBody;
pub use server::{DEFAULT_CONNECT_TIMEOUT, ProxyConfig, ProxyServer, ProxyServerBuilder};
pub use tls::{ServerTlsConn, client_tls_config, load_pem_certs};
