//! intercept-proxy: Forward HTTP proxy with TLS interception
//!
//! This crate provides a forward proxy that relays plain HTTP requests and
//! decrypts HTTPS traffic by presenting certificates minted on the fly from a
//! locally trusted root CA. Every request is logged and relayed to the real
//! origin.
//!
//! # Security Model
//!
//! Interception only works for clients that trust the proxy's root CA. The CA
//! private key is the sensitive asset: it is stored with 0600 permissions and
//! only ever used in memory to sign short-lived leaves.
//!
//! # Architecture
//!
//! - **Authority**: Root CA loading and per-host leaf issuance
//! - **Proxy**: Listener, request dispatch, tunnels, interception and forwarding
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Syslog audit events and request dumps

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod authority;
pub mod cli;
pub mod config;
pub mod proxy;
pub mod telemetry;
