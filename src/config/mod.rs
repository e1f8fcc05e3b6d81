//! Configuration system for intercept-proxy.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/intercept-proxy/config.toml`
//! 2. User config: `~/.config/intercept-proxy/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! No configuration file is required; every setting has a default.
//!
//! # Merge Behavior
//!
//! - **Lists** (extra_roots) are **merged** (appended)
//! - **Scalars** (listen, intercept, paths, etc.) are **overridden** when set

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, SYSTEM_CONFIG_PATH};
pub use schema::{AuditConfig, CaConfig, Config, LoggingConfig, ProxySettings};
