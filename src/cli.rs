//! Command-line interface definitions for intercept-proxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Forward HTTP proxy with TLS interception.
///
/// intercept-proxy forwards plain HTTP requests and, for HTTPS, answers
/// CONNECT by presenting a certificate minted on the fly from a local root CA.
/// Decrypted requests are logged and relayed to the real origin.
#[derive(Parser, Debug)]
#[command(name = "intercept-proxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to run the proxy).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address to listen on (e.g. 127.0.0.1:8080).
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Path to the root CA certificate (PEM).
    #[arg(long = "ca-cert", value_name = "PATH", global = true)]
    pub ca_cert: Option<PathBuf>,

    /// Path to the root CA private key (PEM).
    #[arg(long = "ca-key", value_name = "PATH", global = true)]
    pub ca_key: Option<PathBuf>,

    /// Tunnel CONNECT requests instead of intercepting them.
    #[arg(long = "no-intercept")]
    pub no_intercept: bool,

    /// Do not log request dumps.
    #[arg(long = "no-dump")]
    pub no_dump: bool,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for intercept-proxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new root CA and write it to the configured paths.
    #[command(name = "create-ca")]
    CreateCa {
        /// Overwrite existing CA files.
        #[arg(long = "force")]
        force: bool,
    },
}
