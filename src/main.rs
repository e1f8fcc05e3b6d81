//! intercept-proxy: Forward HTTP proxy with TLS interception
//!
//! This is the main entry point for the intercept-proxy binary. It handles CLI
//! argument parsing, configuration loading, telemetry initialization, and
//! either runs the proxy or creates a root CA.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: Goes to syslog when enabled, never to stdout/stderr
//! - **Operational logging**: Goes to stderr via `tracing`
//! - **Request dumps**: Go through `tracing` on the `intercept_proxy::dump`
//!   target, so `RUST_LOG=intercept_proxy::dump=off` silences them

use anyhow::{Context, Result};
use clap::Parser;
use intercept_proxy::{
    authority::{CaContext, create_ca},
    cli::{Cli, Commands},
    config::{Config, ConfigLoader},
    proxy::{InterceptPolicy, ProxyServerBuilder, load_pem_certs},
    telemetry::{AuditEvent, AuditLogger},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, config.log_level())?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    let audit = Arc::new(init_audit(&config)?);

    match cli.command {
        Some(Commands::CreateCa { force }) => create_ca_files(&config, force, &audit),
        None => run_proxy(&config, audit).await,
    }
}

/// Write a new root CA to the configured paths.
fn create_ca_files(config: &Config, force: bool, audit: &AuditLogger) -> Result<()> {
    let cert_path = config.ca_cert_path();
    let key_path = config.ca_key_path();

    create_ca(cert_path, key_path, force).with_context(|| {
        format!(
            "Failed to create CA at {} / {}",
            cert_path.display(),
            key_path.display()
        )
    })?;

    audit.log(AuditEvent::CaCreated {
        cert_path: cert_path.display().to_string(),
        key_path: key_path.display().to_string(),
    });

    println!("Wrote CA certificate to {}", cert_path.display());
    println!("Wrote CA private key to {}", key_path.display());
    Ok(())
}

/// Run the proxy until Ctrl-C.
async fn run_proxy(config: &Config, audit: Arc<AuditLogger>) -> Result<()> {
    let ca = CaContext::load(config.ca_cert_path(), config.ca_key_path()).with_context(|| {
        format!(
            "Failed to load CA from {} (run `intercept-proxy create-ca` to make one)",
            config.ca_cert_path().display()
        )
    })?;

    let mut extra_roots = Vec::new();
    for path in config.extra_roots() {
        let certs = load_pem_certs(path)
            .with_context(|| format!("Failed to load trust roots from {}", path.display()))?;
        extra_roots.extend(certs);
    }

    let intercept = InterceptPolicy::from(config.intercept());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ProxyServerBuilder::new()
        .listen_addr(config.listen_addr()?)
        .ca(Arc::new(ca))
        .intercept(intercept)
        .connect_timeout(config.connect_timeout()?)
        .extra_roots(extra_roots)
        .dump_requests(config.dump_requests())
        .audit(Arc::clone(&audit))
        .bind(shutdown_rx)
        .await
        .context("Failed to start proxy")?;

    let listen = server.local_addr()?;
    audit.log(AuditEvent::SessionStart {
        listen: listen.to_string(),
        intercept: intercept == InterceptPolicy::Intercept,
        pid: std::process::id(),
    });
    let started = Instant::now();

    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_task => {
            result.context("Proxy task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
            server_task.await.context("Proxy task panicked")??;
        }
    }

    audit.log(AuditEvent::SessionEnd {
        duration_sec: started.elapsed().as_secs(),
    });

    Ok(())
}

/// Create the audit logger requested by the configuration.
fn init_audit(config: &Config) -> Result<AuditLogger> {
    if config.syslog_audit() {
        AuditLogger::new().context("Failed to initialize syslog audit logging")
    } else {
        Ok(AuditLogger::new_null())
    }
}

/// Initialize the tracing subscriber for operational logging.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG` if set, otherwise the configured level
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, default_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .context("Invalid log level")?,
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
