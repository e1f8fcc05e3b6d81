//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/intercept-proxy/config.toml`
//! 3. User config: `~/.config/intercept-proxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Lists (extra_roots) are **merged** (appended).
//! Scalars (listen, log level) are **overridden**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{CaConfig, Config, LoggingConfig, ProxySettings};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/intercept-proxy/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "intercept-proxy";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config` file
    /// and invalid TOML anywhere are errors.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for path in [&self.system_path, &self.user_path] {
            if let Some(file_config) = self.load_file(path)? {
                config.merge(file_config);
                debug!("Loaded config from {:?}", path);
            } else {
                debug!("No config found at {:?}", path);
            }
        }

        // Load and merge additional config file from CLI
        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        // Apply CLI flags (highest priority)
        config.merge(cli_overrides(cli));

        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Express CLI flags as a config layer. Unset flags leave values alone.
fn cli_overrides(cli: &Cli) -> Config {
    Config {
        proxy: ProxySettings {
            listen: cli.listen.clone(),
            intercept: cli.no_intercept.then_some(false),
            ..Default::default()
        },
        ca: CaConfig {
            cert_path: cli.ca_cert.clone(),
            key_path: cli.ca_key.clone(),
        },
        logging: LoggingConfig {
            dump_requests: cli.no_dump.then_some(false),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn create_test_cli(args: &[&str]) -> Cli {
        let mut argv = vec!["intercept-proxy"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("nonexistent_system.toml"),
            dir.path().join("nonexistent_user.toml"),
        );

        let config = loader.load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert!(config.intercept());
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();

        fs::write(
            dir.path().join("system.toml"),
            "[proxy]\nlisten = \"127.0.0.1:7000\"\nextra_roots = [\"system.pem\"]\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[proxy]\nlisten = \"127.0.0.1:7001\"\nextra_roots = [\"user.pem\"]\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 7001);
        assert_eq!(config.extra_roots().len(), 2);
    }

    #[test]
    fn test_cli_flags_override_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[proxy]\nlisten = \"127.0.0.1:7001\"\n[ca]\ncert_path = \"file.crt\"\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let cli = create_test_cli(&[
            "--listen",
            "127.0.0.1:9999",
            "--ca-cert",
            "cli.crt",
            "--no-intercept",
            "--no-dump",
        ]);
        let config = loader.load(&cli).unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 9999);
        assert_eq!(config.ca_cert_path(), Path::new("cli.crt"));
        assert!(!config.intercept());
        assert!(!config.dump_requests());
    }

    #[test]
    fn test_absent_cli_flags_keep_file_values() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[proxy]\nintercept = false\n[logging]\ndump_requests = false\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli(&[])).unwrap();

        assert!(!config.intercept());
        assert!(!config.dump_requests());
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let missing = dir.path().join("missing.toml");
        let cli = create_test_cli(&["--config", missing.to_str().unwrap()]);

        let err = loader.load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_cli_config_file_is_merged() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[proxy]\nconnect_timeout_ms = 1234\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let cli = create_test_cli(&["--config", extra.to_str().unwrap()]);
        let config = loader.load(&cli).unwrap();

        assert_eq!(config.connect_timeout().unwrap().as_millis(), 1234);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("invalid.toml"), "this is not valid TOML [[[").unwrap();

        let loader = ConfigLoader::with_paths(
            dir.path().join("invalid.toml"),
            dir.path().join("user.toml"),
        );

        let err = loader.load(&create_test_cli(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
