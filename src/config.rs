//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `MICROKIT_KEY_FILE`, `MICROKIT_LOG_DIR`
//!    (the key-file *passphrase* is env-only: `MICROKIT_KEY_PASSPHRASE`,
//!    read by the key store, never stored in this struct)
//! 2. **Config file** — path via [`Config::load`], or `microkit.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! app_name = "my-service"
//! log_directory = "log"
//! view_directory = "views"
//! key_file = "keys.enc"        # optional — omit to disable private routes
//!
//! [logging]
//! level = "info"
//! normalize_loopback = true
//!
//! # Optional — omit entirely to serve plain HTTP
//! [transport]
//! cert = "/etc/microkit/cert.pem"
//! key = "/etc/microkit/key.pem"
//! force_secure = true          # redirect insecure requests to https
//! redirect_from = 8080         # plain-HTTP port answering with redirects
//! ```
//!
//! The configuration is immutable once serving begins: [`crate::Server::listen`]
//! consumes the server (and the `Config` inside it), so there is no handle
//! left to mutate.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application name, prefixed to every request log line.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Directory for rolling log files. Override with `MICROKIT_LOG_DIR`.
    /// `None` logs to stdout only.
    pub log_directory: Option<PathBuf>,
    /// Directory holding view templates (consumed by the embedding
    /// application's template engine, not by this crate).
    pub view_directory: Option<PathBuf>,
    /// Path to the encrypted API-key file. Override with `MICROKIT_KEY_FILE`.
    /// `None` means private routes deny everything (misconfigured state).
    pub key_file: Option<PathBuf>,
    /// Optional TLS transport. `None` serves plain HTTP.
    pub transport: Option<TransportConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TLS transport settings.
///
/// `cert` and `key` together enable TLS termination and must both be
/// readable at startup — the server fails fast rather than silently serving
/// plaintext. `force_secure` alone (no cert/key) suits deployments behind a
/// TLS-terminating proxy that sets `x-forwarded-proto`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// PEM certificate chain path.
    pub cert: Option<PathBuf>,
    /// PEM private key path.
    pub key: Option<PathBuf>,
    /// Redirect insecure requests to their `https://` equivalent (default
    /// false).
    #[serde(default)]
    pub force_secure: bool,
    /// Plain-HTTP port to answer with redirects when `force_secure` is on.
    /// Omit to rely on `x-forwarded-proto` from a fronting proxy instead.
    pub redirect_from: Option<u16>,
}

/// Request-log formatting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Display `::1` clients as `127.0.0.1` in log lines (default true).
    /// A display convenience, not a correctness knob.
    #[serde(default = "default_normalize_loopback")]
    pub normalize_loopback: bool,
}

fn default_app_name() -> String {
    "microkit".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_normalize_loopback() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            log_directory: None,
            view_directory: None,
            key_file: None,
            transport: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            normalize_loopback: default_normalize_loopback(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `microkit.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("microkit.toml").exists() {
            Self::from_file(Path::new("microkit.toml"))?
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(key_file) = std::env::var("MICROKIT_KEY_FILE") {
            config.key_file = Some(PathBuf::from(key_file));
        }
        if let Ok(log_dir) = std::env::var("MICROKIT_LOG_DIR") {
            config.log_directory = Some(PathBuf::from(log_dir));
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
