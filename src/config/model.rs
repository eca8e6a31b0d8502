//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a default so the bridge starts with an empty file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The HTTP(S) listener that browsers connect to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// PEM certificate chain. HTTPS is served only when both this and
    /// `tls_key` are set.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    /// Exact `Origin` header value browsers must send. Unset allows any.
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            tls_cert: None,
            tls_key: None,
            allowed_origin: None,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Certificate and key paths, if HTTPS is configured.
    pub fn tls_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// The IRC server every session is bridged to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrcConfig {
    #[serde(default = "default_irc_host")]
    pub host: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            host: default_irc_host(),
            port: default_irc_port(),
            tls: true,
            accept_invalid_certs: false,
        }
    }
}

/// Admission control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent sessions allowed per client IP. `0` disables the limit.
    #[serde(default = "default_max_sessions_per_ip")]
    pub max_sessions_per_ip: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_ip: default_max_sessions_per_ip(),
        }
    }
}

/// Diagnostic logging. `RUST_LOG` takes precedence over both fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Shorthand for `level = "debug"`.
    #[serde(default)]
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug: false,
        }
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    8080
}
fn default_irc_host() -> String {
    "irc.libera.chat".to_string()
}
fn default_irc_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_max_sessions_per_ip() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}
