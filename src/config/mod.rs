pub mod model;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub use model::{BridgeConfig, IrcConfig, LimitsConfig, LoggingConfig, ServerConfig};

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crabbridge")
        .join("config.toml")
}

/// Load the configuration file, then apply environment overrides.
///
/// Without an explicit path a missing default file just means defaults; an
/// explicit path that does not exist is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = match explicit {
        Some(path) => read_file(path)?,
        None => {
            let path = config_path();
            if path.exists() {
                read_file(&path)?
            } else {
                BridgeConfig::default()
            }
        }
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<BridgeConfig> {
    Ok(toml::from_str(contents)?)
}

/// Override file settings from the environment.
///
/// Variable names match the ones deployments of the bridge already use
/// (`IRC_HOST`, `MAX_PER_IP`, ...). Empty values are treated as unset.
pub fn apply_env<F>(config: &mut BridgeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get("LISTEN_HOST") {
        config.server.listen_host = v;
    }
    if let Some(v) = get("LISTEN_PORT") {
        config.server.listen_port = v
            .parse()
            .with_context(|| format!("LISTEN_PORT is not a port number: {v:?}"))?;
    }
    if let Some(v) = get("SSL_CERT") {
        config.server.tls_cert = Some(PathBuf::from(v));
    }
    if let Some(v) = get("SSL_KEY") {
        config.server.tls_key = Some(PathBuf::from(v));
    }
    if let Some(v) = get("ALLOWED_ORIGIN") {
        config.server.allowed_origin = Some(v);
    }
    if let Some(v) = get("IRC_HOST") {
        config.irc.host = v;
    }
    if let Some(v) = get("IRC_PORT") {
        config.irc.port = v
            .parse()
            .with_context(|| format!("IRC_PORT is not a port number: {v:?}"))?;
    }
    if let Some(v) = get("IRC_USE_SSL") {
        config.irc.tls = v == "true";
    }
    if let Some(v) = get("MAX_PER_IP") {
        config.limits.max_sessions_per_ip = v
            .parse()
            .with_context(|| format!("MAX_PER_IP is not a number: {v:?}"))?;
    }
    if let Some(v) = get("DEBUG") {
        config.logging.debug = v == "true";
    }
    Ok(())
}

pub fn validate(config: &BridgeConfig) -> Result<()> {
    if config.irc.host.trim().is_empty() {
        bail!("irc.host must not be empty");
    }
    if config.server.tls_cert.is_some() != config.server.tls_key.is_some() {
        bail!("server.tls_cert and server.tls_key must be set together");
    }
    Ok(())
}
