use crate::config::models::Config;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `host:port`.
pub const LISTEN_ENV: &str = "LISTEN";

/// Read from the working directory when no config file is named.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_str(&content)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Loads `explicit` if given, else `fallback` if it exists, else the defaults.
pub fn load_config(explicit: Option<&Path>, fallback: &Path) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => parse_config(path),
        None if fallback.is_file() => parse_config(fallback),
        None => {
            tracing::debug!(path = %fallback.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }
}

pub fn parse_str(content: &str) -> Result<Config, ConfigError> {
    // An empty document means "all defaults".
    if content.trim().is_empty() {
        return validate(Config::default());
    }
    let config: Config = serde_yaml::from_str(content)?;
    validate(config)
}

/// Applies `LISTEN=host:port` if it is set.
pub fn apply_env(config: &mut Config) -> Result<(), ConfigError> {
    match std::env::var(LISTEN_ENV) {
        Ok(listen) => apply_listen(config, &listen),
        Err(_) => Ok(()),
    }
}

fn apply_listen(config: &mut Config, listen: &str) -> Result<(), ConfigError> {
    let (host, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::Invalid(format!("{LISTEN_ENV} must be host:port, got {listen:?}")))?;
    config.port = port
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid port in {LISTEN_ENV}: {port:?}")))?;
    config.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok(())
}

pub fn validate(config: Config) -> Result<Config, ConfigError> {
    if config.host.is_empty() {
        return Err(ConfigError::Invalid("host must not be empty".into()));
    }
    if config.read_chunk_size == 0 {
        return Err(ConfigError::Invalid("read_chunk_size must be non-zero".into()));
    }
    if config.max_line_bytes == 0 {
        return Err(ConfigError::Invalid("max_line_bytes must be non-zero".into()));
    }
    if config.max_events == 0 {
        return Err(ConfigError::Invalid("max_events must be non-zero".into()));
    }
    Ok(config)
}
