//! config
//!
//! Configuration schema and loading.
//!
//! # Locations
//!
//! Searched in order:
//! 1. `--config <path>` if given
//! 2. `~/.capstan.toml`
//! 3. `/etc/capstan.toml`
//!
//! # Secrets
//!
//! String fields holding credentials (`password`, `secret_key`,
//! `argocd_token`) accept an `env:VAR_NAME` value, resolved against the
//! process environment at load time. This keeps secrets out of the config
//! file without a second templating layer.

pub mod schema;

pub use schema::{Config, DeploymentConfig, RepositoryConfig};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the per-user config file, relative to the home directory.
const LOCAL_CONFIG_NAME: &str = ".capstan.toml";

/// System-wide fallback config path.
const GLOBAL_CONFIG_PATH: &str = "/etc/capstan.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("environment variable '{0}' referenced by config is not set")]
    MissingEnvVar(String),

    #[error("no config file found (tried ~/{LOCAL_CONFIG_NAME} and {GLOBAL_CONFIG_PATH})")]
    NotFound,
}

/// Resolve the config file path to load.
///
/// An explicit `--config` path wins and must exist. Otherwise the per-user
/// file is preferred over the system-wide one.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(home) = dirs::home_dir() {
        let local = home.join(LOCAL_CONFIG_NAME);
        if local.exists() {
            return Ok(local);
        }
    }
    let global = PathBuf::from(GLOBAL_CONFIG_PATH);
    if global.exists() {
        return Ok(global);
    }
    Err(ConfigError::NotFound)
}

/// Load, resolve secrets in, and validate a config file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config = toml::from_str(&raw).map_err(|err| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    resolve_secrets(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Replace `env:VAR` indirections in credential fields with the variable's
/// value. A referenced-but-unset variable is a startup error.
fn resolve_secrets(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(key) = config.secret_key.take() {
        config.secret_key = Some(resolve_secret(key)?);
    }
    if let Some(token) = config.argocd_token.take() {
        config.argocd_token = Some(resolve_secret(token)?);
    }
    for repo in &mut config.repositories {
        repo.password = resolve_secret(std::mem::take(&mut repo.password))?;
    }
    Ok(())
}

fn resolve_secret(value: String) -> Result<String, ConfigError> {
    match value.strip_prefix("env:") {
        None => Ok(value),
        Some(var) => {
            std::env::var(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
        }
    }
}
