//! # Runtime Configuration
//!
//! Layered configuration loading:
//!
//! 1. Built-in defaults
//! 2. JSON file named by `SYNCGW_CONFIG` (optional)
//! 3. `SYNCGW_*` environment overrides
//! 4. Validation

use std::path::{Path, PathBuf};
use std::time::Duration;

use sync_gateway::domain::config::humantime_serde::parse_duration;
use sync_gateway::domain::ConfigError;
use sync_gateway::GatewayConfig;

/// Environment variable naming the JSON config file.
pub const CONFIG_FILE_VAR: &str = "SYNCGW_CONFIG";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeConfigError {
    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for `GatewayConfig`.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An override variable holds a value of the wrong shape.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// The merged configuration failed validation.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<GatewayConfig, RuntimeConfigError> {
    load_config_from(|var| std::env::var(var).ok())
}

/// Load configuration using `env` as the variable source.
pub fn load_config_from<F>(env: F) -> Result<GatewayConfig, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match env(CONFIG_FILE_VAR) {
        Some(path) => read_config_file(Path::new(&path))?,
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, &env)?;
    config.validate()?;

    Ok(config)
}

/// Read a (possibly partial) JSON config file over the defaults.
pub fn read_config_file(path: &Path) -> Result<GatewayConfig, RuntimeConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuntimeConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuntimeConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides<F>(config: &mut GatewayConfig, env: &F) -> Result<(), RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Endpoints
    if let Some(url) = env("SYNCGW_UPSTREAM_URL") {
        config.upstream.base_url = url;
    }
    if let Some(url) = env("SYNCGW_CALLBACK_URL") {
        config.callback.base_url = url;
    }

    // Ports
    if let Some(port) = parsed(env, "SYNCGW_PROXY_PORT")? {
        config.proxy.port = port;
    }
    if let Some(port) = parsed(env, "SYNCGW_CALLBACK_PORT")? {
        config.callback.port = port;
    }
    if let Some(port) = parsed(env, "SYNCGW_ADMIN_PORT")? {
        config.admin.port = port;
    }
    if let Some(enabled) = parsed(env, "SYNCGW_ADMIN_ENABLED")? {
        config.admin.enabled = enabled;
    }

    // Timing
    if let Some(timeout) = duration(env, "SYNCGW_WAIT_TIMEOUT")? {
        config.wait.timeout = timeout;
    }
    if let Some(attempts) = parsed(env, "SYNCGW_POLL_MAX_ATTEMPTS")? {
        config.poll.max_attempts = attempts;
    }
    if let Some(interval) = duration(env, "SYNCGW_POLL_INTERVAL")? {
        config.poll.interval = interval;
    }
    if let Some(max_age) = duration(env, "SYNCGW_SWEEP_MAX_AGE")? {
        config.sweep.max_age = max_age;
    }

    // Logging
    if let Some(level) = env("SYNCGW_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = parsed(env, "SYNCGW_LOG_JSON")? {
        config.logging.json = json;
    }

    Ok(())
}

fn parsed<T, F>(env: &F, var: &'static str) -> Result<Option<T>, RuntimeConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    env(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| RuntimeConfigError::InvalidEnv {
                    var,
                    reason: e.to_string(),
                    value,
                })
        })
        .transpose()
}

fn duration<F>(env: &F, var: &'static str) -> Result<Option<Duration>, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(var)
        .map(|value| {
            parse_duration(&value).map_err(|reason| RuntimeConfigError::InvalidEnv {
                var,
                value: value.clone(),
                reason: reason.to_string(),
            })
        })
        .transpose()
}
