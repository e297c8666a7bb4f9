//! Worker process configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Settings for the `agent-dispatchd` worker process.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// libSQL database file holding the shared queue and registry.
    pub db_path: PathBuf,
    /// JSON file with an array of agent definitions.
    pub agents_file: PathBuf,
    pub reaper_interval: Duration,
    pub heartbeat_interval: Duration,
    pub dispatch_poll_interval: Duration,
    /// When set, logs also go to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,
    /// Optional port advertised in registrations.
    pub advertised_port: Option<u16>,
    pub anthropic_api_key: SecretString,
    /// Override for the Messages API base URL.
    pub anthropic_base_url: Option<String>,
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let anthropic_api_key = get("ANTHROPIC_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        Ok(Self {
            db_path: get("AGENT_DISPATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/agent-dispatch.db")),
            agents_file: get("AGENT_DISPATCH_AGENTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./agents.json")),
            reaper_interval: duration_secs(&get, "AGENT_DISPATCH_REAPER_INTERVAL_SECS", 60)?,
            heartbeat_interval: duration_secs(&get, "AGENT_DISPATCH_HEARTBEAT_INTERVAL_SECS", 30)?,
            dispatch_poll_interval: duration_millis(&get, "AGENT_DISPATCH_POLL_INTERVAL_MS", 1000)?,
            log_dir: get("AGENT_DISPATCH_LOG_DIR").map(PathBuf::from),
            advertised_port: get("AGENT_DISPATCH_PORT")
                .map(|v| parse(&v, "AGENT_DISPATCH_PORT"))
                .transpose()?,
            anthropic_api_key,
            anthropic_base_url: get("ANTHROPIC_BASE_URL"),
        })
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn positive(value: u64, key: &str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn duration_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs = match get(key) {
        Some(raw) => positive(parse(&raw, key)?, key)?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}

fn duration_millis(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let ms = match get(key) {
        Some(raw) => positive(parse(&raw, key)?, key)?,
        None => default,
    };
    Ok(Duration::from_millis(ms))
}
