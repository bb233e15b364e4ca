//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "latchkey.toml",
    "./config/latchkey.toml",
    "/etc/latchkey/config.toml",
];

const ENV_PREFIX: &str = "LATCHKEY_";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable source
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup)?;
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Some(path) = lookup("LATCHKEY_CONFIG").map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parsed<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let key = format!("{ENV_PREFIX}{name}");
    match lookup(&key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvError(format!("{key} has invalid value '{raw}'"))),
        None => Ok(None),
    }
}

fn text<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{ENV_PREFIX}{name}"))
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Coordination
    if let Some(val) = text(lookup, "CONNECT_STRING") {
        config.coordination.connect_string = val;
    }
    if let Some(val) = parsed(lookup, "SESSION_TIMEOUT_MS")? {
        config.coordination.session_timeout_ms = val;
    }
    if let Some(val) = parsed(lookup, "CONNECTION_TIMEOUT_MS")? {
        config.coordination.connection_timeout_ms = val;
    }
    if let Some(val) = parsed(lookup, "BASE_SLEEP_MS")? {
        config.coordination.base_sleep_ms = val;
    }
    if let Some(val) = parsed(lookup, "MAX_RETRIES")? {
        config.coordination.max_retries = val;
    }

    // Election
    if let Some(val) = text(lookup, "SCENE") {
        config.election.scene = val;
    }
    if let Some(val) = text(lookup, "CANDIDATE_ID") {
        config.election.candidate_id = val;
    }
    if let Some(val) = parsed(lookup, "RETRY_DELAY_MS")? {
        config.election.retry_delay_ms = val;
    }
    if let Some(val) = parsed(lookup, "RETRY_JITTER_MS")? {
        config.election.retry_jitter_ms = val;
    }

    // Probe
    if let Some(val) = parsed(lookup, "PROBE_READY_TIMEOUT_MS")? {
        config.probe.ready_timeout_ms = val;
    }
    if let Some(val) = parsed(lookup, "PROBE_POLL_INTERVAL_MS")? {
        config.probe.poll_interval_ms = val;
    }

    // Dev
    if let Some(val) = parsed(lookup, "DEV_CANDIDATES")? {
        config.dev.candidates = val;
    }
    if let Some(val) = parsed(lookup, "DEV_STATUS_PORT")? {
        config.dev.status_port = val;
    }

    Ok(())
}
