//! Latchkey Configuration System
//!
//! TOML-based configuration with environment variable overrides. The election
//! core takes its inputs programmatically; this crate is how binaries build
//! those inputs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordination: CoordinationConfig,
    pub election: ElectionConfig,
    pub probe: ProbeConfig,
    pub dev: DevConfig,
}

/// Coordination service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Comma separated `host:port` list
    pub connect_string: String,
    pub session_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    /// Base sleep of the client's exponential connection backoff
    pub base_sleep_ms: u64,
    /// Attempts the client makes before reporting a connection failure
    pub max_retries: u32,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            connect_string: "127.0.0.1:2181".to_string(),
            session_timeout_ms: 60_000,
            connection_timeout_ms: 15_000,
            base_sleep_ms: 1_000,
            max_retries: 3,
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn base_sleep(&self) -> Duration {
        Duration::from_millis(self.base_sleep_ms)
    }
}

/// Election participation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Scene name; the contest lives at `/election/<scene>`
    pub scene: String,
    /// Candidate id (generated when empty)
    pub candidate_id: String,
    /// Fixed delay between provisioning and repair attempts
    pub retry_delay_ms: u64,
    /// Upper bound of random delay added to each retry (0 disables jitter)
    pub retry_jitter_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            scene: "default".to_string(),
            candidate_id: String::new(),
            retry_delay_ms: 2_000,
            retry_jitter_ms: 0,
        }
    }
}

impl ElectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_jitter(&self) -> Option<Duration> {
        (self.retry_jitter_ms > 0).then(|| Duration::from_millis(self.retry_jitter_ms))
    }
}

/// Readiness polling of a server's status port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Give up waiting for a ready `stat` reply after this long
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 30_000,
            poll_interval_ms: 50,
        }
    }
}

/// Development binary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Number of in-process candidates to run
    pub candidates: usize,
    /// Port for the embedded status listener (0 picks a free port)
    pub status_port: u16,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            candidates: 3,
            status_port: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the election service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordination.connect_string.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "coordination.connect_string must not be empty".to_string(),
            ));
        }
        if self.election.scene.is_empty() || self.election.scene.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "election.scene '{}' must be non-empty and must not contain '/'",
                self.election.scene
            )));
        }
        if self.election.retry_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "election.retry_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.dev.candidates == 0 {
            return Err(ConfigError::ValidationError(
                "dev.candidates must be at least 1".to_string(),
            ));
        }
        if self.coordination.connection_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "coordination.connection_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Latchkey Configuration
# Environment variables (LATCHKEY_*) override these settings

[coordination]
connect_string = "127.0.0.1:2181"
session_timeout_ms = 60000
connection_timeout_ms = 15000
base_sleep_ms = 1000
max_retries = 3

[election]
scene = "default"
candidate_id = ""  # generated when empty
retry_delay_ms = 2000
retry_jitter_ms = 0

[probe]
ready_timeout_ms = 30000
poll_interval_ms = 50

[dev]
candidates = 3
status_port = 0
"#
        .to_string()
    }
}
