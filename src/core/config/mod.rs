use crate::core::converter::ConverterOptions;
use crate::core::evaluation::{WaitOptions, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::core::manifest::DuplicateJobPolicy;
use crate::logging::config::LoggingConfig;
use serde::Deserialize;
use std::time::Duration;

pub mod loader;

pub use loader::ConfigLoader;

/// Plugin configuration loaded from an optional TOML file and `DRONE_*` variables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PluginConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub drone: DroneConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings for the extension endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on; `:PORT` binds every interface.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared secret used to verify request signatures
    #[serde(default)]
    pub secret: String,

    /// Upper bound for request bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Drone server the evaluation builds are created on.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DroneConfig {
    /// Base URL, e.g. `https://drone.example.com`
    #[serde(default)]
    pub server: String,

    /// API token with permission to create builds and read logs
    #[serde(default)]
    pub token: String,
}

/// Evaluation wait and manifest merge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde_compat")]
    pub poll_interval: Duration,

    /// Zero disables the deadline.
    #[serde(default = "default_timeout", with = "humantime_serde_compat")]
    pub timeout: Duration,

    #[serde(default)]
    pub duplicate_jobs: DuplicateJobPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            secret: String::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            duplicate_jobs: DuplicateJobPolicy::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: self.poll_interval,
            timeout: (!self.timeout.is_zero()).then_some(self.timeout),
        }
    }
}

impl PluginConfig {
    pub fn converter_options(&self) -> ConverterOptions {
        ConverterOptions {
            wait: self.evaluation.wait_options(),
            duplicate_jobs: self.evaluation.duplicate_jobs,
        }
    }
}

// Default functions
fn default_bind() -> String {
    ":3000".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Parse a humantime duration (`500ms`, `30m`); a bare `0` is accepted as zero.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    let raw = raw.trim();
    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw)
}

mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
