#![allow(clippy::result_large_err)]

use super::{parse_duration, PluginConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::logging::config::LogFormat;
use crate::server::ServerSettings;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::lookup_host;
use url::Url;

/// Environment variable naming the optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "DRONE_CONFIG_FILE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the configuration with deterministic precedence: defaults, config file,
    /// environment variables. The result is validated before it is returned.
    pub fn load(config_path: Option<&Path>) -> Result<PluginConfig, AppError> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?.ok_or_else(|| {
                AppError::new(
                    ErrorCategory::IoError,
                    format!("Config file {} does not exist", path.display()),
                )
            })?,
            None => PluginConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<PluginConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: PluginConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration
    /// Environment variables take precedence over config file values
    fn apply_env_overrides(config: &mut PluginConfig) -> Result<(), AppError> {
        // Server overrides
        if let Ok(bind) = env::var("DRONE_BIND") {
            if !bind.trim().is_empty() {
                config.server.bind = bind;
            }
        }

        if let Ok(secret) = env::var("DRONE_SECRET") {
            config.server.secret = secret;
        }

        if let Ok(max_body) = env::var("DRONE_MAX_BODY_BYTES") {
            config.server.max_body_bytes = max_body
                .trim()
                .parse()
                .map_err(|e| invalid_env("DRONE_MAX_BODY_BYTES", &max_body, e))?;
        }

        // Drone API overrides
        if let Ok(server) = env::var("DRONE_SERVER") {
            config.drone.server = server;
        }

        if let Ok(token) = env::var("DRONE_TOKEN") {
            config.drone.token = token;
        }

        // Evaluation overrides
        if let Ok(interval) = env::var("DRONE_EVAL_POLL_INTERVAL") {
            config.evaluation.poll_interval = parse_duration(&interval)
                .map_err(|e| invalid_env("DRONE_EVAL_POLL_INTERVAL", &interval, e))?;
        }

        if let Ok(timeout) = env::var("DRONE_EVAL_TIMEOUT") {
            config.evaluation.timeout = parse_duration(&timeout)
                .map_err(|e| invalid_env("DRONE_EVAL_TIMEOUT", &timeout, e))?;
        }

        if let Ok(policy) = env::var("DRONE_EVAL_DUPLICATE_JOBS") {
            config.evaluation.duplicate_jobs = policy
                .parse()
                .map_err(|e: String| invalid_env("DRONE_EVAL_DUPLICATE_JOBS", &policy, e))?;
        }

        // Logging overrides
        if let Ok(debug) = env::var("DRONE_DEBUG") {
            if let Ok(debug) = debug.trim().parse::<bool>() {
                config.logging.debug = debug;
            }
        }

        if let Ok(format) = env::var("DRONE_LOG_FORMAT") {
            config.logging.format = format
                .parse::<LogFormat>()
                .map_err(|e| invalid_env("DRONE_LOG_FORMAT", &format, e))?;
        }

        Ok(())
    }

    fn validate(config: &PluginConfig) -> Result<(), AppError> {
        if config.drone.token.is_empty() {
            return Err(missing("token key (DRONE_TOKEN)"));
        }
        if config.drone.server.is_empty() {
            return Err(missing("drone server (DRONE_SERVER)"));
        }
        config.drone.server_url()?;
        if config.evaluation.poll_interval.is_zero() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "evaluation.poll_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl PluginConfig {
    /// Listener settings for the `serve` command; the shared secret is mandatory here.
    pub async fn server_settings(&self) -> Result<ServerSettings, AppError> {
        if self.server.secret.is_empty() {
            return Err(missing("secret key (DRONE_SECRET)"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "server.max_body_bytes must be greater than zero",
            ));
        }
        Ok(ServerSettings {
            bind: self.server.bind_addr().await?,
            secret: self.server.secret.clone(),
            max_body_bytes: self.server.max_body_bytes,
        })
    }
}

impl super::ServerConfig {
    /// Resolve the bind address; `:PORT` listens on every interface and host
    /// names are looked up, the first address wins.
    pub async fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        let bind = self.bind.trim();
        let candidate = if bind.starts_with(':') {
            format!("0.0.0.0{}", bind)
        } else {
            bind.to_string()
        };
        let invalid = |reason: String| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid bind address {}: {}", self.bind, reason),
            )
        };
        let mut addrs = lookup_host(candidate.as_str())
            .await
            .map_err(|err| invalid(err.to_string()))?;
        addrs
            .next()
            .ok_or_else(|| invalid("resolves to no address".to_string()))
    }
}

impl super::DroneConfig {
    pub fn server_url(&self) -> Result<Url, AppError> {
        let url = Url::parse(self.server.trim()).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid drone server url {}: {}", self.server, err),
            )
        })?;
        if url.cannot_be_a_base() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("drone server url {} cannot be used as a base url", self.server),
            ));
        }
        Ok(url)
    }
}

fn missing(what: &str) -> AppError {
    AppError::new(ErrorCategory::ValidationError, format!("missing {}", what))
        .with_code("CFG-MISSING")
}

fn invalid_env(name: &str, value: &str, err: impl std::fmt::Display) -> AppError {
    AppError::new(
        ErrorCategory::ValidationError,
        format!("invalid value '{}' for {}: {}", value, name, err),
    )
    .with_context("variable", name)
}
