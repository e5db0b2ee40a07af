//! Access to the Drone REST API used by the evaluation and extraction phases.

pub mod client;
pub mod types;

pub use client::DroneClient;
pub use types::{Build, BuildStatus, LogLine, Stage, Step};

use async_trait::async_trait;
use std::collections::BTreeMap;

/// The three Drone operations a conversion depends on.
///
/// Implementations must be safe to share between concurrent conversions.
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Create a build for `commit`/`branch` carrying `params` as trigger parameters.
    async fn create_build(
        &self,
        namespace: &str,
        name: &str,
        commit: &str,
        branch: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Build, ApiError>;

    /// Fetch the current state of a build, including its stage/step topology.
    async fn build(&self, namespace: &str, name: &str, number: i64) -> Result<Build, ApiError>;

    /// Fetch the log lines of one step.
    async fn logs(
        &self,
        namespace: &str,
        name: &str,
        number: i64,
        stage: i64,
        step: i64,
    ) -> Result<Vec<LogLine>, ApiError>;
}

/// Error types for Drone API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error("network error calling {url}: {message}")]
    Network { url: String, message: String },
    #[error("server returned {status} for {url}: {body}")]
    Server {
        url: String,
        status: u16,
        body: String,
    },
    #[error("cannot decode response from {url}: {message}")]
    Decode { url: String, message: String },
}
