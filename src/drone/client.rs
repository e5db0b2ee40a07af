use super::{ApiError, Build, BuildApi, LogLine};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-request budget for a single API call; the evaluation wait bounds the whole loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Drone REST API authenticated with a bearer token.
#[derive(Clone)]
pub struct DroneClient {
    http: reqwest::Client,
    server: Url,
    token: String,
}

impl DroneClient {
    pub fn new(server: Url, token: impl Into<String>) -> Self {
        DroneClient {
            http: reqwest::Client::new(),
            server,
            token: token.into(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.server.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.server.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ApiError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl BuildApi for DroneClient {
    async fn create_build(
        &self,
        namespace: &str,
        name: &str,
        commit: &str,
        branch: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Build, ApiError> {
        let mut query = params.clone();
        if !commit.is_empty() {
            query.insert("commit".to_string(), commit.to_string());
        }
        if !branch.is_empty() {
            query.insert("branch".to_string(), branch.to_string());
        }

        let mut url = self.endpoint(&["api", "repos", namespace, name, "builds"])?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        tracing::debug!(%url, "creating build");
        self.send(self.http.post(url.clone()), &url).await
    }

    async fn build(&self, namespace: &str, name: &str, number: i64) -> Result<Build, ApiError> {
        let number = number.to_string();
        let url = self.endpoint(&["api", "repos", namespace, name, "builds", &number])?;
        self.send(self.http.get(url.clone()), &url).await
    }

    async fn logs(
        &self,
        namespace: &str,
        name: &str,
        number: i64,
        stage: i64,
        step: i64,
    ) -> Result<Vec<LogLine>, ApiError> {
        let (number, stage, step) = (number.to_string(), stage.to_string(), step.to_string());
        let url = self.endpoint(&[
            "api", "repos", namespace, name, "builds", &number, "logs", &stage, &step,
        ])?;
        self.send(self.http.get(url.clone()), &url).await
    }
}
