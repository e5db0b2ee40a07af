#![allow(clippy::result_large_err)] // Server helpers return AppError for consistent diagnostics.

//! HTTP endpoint speaking Drone's conversion extension protocol.

pub mod signature;

use crate::core::converter::{ConversionRequest, ConvertError, Converter};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Extension},
    http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode, Uri},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use signature::Verifier;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::util::MapResponseLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

/// State shared across extension requests.
struct ServerState {
    converter: Converter,
    verifier: Verifier,
}

/// Listener settings resolved from the plugin configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub secret: String,
    pub max_body_bytes: usize,
}

/// Incoming conversion request as posted by the Drone server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtensionRequest {
    #[serde(default)]
    pub build: BuildInfo,
    #[serde(default)]
    pub repo: RepoInfo,
    #[serde(default)]
    pub config: ConfigData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildInfo {
    pub event: String,
    pub action: String,
    pub trigger: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub source: String,
    pub target: String,
    pub before: String,
    pub after: String,
    pub params: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "default_branch")]
    pub branch: String,
    #[serde(rename = "config_path")]
    pub config: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigData {
    pub data: String,
}

impl From<ExtensionRequest> for ConversionRequest {
    fn from(req: ExtensionRequest) -> Self {
        ConversionRequest {
            config: req.config.data,
            repo_namespace: req.repo.namespace,
            repo_name: req.repo.name,
            repo_branch: req.repo.branch,
            repo_config: req.repo.config,
            build_ref: req.build.git_ref,
            build_event: req.build.event,
            build_action: req.build.action,
            build_source: req.build.source,
            build_target: req.build.target,
            build_trigger: req.build.trigger,
            build_before: req.build.before,
            build_after: req.build.after,
            trigger_params: req.build.params.unwrap_or_default(),
        }
    }
}

/// Build the extension router.
pub fn router(converter: Converter, secret: &str, max_body_bytes: usize) -> Router {
    let state = Arc::new(ServerState {
        converter,
        verifier: Verifier::new(secret),
    });
    Router::new()
        .route("/", post(handle_convert))
        .route("/healthz", get(healthz))
        .layer(Extension(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(MapResponseLayer::new(|mut response: Response<Body>| {
            if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
                *response.body_mut() = Body::from("payload too large");
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                );
            }
            response
        }))
}

/// Start the listener and block until the service terminates.
pub async fn serve(converter: Converter, settings: ServerSettings) -> Result<(), AppError> {
    serve_internal(converter, settings, None).await
}

/// Start the listener and notify once the bind address is known (test helper).
pub async fn serve_with_ready_notifier(
    converter: Converter,
    settings: ServerSettings,
    ready_notifier: oneshot::Sender<SocketAddr>,
) -> Result<(), AppError> {
    serve_internal(converter, settings, Some(ready_notifier)).await
}

async fn serve_internal(
    converter: Converter,
    settings: ServerSettings,
    ready_notifier: Option<oneshot::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    let router = router(converter, &settings.secret, settings.max_body_bytes);
    let listener = TcpListener::bind(settings.bind).await.map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to bind listener {}: {}", settings.bind, err),
        )
    })?;
    let local_addr = listener.local_addr().map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to determine listener address: {}", err),
        )
    })?;
    if let Some(tx) = ready_notifier {
        let _ = tx.send(local_addr);
    }
    info!("server listening on address {}", local_addr);
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| {
            AppError::new(
                ErrorCategory::NetworkError,
                format!("server terminated: {}", err),
            )
        })
}

async fn healthz() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "OK")
}

async fn handle_convert(
    Extension(state): Extension<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Rejection> {
    state
        .verifier
        .verify(&method, &uri, &headers, &body)
        .map_err(|err| {
            tracing::debug!(error = %err, "rejecting request");
            Rejection::bad_request("invalid or missing signature")
        })?;

    let request: ExtensionRequest = serde_json::from_slice(&body)
        .map_err(|_| Rejection::bad_request("invalid JSON payload"))?;
    let request = ConversionRequest::from(request);

    let result = state.converter.convert(&request).await.map_err(|err| {
        match &err {
            ConvertError::Eval(eval) => {
                tracing::error!(error = %err, build = ?eval.build_number(), "conversion failed")
            }
            _ => tracing::error!(error = %err, "conversion failed"),
        }
        Rejection::internal(err.to_string())
    })?;
    Ok(Json(json!({ "data": result.into_config() })))
}

struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response<Body> {
        let mut resp = self.message.into_response();
        *resp.status_mut() = self.status;
        resp
    }
}
