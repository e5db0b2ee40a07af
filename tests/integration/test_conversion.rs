use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drone_nix_convert::core::converter::{
    ConversionRequest, ConversionResult, ConvertError, Converter, ConverterOptions,
};
use drone_nix_convert::core::evaluation::{EvalError, WaitOptions, EVAL_JOBSET_PARAM};
use drone_nix_convert::core::manifest::{DuplicateJobPolicy, ExtractError};
use drone_nix_convert::core::resource::{self, StageRole};
use drone_nix_convert::drone::DroneClient;
use reqwest::Url;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CONFIG: &str = r#"kind: pipeline
name: evaluate
nix-jobset: true
steps:
- name: eval
  image: nixos/nix
---
kind: pipeline
name: build
nix-build: true
steps:
- name: build
  commands:
  - nix-build $artifactPath
---
kind: pipeline
name: notify
nix-post-build: true
depends_on:
- lint
---
kind: secret
name: token
"#;

const REPO: &str = "/api/repos/octocat/hello";

/// Answers status checks from a list; the last entry repeats.
struct StatusSequence {
    calls: AtomicUsize,
    statuses: Vec<&'static str>,
    stages: Value,
}

impl StatusSequence {
    fn new(statuses: &[&'static str], stages: Value) -> Self {
        StatusSequence {
            calls: AtomicUsize::new(0),
            statuses: statuses.to_vec(),
            stages,
        }
    }
}

impl Respond for StatusSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.statuses[call.min(self.statuses.len() - 1)];
        let mut body = json!({"id": 100, "number": 42, "status": status});
        if status == "success" {
            body["stages"] = self.stages.clone();
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}

fn log_lines(messages: &[&str]) -> Value {
    Value::Array(
        messages
            .iter()
            .enumerate()
            .map(|(pos, out)| json!({"pos": pos, "out": format!("{}\n", out), "time": 0}))
            .collect(),
    )
}

fn payload(jobs: Value) -> Value {
    log_lines(&[
        "+ hydra-eval-jobs --flake .#hydraJobs",
        "<hydra-eval-jobs>",
        &jobs.to_string(),
        "</hydra-eval-jobs>",
    ])
}

fn request() -> ConversionRequest {
    ConversionRequest {
        config: CONFIG.to_string(),
        repo_namespace: "octocat".to_string(),
        repo_name: "hello".to_string(),
        repo_branch: "main".to_string(),
        repo_config: ".drone.yml".to_string(),
        build_ref: "refs/heads/main".to_string(),
        build_event: "push".to_string(),
        ..ConversionRequest::default()
    }
}

fn converter(server: &MockServer, duplicate_jobs: DuplicateJobPolicy) -> Converter {
    let url = Url::parse(&server.uri()).expect("invalid mock server URL");
    Converter::new(
        Arc::new(DroneClient::new(url, "api-token")),
        ConverterOptions {
            wait: WaitOptions {
                poll_interval: Duration::from_millis(10),
                timeout: Some(Duration::from_secs(5)),
            },
            duplicate_jobs,
        },
    )
}

async fn mount_create(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("{}/builds", REPO)))
        .and(|req: &Request| {
            req.url.query_pairs().any(|(key, value)| {
                key == EVAL_JOBSET_PARAM
                    && value.contains("name: evaluate")
                    && !value.contains("nix-jobset")
            })
        })
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 100, "number": 42, "status": "pending"})),
        )
        .mount(server)
        .await;
}

async fn mount_logs(server: &MockServer, stage: i64, step: i64, lines: Value) {
    Mock::given(method("GET"))
        .and(path(format!("{}/builds/42/logs/{}/{}", REPO, stage, step)))
        .respond_with(ResponseTemplate::new(200).set_body_json(lines))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_dynamic_configuration_is_expanded_per_job() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/builds/42", REPO)))
        .respond_with(StatusSequence::new(
            &["pending", "running", "success"],
            json!([{"number": 1, "name": "evaluate", "steps": [
                {"number": 1, "name": "clone"},
                {"number": 2, "name": "eval"}
            ]}]),
        ))
        .expect(3)
        .mount(&server)
        .await;
    mount_logs(&server, 1, 1, log_lines(&["+ git clone"])).await;
    mount_logs(
        &server,
        1,
        2,
        payload(json!({
            "job": {"artifactPath": "/store/foo.drv", "dependencyPaths": ["/store/dep.drv"]},
            "docs": {"artifactPath": "/store/docs.drv", "dependencyPaths": []}
        })),
    )
    .await;

    let result = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&request())
        .await
        .unwrap();
    let ConversionResult::Rendered(text) = result else {
        panic!("expected a rendered configuration, got {:?}", result);
    };

    let documents = resource::parse(&text).unwrap();
    let names: Vec<_> = documents.iter().map(|d| d.name().unwrap().to_string()).collect();
    assert_eq!(names, vec!["token", "build (job)", "notify"]);

    let build = &documents[1];
    assert_eq!(build.role(), StageRole::Other);
    let env = build.environment.as_ref().unwrap();
    assert_eq!(
        env.get("artifactPath").and_then(|v| v.as_str()),
        Some("/store/foo.drv")
    );
    assert_eq!(
        documents[2].depends_on,
        Some(vec!["lint".to_string(), "build (job)".to_string()])
    );
    assert!(text.starts_with("---\nkind: secret\n"));
    assert!(!text.contains("nix-build:"));
    assert!(!text.contains("nix-post-build:"));
}

#[tokio::test]
async fn test_later_step_overwrites_duplicate_job() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/builds/42", REPO)))
        .respond_with(StatusSequence::new(
            &["success"],
            json!([{"number": 1, "steps": [{"number": 1}, {"number": 2}]}]),
        ))
        .mount(&server)
        .await;
    mount_logs(
        &server,
        1,
        1,
        payload(json!({"job": {"artifactPath": "/store/first.drv", "dependencyPaths": ["/d"]}})),
    )
    .await;
    mount_logs(
        &server,
        1,
        2,
        payload(json!({"job": {"artifactPath": "/store/second.drv", "dependencyPaths": ["/d"]}})),
    )
    .await;

    let text = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&request())
        .await
        .unwrap()
        .into_config();
    assert!(text.contains("/store/second.drv"));
    assert!(!text.contains("/store/first.drv"));
    let builds = resource::parse(&text)
        .unwrap()
        .into_iter()
        .filter(|d| d.name() == Some("build (job)"))
        .count();
    assert_eq!(builds, 1);

    let err = converter(&server, DuplicateJobPolicy::Reject)
        .convert(&request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Extract(ExtractError::DuplicateJob { ref job, step: 2, .. }) if job == "job"
    ));
}

#[tokio::test]
async fn test_failed_evaluation_build_is_reported() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/builds/42", REPO)))
        .respond_with(StatusSequence::new(&["running", "failure"], json!([])))
        .mount(&server)
        .await;

    let err = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&request())
        .await
        .unwrap_err();
    match err {
        ConvertError::Eval(EvalError::Failed { build, status }) => {
            assert_eq!(build, 42);
            assert_eq!(status.as_str(), "failure");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_gives_up_after_timeout() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/builds/42", REPO)))
        .respond_with(StatusSequence::new(&["running"], json!([])))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let converter = Converter::new(
        Arc::new(DroneClient::new(url, "api-token")),
        ConverterOptions {
            wait: WaitOptions {
                poll_interval: Duration::from_millis(10),
                timeout: Some(Duration::from_millis(60)),
            },
            duplicate_jobs: DuplicateJobPolicy::Overwrite,
        },
    );
    let err = converter.convert(&request()).await.unwrap_err();
    assert!(matches!(err, ConvertError::Eval(EvalError::TimedOut { build: 42, .. })));
}

#[tokio::test]
async fn test_static_configuration_never_calls_drone() {
    let server = MockServer::start().await;
    let mut req = request();
    req.config = "kind: pipeline\nname: plain\nsteps: []\n".to_string();

    let result = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&req)
        .await
        .unwrap();
    assert_eq!(result, ConversionResult::Passthrough(req.config.clone()));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_jobset_without_build_pipeline_never_calls_drone() {
    let server = MockServer::start().await;
    let mut req = request();
    req.config = "\
kind: pipeline
name: evaluate
nix-jobset: true
---
kind: pipeline
name: notify
nix-post-build: true
"
    .to_string();

    let result = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&req)
        .await
        .unwrap();
    assert_eq!(result, ConversionResult::Passthrough(req.config.clone()));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_build_replays_stored_jobset() {
    let server = MockServer::start().await;
    let mut req = request();
    req.build_event = "custom".to_string();
    req.trigger_params = BTreeMap::from([(
        EVAL_JOBSET_PARAM.to_string(),
        "---\nkind: pipeline\nname: evaluate\n".to_string(),
    )]);

    let result = converter(&server, DuplicateJobPolicy::Overwrite)
        .convert(&req)
        .await
        .unwrap();
    assert_eq!(
        result,
        ConversionResult::Replayed("---\nkind: pipeline\nname: evaluate\n".to_string())
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}
