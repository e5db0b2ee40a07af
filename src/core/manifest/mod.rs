//! Job manifests harvested from evaluation build logs.
//!
//! An evaluation step prints its job table between two sentinel lines:
//!
//! ```text
//! <hydra-eval-jobs>
//! {"hello": {"artifactPath": "/nix/store/...-hello.drv", "dependencyPaths": ["..."]}}
//! </hydra-eval-jobs>
//! ```
//!
//! Everything before the start line and after the end line is ignored, and only
//! the first block of a step is read. A block that is opened but never closed is
//! an error rather than a silently truncated payload.

use crate::core::context::RequestContext;
use crate::drone::{ApiError, Build, BuildApi, LogLine};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const START_SENTINEL: &str = "<hydra-eval-jobs>";
pub const END_SENTINEL: &str = "</hydra-eval-jobs>";

/// One evaluated job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "artifactPath", alias = "drvPath")]
    pub artifact_path: String,
    #[serde(rename = "dependencyPaths", alias = "builds", default)]
    pub dependency_paths: Vec<String>,
}

impl Job {
    /// Jobs without dependency paths produced nothing buildable.
    pub fn is_buildable(&self) -> bool {
        !self.dependency_paths.is_empty()
    }
}

/// Job name to job, in first-seen order.
pub type JobManifest = IndexMap<String, Job>;

/// What to do when two steps report the same job name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateJobPolicy {
    /// The step processed last (stage order, then step order) wins.
    #[default]
    Overwrite,
    Reject,
}

impl FromStr for DuplicateJobPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "overwrite" => Ok(DuplicateJobPolicy::Overwrite),
            "reject" => Ok(DuplicateJobPolicy::Reject),
            _ => Err(format!(
                "invalid duplicate job policy '{}'; supported values are overwrite, reject",
                value
            )),
        }
    }
}

impl fmt::Display for DuplicateJobPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateJobPolicy::Overwrite => write!(f, "overwrite"),
            DuplicateJobPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Failure to read the sentinel block of a single step.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("start marker on line {line} is never closed by {}", END_SENTINEL)]
    Unterminated { line: usize },
    #[error("cannot decode job table: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised while collecting the manifest from a completed build.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("cannot get logs for step {namespace}/{name}/{build}/{stage}/{step}: {source}")]
    Logs {
        namespace: String,
        name: String,
        build: i64,
        stage: i64,
        step: i64,
        #[source]
        source: ApiError,
    },
    #[error("invalid evaluation output in build {build} stage {stage} step {step}: {source}")]
    Payload {
        build: i64,
        stage: i64,
        step: i64,
        #[source]
        source: PayloadError,
    },
    #[error("job '{job}' reported again by build {build} stage {stage} step {step}")]
    DuplicateJob {
        job: String,
        build: i64,
        stage: i64,
        step: i64,
    },
}

fn strip_line_ending(message: &str) -> &str {
    message
        .strip_suffix("\r\n")
        .or_else(|| message.strip_suffix('\n'))
        .unwrap_or(message)
}

/// Extract the job table of one step.
///
/// Returns `Ok(None)` when the step never printed the start marker.
pub fn parse_eval_logs(lines: &[LogLine]) -> Result<Option<JobManifest>, PayloadError> {
    let mut payload: Vec<&str> = Vec::new();
    let mut opened_at = None;
    let mut closed = false;

    for (index, line) in lines.iter().enumerate() {
        let message = strip_line_ending(&line.message);
        if opened_at.is_none() {
            if message == START_SENTINEL {
                opened_at = Some(index + 1);
            }
        } else if message == END_SENTINEL {
            closed = true;
            break;
        } else {
            payload.push(message);
        }
    }

    match opened_at {
        None => Ok(None),
        Some(line) if !closed => Err(PayloadError::Unterminated { line }),
        Some(_) => {
            let jobs: JobManifest = serde_json::from_str(&payload.join("\n"))?;
            Ok(Some(jobs))
        }
    }
}

/// Walk every step of `build` and merge their job tables into one manifest.
pub async fn extract(
    api: &dyn BuildApi,
    build: &Build,
    ctx: &RequestContext,
    policy: DuplicateJobPolicy,
) -> Result<JobManifest, ExtractError> {
    let mut manifest = JobManifest::new();

    for stage in &build.stages {
        for step in &stage.steps {
            let lines = api
                .logs(
                    &ctx.namespace,
                    &ctx.name,
                    build.number,
                    stage.number,
                    step.number,
                )
                .await
                .map_err(|source| ExtractError::Logs {
                    namespace: ctx.namespace.clone(),
                    name: ctx.name.clone(),
                    build: build.number,
                    stage: stage.number,
                    step: step.number,
                    source,
                })?;

            let jobs = parse_eval_logs(&lines).map_err(|source| ExtractError::Payload {
                build: build.number,
                stage: stage.number,
                step: step.number,
                source,
            })?;
            let Some(jobs) = jobs else {
                tracing::debug!(
                    stage = stage.number,
                    step = step.number,
                    "step printed no job table"
                );
                continue;
            };
            tracing::debug!(
                stage = stage.number,
                step = step.number,
                jobs = jobs.len(),
                "collected job table"
            );

            for (job_name, job) in jobs {
                if manifest.contains_key(&job_name) {
                    if policy == DuplicateJobPolicy::Reject {
                        return Err(ExtractError::DuplicateJob {
                            job: job_name,
                            build: build.number,
                            stage: stage.number,
                            step: step.number,
                        });
                    }
                    tracing::warn!(
                        job = %job_name,
                        stage = stage.number,
                        step = step.number,
                        "job reported by more than one step, keeping the later entry"
                    );
                }
                manifest.insert(job_name, job);
            }
        }
    }

    Ok(manifest)
}
