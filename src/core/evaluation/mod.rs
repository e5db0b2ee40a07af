//! Evaluation sub-build: creation and the bounded wait for its completion.

use crate::core::context::RequestContext;
use crate::core::resource::Resource;
use crate::drone::{ApiError, Build, BuildApi, BuildStatus};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Trigger parameter carrying the serialized jobset pipelines.
pub const EVAL_JOBSET_PARAM: &str = "nix_eval_jobset";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Pacing and deadline of the status polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits for as long as the build keeps running.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Snapshot published after every status check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationProgress {
    pub build_number: i64,
    pub status: BuildStatus,
    pub polls: u32,
}

/// Requests abandonment of a running wait.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

/// Observed by the wait; fires once the paired [`CancelHandle`] cancels.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Create a connected cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelSignal {
    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Handle dropped without cancelling: never fires.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Optional observers of a wait.
#[derive(Debug, Default)]
pub struct WaitHooks {
    pub progress: Option<watch::Sender<EvaluationProgress>>,
    pub cancel: Option<CancelSignal>,
}

/// Errors raised while running the evaluation build.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("cannot convert jobset `{resource}` to yaml: {source}")]
    Serialize {
        resource: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cannot create evaluation build: {0}")]
    Create(#[source] ApiError),
    #[error("cannot get status of evaluation build {build}: {source}")]
    Status {
        build: i64,
        #[source]
        source: ApiError,
    },
    #[error("evaluation build {build} finished with status {status}")]
    Failed { build: i64, status: BuildStatus },
    #[error("evaluation build {build} still {status} after {elapsed:?}")]
    TimedOut {
        build: i64,
        status: BuildStatus,
        elapsed: Duration,
    },
    #[error("waiting for evaluation build {build} was cancelled")]
    Cancelled { build: i64 },
}

impl EvalError {
    /// Number of the evaluation build, when one was created.
    pub fn build_number(&self) -> Option<i64> {
        match self {
            EvalError::Serialize { .. } | EvalError::Create(_) => None,
            EvalError::Status { build, .. }
            | EvalError::Failed { build, .. }
            | EvalError::TimedOut { build, .. }
            | EvalError::Cancelled { build } => Some(*build),
        }
    }
}

/// Serialize jobset pipelines into one multi-document text, in discovery order.
pub fn serialize_jobsets(jobsets: &[Resource]) -> Result<String, EvalError> {
    let mut text = String::new();
    for jobset in jobsets {
        let document = jobset.to_document().map_err(|source| EvalError::Serialize {
            resource: jobset.label(),
            source,
        })?;
        text.push_str(&document);
    }
    Ok(text)
}

/// Ask Drone for a build that runs the jobset pipelines.
pub async fn create_evaluation_build(
    api: &dyn BuildApi,
    jobsets: &[Resource],
    ctx: &RequestContext,
) -> Result<Build, EvalError> {
    let mut params = BTreeMap::new();
    params.insert(EVAL_JOBSET_PARAM.to_string(), serialize_jobsets(jobsets)?);

    let build = api
        .create_build(&ctx.namespace, &ctx.name, &ctx.build_ref, &ctx.branch, &params)
        .await
        .map_err(EvalError::Create)?;
    tracing::info!(build = build.number, repo = %ctx.slug(), "evaluation build created");
    Ok(build)
}

/// Poll `number` until it leaves the pending/running states.
///
/// Returns the build as reported by the final status check, so its stage and
/// step topology is complete.
pub async fn await_build(
    api: &dyn BuildApi,
    number: i64,
    ctx: &RequestContext,
    options: &WaitOptions,
    hooks: &mut WaitHooks,
) -> Result<Build, EvalError> {
    let started = Instant::now();
    let deadline = options.timeout.map(|timeout| started + timeout);
    let mut polls = 0u32;

    loop {
        let build = api
            .build(&ctx.namespace, &ctx.name, number)
            .await
            .map_err(|source| EvalError::Status {
                build: number,
                source,
            })?;
        polls += 1;
        if let Some(progress) = &hooks.progress {
            progress.send_replace(EvaluationProgress {
                build_number: number,
                status: build.status.clone(),
                polls,
            });
        }

        if build.status == BuildStatus::Success {
            tracing::info!(build = number, polls, "evaluation build succeeded");
            return Ok(build);
        }
        if !build.status.is_in_progress() {
            return Err(EvalError::Failed {
                build: number,
                status: build.status,
            });
        }
        tracing::debug!(build = number, status = %build.status, "evaluation still in progress");

        let now = Instant::now();
        let mut wake = now + options.poll_interval;
        if let Some(deadline) = deadline {
            if now >= deadline {
                return Err(EvalError::TimedOut {
                    build: number,
                    status: build.status,
                    elapsed: now - started,
                });
            }
            wake = wake.min(deadline);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = wait_cancelled(hooks.cancel.as_mut()) => {
                tracing::warn!(build = number, "evaluation wait cancelled");
                return Err(EvalError::Cancelled { build: number });
            }
        }
    }
}

async fn wait_cancelled(signal: Option<&mut CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Create the evaluation build and wait for it to succeed.
pub async fn trigger_and_await(
    api: &dyn BuildApi,
    jobsets: &[Resource],
    ctx: &RequestContext,
    options: &WaitOptions,
    hooks: &mut WaitHooks,
) -> Result<Build, EvalError> {
    let created = create_evaluation_build(api, jobsets, ctx).await?;
    await_build(api, created.number, ctx, options, hooks).await
}
