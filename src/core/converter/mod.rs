//! Conversion orchestrator: classify, evaluate, extract, render.

use crate::core::context::RequestContext;
use crate::core::evaluation::{self, EvalError, WaitHooks, WaitOptions, EVAL_JOBSET_PARAM};
use crate::core::manifest::{self, DuplicateJobPolicy, ExtractError};
use crate::core::render::{self, RenderError};
use crate::core::resource::{self, ParseError};
use crate::drone::BuildApi;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

/// Build event used when a build is triggered manually or through the API.
pub const CUSTOM_EVENT: &str = "custom";

/// Everything a conversion needs from the incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionRequest {
    pub config: String,
    pub repo_namespace: String,
    pub repo_name: String,
    pub repo_branch: String,
    /// Path of the configuration file inside the repository.
    pub repo_config: String,
    pub build_ref: String,
    pub build_event: String,
    pub build_action: String,
    pub build_source: String,
    pub build_target: String,
    pub build_trigger: String,
    pub build_before: String,
    pub build_after: String,
    pub trigger_params: BTreeMap<String, String>,
}

impl ConversionRequest {
    pub fn context(&self) -> RequestContext {
        RequestContext {
            build_ref: self.build_ref.clone(),
            branch: self.repo_branch.clone(),
            event: self.build_event.clone(),
            before: self.build_before.clone(),
            after: self.build_after.clone(),
            ..RequestContext::new(&self.repo_namespace, &self.repo_name)
        }
    }
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    /// Nothing dynamic in the configuration; returned unchanged.
    Passthrough(String),
    /// A custom build carried a previously evaluated jobset.
    Replayed(String),
    Rendered(String),
}

impl ConversionResult {
    pub fn config(&self) -> &str {
        match self {
            ConversionResult::Passthrough(text)
            | ConversionResult::Replayed(text)
            | ConversionResult::Rendered(text) => text,
        }
    }

    pub fn into_config(self) -> String {
        match self {
            ConversionResult::Passthrough(text)
            | ConversionResult::Replayed(text)
            | ConversionResult::Rendered(text) => text,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("cannot decode config: {0}")]
    Parse(#[from] ParseError),
    #[error("cannot evaluate jobsets: {0}")]
    Eval(#[from] EvalError),
    #[error("cannot evaluate jobsets: {0}")]
    Extract(#[from] ExtractError),
    #[error("cannot generate pipeline configuration: {0}")]
    Render(#[from] RenderError),
}

/// Tunables shared by every conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverterOptions {
    pub wait: WaitOptions,
    pub duplicate_jobs: DuplicateJobPolicy,
}

/// Stateless converter; one instance serves all requests.
#[derive(Clone)]
pub struct Converter {
    api: Arc<dyn BuildApi>,
    options: ConverterOptions,
}

impl Converter {
    pub fn new(api: Arc<dyn BuildApi>, options: ConverterOptions) -> Self {
        Converter { api, options }
    }

    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionResult, ConvertError> {
        self.convert_with_hooks(request, WaitHooks::default()).await
    }

    /// Convert while exposing evaluation progress and cancellation to the caller.
    pub async fn convert_with_hooks(
        &self,
        request: &ConversionRequest,
        mut hooks: WaitHooks,
    ) -> Result<ConversionResult, ConvertError> {
        let ctx = request.context();
        let span = ctx.span();
        self.run(request, &ctx, &mut hooks).instrument(span).await
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        ctx: &RequestContext,
        hooks: &mut WaitHooks,
    ) -> Result<ConversionResult, ConvertError> {
        tracing::info!(
            build_action = %request.build_action,
            build_event = %request.build_event,
            build_source = %request.build_source,
            build_ref = %request.build_ref,
            build_target = %request.build_target,
            build_trigger = %request.build_trigger,
            "initiated"
        );
        tracing::info!("process {}", request.repo_config);

        if request.build_event == CUSTOM_EVENT {
            if let Some(jobset) = request.trigger_params.get(EVAL_JOBSET_PARAM) {
                tracing::info!("custom build carries an evaluated jobset, replaying it");
                return Ok(ConversionResult::Replayed(jobset.clone()));
            }
        }

        let resources = resource::parse(&request.config)?;
        let classified = resource::classify(resources);

        if !classified.is_dynamic() {
            let missing = if classified.jobsets.is_empty() {
                "nix-jobset"
            } else {
                "nix-build"
            };
            tracing::info!("no pipeline found with {} flag set, skip evaluation...", missing);
            return Ok(ConversionResult::Passthrough(request.config.clone()));
        }

        let api = self.api.as_ref();
        let build =
            evaluation::trigger_and_await(api, &classified.jobsets, ctx, &self.options.wait, hooks)
                .await?;
        let jobs = manifest::extract(api, &build, ctx, self.options.duplicate_jobs).await?;
        tracing::info!(jobs = jobs.len(), build = build.number, "job manifest collected");

        let config = render::render(
            &classified.builds,
            &classified.post_builds,
            &classified.others,
            &jobs,
        )?;
        Ok(ConversionResult::Rendered(config))
    }
}
