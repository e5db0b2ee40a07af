use crate::{
    cli::args::{ConvertArgs, ServeArgs},
    core::{
        config::{ConfigLoader, PluginConfig},
        converter::{ConversionRequest, ConversionResult, Converter},
        error::AppError,
        evaluation::{cancel_pair, EvaluationProgress, WaitHooks},
        types::ErrorCategory,
    },
    drone::DroneClient,
    logging, server, Result,
};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

fn build_converter(config: &PluginConfig) -> Result<Converter> {
    let server = config.drone.server_url()?;
    let client = DroneClient::new(server, config.drone.token.clone());
    Ok(Converter::new(Arc::new(client), config.converter_options()))
}

/// Run the extension HTTP service until it terminates.
pub async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    logging::init(&config.logging)?;

    let settings = config.server_settings().await?;
    let converter = build_converter(&config)?;
    tracing::info!(
        drone = %config.drone.server,
        poll_interval = ?config.evaluation.poll_interval,
        timeout = ?config.evaluation.timeout,
        duplicate_jobs = %config.evaluation.duplicate_jobs,
        "starting conversion extension"
    );
    server::serve(converter, settings).await?;
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to read {}: {}", path.display(), err),
        )
        .into()
    })
}

/// Convert one configuration file and print the result on stdout.
pub async fn convert(args: ConvertArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    logging::init(&config.logging)?;

    let request = ConversionRequest {
        config: read_input(&args.file)?,
        repo_namespace: args.namespace,
        repo_name: args.name,
        repo_branch: args.branch,
        repo_config: display_path(&args.file),
        build_ref: args.git_ref,
        build_event: args.event,
        build_trigger: "cli".to_string(),
        trigger_params: args.params.into_iter().collect(),
        ..ConversionRequest::default()
    };

    let converter = build_converter(&config)?;
    let (cancel, signal) = cancel_pair();
    let (progress_tx, mut progress_rx) = watch::channel(EvaluationProgress::default());
    let hooks = WaitHooks {
        progress: Some(progress_tx),
        cancel: Some(signal),
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, abandoning evaluation wait");
            cancel.cancel();
        }
    });
    tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let progress = progress_rx.borrow_and_update().clone();
            tracing::debug!(
                build = progress.build_number,
                status = %progress.status.as_str(),
                polls = progress.polls,
                "evaluation build status"
            );
        }
    });

    let result = converter
        .convert_with_hooks(&request, hooks)
        .await
        .map_err(|err| {
            AppError::with_source(ErrorCategory::ConversionError, "conversion failed", err)
        })?;

    match &result {
        ConversionResult::Passthrough(_) => tracing::info!("configuration returned unchanged"),
        ConversionResult::Replayed(_) => tracing::info!("stored evaluation replayed"),
        ConversionResult::Rendered(_) => tracing::info!("configuration expanded"),
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.config().as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn display_path(path: &Path) -> String {
    if path == Path::new("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}
