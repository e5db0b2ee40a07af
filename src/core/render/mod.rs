use crate::core::manifest::{Job, JobManifest};
use crate::core::resource::Resource;
use serde_yaml::{Mapping, Value};

/// Environment variable carrying the artifact path into rendered build pipelines.
pub const ARTIFACT_PATH_ENV: &str = "artifactPath";

#[derive(Debug, thiserror::Error)]
#[error("cannot convert pipeline `{resource}` to yaml: {source}")]
pub struct RenderError {
    pub resource: String,
    #[source]
    pub source: serde_yaml::Error,
}

/// Instantiate a build template for one job.
pub fn populate_build_stage(template: &Resource, job_name: &str, job: &Job) -> Resource {
    let mut stage = template.clone();
    stage.set_name(match template.name() {
        Some(name) => format!("{} ({})", name, job_name),
        None => job_name.to_string(),
    });

    let environment = stage.environment.get_or_insert_with(Mapping::new);
    environment.insert(
        Value::String(ARTIFACT_PATH_ENV.to_string()),
        Value::String(job.artifact_path.clone()),
    );
    stage
}

/// Make a post-build template depend on every rendered build pipeline.
pub fn populate_post_build_stage(template: &Resource, build_names: &[String]) -> Resource {
    let mut stage = template.clone();
    stage
        .depends_on
        .get_or_insert_with(Vec::new)
        .extend(build_names.iter().cloned());
    stage
}

fn emit(output: &mut String, resource: &Resource) -> Result<(), RenderError> {
    let document = resource.to_document().map_err(|source| RenderError {
        resource: resource.label(),
        source,
    })?;
    output.push_str(&document);
    Ok(())
}

/// Produce the final configuration text.
///
/// Pass-through resources come first, then one copy of every build template per
/// buildable job, then the post-build templates.
pub fn render(
    builds: &[Resource],
    post_builds: &[Resource],
    others: &[Resource],
    manifest: &JobManifest,
) -> Result<String, RenderError> {
    let mut output = String::new();
    for other in others {
        emit(&mut output, other)?;
    }

    let mut build_names = Vec::new();
    for (job_name, job) in manifest {
        if !job.is_buildable() {
            tracing::debug!(job = %job_name, "job has no dependency paths, skipping");
            continue;
        }
        for template in builds {
            let stage = populate_build_stage(template, job_name, job);
            emit(&mut output, &stage)?;
            if let Some(name) = stage.name() {
                build_names.push(name.to_string());
            }
        }
    }

    for template in post_builds {
        let stage = populate_post_build_stage(template, &build_names);
        emit(&mut output, &stage)?;
    }

    tracing::info!(
        rendered_builds = build_names.len(),
        post_builds = post_builds.len(),
        "pipeline configuration rendered"
    );
    Ok(output)
}
