use drone_nix_convert::core::manifest::{Job, JobManifest};
use drone_nix_convert::core::render::{
    populate_build_stage, populate_post_build_stage, render, ARTIFACT_PATH_ENV,
};
use drone_nix_convert::core::resource::{parse, Resource};
use serde_yaml::{Mapping, Value};

fn job(path: &str, deps: &[&str]) -> Job {
    Job {
        artifact_path: path.to_string(),
        dependency_paths: deps.iter().map(|d| d.to_string()).collect(),
    }
}

fn manifest(entries: &[(&str, Job)]) -> JobManifest {
    entries
        .iter()
        .map(|(name, job)| (name.to_string(), job.clone()))
        .collect()
}

fn names(text: &str) -> Vec<String> {
    parse(text)
        .unwrap()
        .into_iter()
        .map(|r| r.name().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_builds_iterate_jobs_then_templates() {
    let builds = [
        Resource::pipeline(Some("x86")),
        Resource::pipeline(Some("arm")),
    ];
    let jobs = manifest(&[("a", job("/a", &["/d"])), ("b", job("/b", &["/d"]))]);
    let text = render(&builds, &[], &[], &jobs).unwrap();
    assert_eq!(names(&text), vec!["x86 (a)", "arm (a)", "x86 (b)", "arm (b)"]);
}

#[test]
fn test_jobs_without_dependencies_are_skipped() {
    let jobs = manifest(&[("empty", job("/e", &[])), ("real", job("/r", &["/d"]))]);
    let text = render(&[Resource::pipeline(Some("build"))], &[], &[], &jobs).unwrap();
    assert_eq!(names(&text), vec!["build (real)"]);
}

#[test]
fn test_post_build_depends_on_every_rendered_build() {
    let mut post = Resource::pipeline(Some("publish"));
    post.depends_on = Some(vec!["lint".to_string()]);
    let jobs = manifest(&[("a", job("/a", &["/d"])), ("b", job("/b", &["/d"]))]);
    let text = render(&[Resource::pipeline(None)], &[post], &[], &jobs).unwrap();

    let documents = parse(&text).unwrap();
    assert_eq!(documents.len(), 3);
    assert_eq!(
        documents[2].depends_on,
        Some(vec!["lint".to_string(), "a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_other_resources_come_first_and_unchanged() {
    let others = parse("kind: secret\nname: token\nget:\n  path: secrets\n").unwrap();
    let jobs = manifest(&[("a", job("/a", &["/d"]))]);
    let text = render(&[Resource::pipeline(Some("b"))], &[], &others, &jobs).unwrap();
    assert!(text.starts_with("---\nkind: secret\nname: token\nget:\n  path: secrets\n---\n"));
}

#[test]
fn test_empty_manifest_still_emits_post_builds() {
    let text = render(
        &[Resource::pipeline(Some("build"))],
        &[Resource::pipeline(Some("notify"))],
        &[],
        &JobManifest::new(),
    )
    .unwrap();
    assert_eq!(names(&text), vec!["notify"]);
}

#[test]
fn test_existing_environment_is_extended() {
    let mut template = Resource::pipeline(Some("build"));
    let mut env = Mapping::new();
    env.insert(Value::from("NIX_PATH"), Value::from("nixpkgs=channel:nixos-unstable"));
    template.environment = Some(env);

    let stage = populate_build_stage(&template, "hello", &job("/hello.drv", &["/d"]));
    let env = stage.environment.unwrap();
    assert_eq!(env.len(), 2);
    assert_eq!(env.get(ARTIFACT_PATH_ENV), Some(&Value::from("/hello.drv")));
    assert_eq!(template.environment.unwrap().len(), 1);
}

#[test]
fn test_existing_artifact_path_is_overwritten_in_place() {
    let template = parse(
        "kind: pipeline\nname: build\nenvironment:\n  artifactPath: old\n  NIX_PATH: nixpkgs\n",
    )
    .unwrap()
    .remove(0);

    let stage = populate_build_stage(&template, "hello", &job("/hello.drv", &["/d"]));
    let env = stage.environment.unwrap();
    let keys: Vec<_> = env.keys().filter_map(Value::as_str).collect();
    assert_eq!(keys, vec![ARTIFACT_PATH_ENV, "NIX_PATH"]);
    assert_eq!(env.get(ARTIFACT_PATH_ENV), Some(&Value::from("/hello.drv")));
}

#[test]
fn test_merged_template_keeps_name_and_environment() {
    let templates = parse(
        "kind: pipeline\nnix-build: true\n<<: {name: build, environment: {A: b}}\n",
    )
    .unwrap();
    let jobs = manifest(&[("job", job("/store/foo.drv", &["/d"]))]);
    let text = render(&templates, &[], &[], &jobs).unwrap();

    let rendered = parse(&text).unwrap().remove(0);
    assert_eq!(rendered.name(), Some("build (job)"));
    let env = rendered.environment.unwrap();
    assert_eq!(env.get("A"), Some(&Value::from("b")));
    assert_eq!(env.get(ARTIFACT_PATH_ENV), Some(&Value::from("/store/foo.drv")));
    assert!(!text.contains("<<"));
}

#[test]
fn test_non_string_template_name_is_replaced_by_job_name() {
    let templates = parse("kind: pipeline\nname: 2024\n").unwrap();
    let jobs = manifest(&[("job", job("/a", &["/d"]))]);
    let text = render(&templates, &[], &[], &jobs).unwrap();
    assert_eq!(names(&text), vec!["job"]);
}

#[test]
fn test_post_build_without_prior_dependencies() {
    let stage = populate_post_build_stage(
        &Resource::pipeline(Some("notify")),
        &["build (a)".to_string()],
    );
    assert_eq!(stage.depends_on, Some(vec!["build (a)".to_string()]));
}
