use drone_nix_convert::core::resource::{classify, parse, ParseError, Resource, StageRole};

#[test]
fn test_jobset_marker_wins_over_build_marker() {
    let resources = parse("kind: pipeline\nname: both\nnix-build: true\nnix-jobset: true\n").unwrap();
    assert_eq!(resources[0].role(), StageRole::Jobset);

    let classified = classify(resources);
    assert_eq!(classified.jobsets.len(), 1);
    assert!(classified.builds.is_empty());
    assert!(!classified.jobsets[0].has_marker_fields());
}

#[test]
fn test_buckets_keep_input_order() {
    let text = "\
kind: pipeline
name: eval-a
nix-jobset: true
---
kind: pipeline
name: build-a
nix-build: true
---
kind: secret
name: token
---
kind: pipeline
name: eval-b
nix-jobset: true
---
kind: pipeline
name: deploy
nix-post-build: true
---
kind: pipeline
name: lint
";
    let classified = classify(parse(text).unwrap());
    let names = |resources: &[Resource]| -> Vec<String> {
        resources.iter().filter_map(|r| r.name().map(str::to_string)).collect()
    };
    assert_eq!(names(&classified.jobsets), vec!["eval-a", "eval-b"]);
    assert_eq!(names(&classified.builds), vec!["build-a"]);
    assert_eq!(names(&classified.post_builds), vec!["deploy"]);
    assert_eq!(names(&classified.others), vec!["token", "lint"]);
    assert!(classified.is_dynamic());
}

#[test]
fn test_only_boolean_true_enables_a_marker() {
    for raw in ["\"true\"", "1", "yes_please", "null"] {
        let text = format!("kind: pipeline\nnix-build: {}\n", raw);
        let resources = parse(&text).unwrap();
        assert_eq!(resources[0].role(), StageRole::Other, "value {}", raw);
    }
}

#[test]
fn test_marker_on_other_kind_is_ignored() {
    let classified = classify(parse("kind: secret\nname: s\nnix-jobset: true\n").unwrap());
    assert!(classified.jobsets.is_empty());
    assert_eq!(classified.others.len(), 1);
    assert!(!classified.is_dynamic());
}

#[test]
fn test_build_marker_wins_over_post_build_marker() {
    let mut resource = parse("kind: pipeline\nnix-post-build: true\nnix-build: true\n")
        .unwrap()
        .remove(0);
    assert_eq!(resource.take_role(), StageRole::Build);
    assert_eq!(resource.role(), StageRole::Other);
    assert_eq!(Resource::pipeline(Some("x")).role(), StageRole::Other);
}

#[test]
fn test_merged_template_is_classified_with_its_anchor_fields() {
    let text = "\
kind: pipeline
x-defaults: &build
  name: build
  nix-build: true
  environment:
    A: b
<<: *build
steps: []
";
    let classified = classify(parse(text).unwrap());
    assert_eq!(classified.builds.len(), 1);
    let build = &classified.builds[0];
    assert_eq!(build.name(), Some("build"));
    assert_eq!(build.environment.as_ref().map(|env| env.len()), Some(1));
    assert!(!build.has_marker_fields());
}

#[test]
fn test_numeric_names_do_not_fail_the_configuration() {
    let text = "kind: secret\nname: 42\n---\nkind: pipeline\nname: 2024\nnix-build: true\n";
    let classified = classify(parse(text).unwrap());
    assert_eq!(classified.others[0].name(), None);
    assert_eq!(classified.builds.len(), 1);
}

#[test]
fn test_invalid_typed_field_reports_document_index() {
    let err = parse("kind: pipeline\n---\nkind: pipeline\ndepends_on: nope\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidField { document: 2, .. }));
}

#[test]
fn test_syntax_error_is_reported() {
    let err = parse("kind: pipeline\n  bad: indent\n").unwrap_err();
    assert!(err.to_string().contains("document"), "{}", err);
}
