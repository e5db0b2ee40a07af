use assert_cmd::Command;
use predicates::str::{contains, starts_with};
use std::fs;
use tempfile::TempDir;

const BIN: &str = "drone-nix-convert";

fn command() -> Command {
    let mut cmd = Command::cargo_bin(BIN).expect("binary should build");
    for var in [
        "DRONE_CONFIG_FILE",
        "DRONE_SECRET",
        "DRONE_SERVER",
        "DRONE_TOKEN",
        "DRONE_LOG_FORMAT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn version_flag_prints_crate_version() {
    command()
        .arg("--version")
        .assert()
        .success()
        .stdout(starts_with(format!("{BIN} {}", drone_nix_convert::VERSION)));
}

#[test]
fn help_lists_both_commands() {
    command()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("COMMANDS:"))
        .stdout(contains("serve"))
        .stdout(contains("convert"));
}

#[test]
fn convert_help_documents_repeatable_params() {
    command()
        .args(["convert", "--help"])
        .assert()
        .success()
        .stdout(contains("--namespace"))
        .stdout(contains("--param <KEY=VALUE>"));
}

#[test]
fn convert_without_token_fails_with_hint() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join(".drone.yml");
    fs::write(&file, "kind: pipeline\n").unwrap();

    command()
        .env("DRONE_SERVER", "http://127.0.0.1:9")
        .arg("convert")
        .arg(&file)
        .args(["--namespace", "octo", "--name", "hello"])
        .assert()
        .failure()
        .stderr(contains("DRONE_TOKEN"));
}

#[test]
fn convert_static_file_prints_it_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join(".drone.yml");
    let config = "kind: pipeline\nname: default\nsteps:\n- name: test\n  commands: [make]\n";
    fs::write(&file, config).unwrap();

    command()
        .env("DRONE_SERVER", "http://127.0.0.1:9")
        .env("DRONE_TOKEN", "unused")
        .arg("convert")
        .arg(&file)
        .args(["--namespace", "octo", "--name", "hello"])
        .assert()
        .success()
        .stdout(config);
}
