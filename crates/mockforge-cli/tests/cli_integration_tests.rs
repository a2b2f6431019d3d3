use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn shows_help_with_both_subcommands() {
    let mut cmd = Command::cargo_bin("mockd").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn reports_version() {
    let mut cmd = Command::cargo_bin("mockd").unwrap();
    cmd.arg("--version");
    cmd.assert().success();
}

#[test]
fn validate_accepts_a_well_formed_mock_collection() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    writeln!(
        file,
        "- id: m1\n  spec:\n    type: http\n    priority: 0\n    matcher:\n      path: /ping\n    response:\n      status_code: 200\n      body: pong\n"
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("mockd").unwrap();
    cmd.args(["validate", "--mocks"]).arg(file.path());
    cmd.assert().success().stdout(predicate::str::contains("ok:"));
}

#[test]
fn validate_rejects_a_matcher_with_both_path_and_pattern() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    writeln!(
        file,
        "- id: m1\n  spec:\n    type: http\n    priority: 0\n    matcher:\n      path: /ping\n      path_pattern: '^/ping$'\n    response:\n      status_code: 200\n      body: pong\n"
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("mockd").unwrap();
    cmd.args(["validate", "--mocks"]).arg(file.path());
    cmd.assert().failure();
}
