use assert_cmd::prelude::*;
use predicates::prelude::predicate;
use std::process::Command;

#[test]
fn test_dash_dash_version() {
    let validate_stdout = predicate::str::is_match("^git-remote-hg [0-9][^\n]*\n$").unwrap();
    Command::cargo_bin("git-remote-hg")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(validate_stdout)
        .stderr("");
}

#[test]
fn test_short_flag_version() {
    let validate_stdout = predicate::str::is_match("^git-remote-hg [0-9][^\n]*\n$").unwrap();
    Command::cargo_bin("git-remote-hg")
        .unwrap()
        .arg("-v")
        .assert()
        .success()
        .stdout(validate_stdout)
        .stderr("");
}
