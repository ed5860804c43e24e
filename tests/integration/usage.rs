use assert_cmd::prelude::*;
use predicates::prelude::predicate;
use std::process::Command;

#[test]
fn test_no_arguments_prints_usage() {
    Command::cargo_bin("git-remote-hg")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_refuses_to_run_outside_git() {
    // Valid arguments, but not launched by git: no GIT_DIR to root the
    // helper state in.
    Command::cargo_bin("git-remote-hg")
        .unwrap()
        .args(["origin", "http://hg.invalid/repo"])
        .env_remove("GIT_DIR")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GIT_DIR"));
}
