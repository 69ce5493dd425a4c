use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

#[test]
fn node_without_arguments_fails() {
    Command::cargo_bin("replikv-node")
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn node_rejects_an_unknown_id() {
    Command::cargo_bin("replikv-node")
        .unwrap()
        .args(["9", "4009"])
        .assert()
        .failure();
}

#[test]
fn cli_without_subcommand_fails() {
    Command::cargo_bin("replikv-cli").unwrap().assert().failure();
}

#[test]
fn cli_version_flag() {
    Command::cargo_bin("replikv-cli")
        .unwrap()
        .args(["--version"])
        .assert()
        .success()
        .stdout(contains("replikv"));
}

#[test]
fn cli_reports_an_unreachable_node() {
    Command::cargo_bin("replikv-cli")
        .unwrap()
        .args(["get", "1", "--addr", "127.0.0.1:9"])
        .assert()
        .failure();
}
