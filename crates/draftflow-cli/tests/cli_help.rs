use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("draftflow")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("expand"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_generate_help_shows_options() {
    cargo_bin_cmd!("draftflow")
        .args(["generate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--prompt"))
        .stdout(predicate::str::contains("--option"))
        .stdout(predicate::str::contains("--timeout-secs"));
}

#[test]
fn test_generate_requires_a_prompt_source() {
    cargo_bin_cmd!("draftflow")
        .arg("generate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--prompt"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("draftflow")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
