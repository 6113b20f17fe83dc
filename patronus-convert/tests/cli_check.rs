use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn check_json(path: &str) -> (i32, Value) {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    let output = cmd
        .arg("check")
        .arg(fixture(path))
        .arg("--format")
        .arg("json")
        .output()
        .expect("run check");
    let code = output.status.code().expect("exit code");
    (code, serde_json::from_slice(&output.stdout).expect("json report"))
}

#[test]
fn check_passes_a_clean_configuration() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/pfsense-small.xml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("settings=embedded"))
        .stdout(predicate::str::contains("table inet patronus: sets="))
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn check_names_both_conflicting_port_forwards() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/nat-conflict.xml"))
        .assert()
        .code(5)
        .stdout(predicate::str::contains("[conflict]"))
        .stdout(predicate::str::contains("first:  rdr[0] \"App server\""))
        .stdout(predicate::str::contains("second: rdr[1] \"Proxy\""))
        .stdout(predicate::str::contains("rejected: 1 issue(s), category conflict"));
}

#[test]
fn check_reports_every_unresolved_alias_at_once() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/unresolved-aliases.xml"))
        .assert()
        .code(4)
        .stdout(predicate::str::contains("unresolved alias 'admins'"))
        .stdout(predicate::str::contains("unresolved alias 'backup_hosts'"))
        .stdout(predicate::str::contains("unresolved alias 'guests'"))
        .stdout(predicate::str::contains("category reference"));
}

#[test]
fn check_json_carries_the_unresolved_names() {
    let (code, report) = check_json("fixtures/unresolved-aliases.xml");
    assert_eq!(code, 4);
    assert_eq!(report["ok"], false);
    assert_eq!(report["category"], "reference");
    let issues = report["issues"].as_array().expect("issues");
    assert_eq!(issues.len(), 1);
    let mut names: Vec<&str> = issues[0]["unresolved"]
        .as_array()
        .expect("unresolved")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names, vec!["admins", "backup_hosts", "guests"]);
}

#[test]
fn check_rejects_schedules_and_policy_routing() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/unsupported.xml"))
        .assert()
        .code(6)
        .stdout(predicate::str::contains("unsupported sched"))
        .stdout(predicate::str::contains("unsupported gateway"))
        .stdout(predicate::str::contains("rejected: 2 issue(s), category unsupported"));
}

#[test]
fn waived_constructs_pass_with_notes() {
    let dir = tempdir().expect("tempdir");
    let settings = dir.path().join("settings.toml");
    let defaults = fs::read_to_string(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("settings/default.toml"),
    )
    .expect("read default settings");
    fs::write(
        &settings,
        defaults.replace("waive = []", "waive = [\"sched\", \"gateway\"]"),
    )
    .expect("write settings");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/unsupported.xml"))
        .arg("--settings")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("settings=file:"))
        .stdout(predicate::str::contains("note:"));

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/unsupported.xml"))
        .arg("--settings")
        .arg(&settings)
        .arg("--strict")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("strict mode failed"));
}

#[test]
fn check_json_summarizes_a_passing_ruleset() {
    let (code, report) = check_json("fixtures/ssh-wan-lan.xml");
    assert_eq!(code, 0);
    assert_eq!(report["ok"], true);
    assert_eq!(report["settings"], "embedded");
    assert!(report["summary"]["rules"].as_u64().expect("rule count") > 0);
}

#[test]
fn invalid_settings_are_refused() {
    let dir = tempdir().expect("tempdir");
    let settings = dir.path().join("settings.toml");
    fs::write(&settings, "table = \"patronus\"\nbogus = 1\n").expect("write settings");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .arg("--settings")
        .arg(&settings)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to load settings"));
}
