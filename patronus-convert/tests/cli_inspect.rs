use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

#[test]
fn inspect_lists_the_pfsense_model() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("inspect")
        .arg(fixture("fixtures/pfsense-small.xml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("platform=pfsense version=23.3"))
        .stdout(predicate::str::contains("- lan: em1 192.168.1.1/24 fd00:1::1/64"))
        .stdout(predicate::str::contains("- web_ports (port): 80 443 8080-8090"))
        .stdout(predicate::str::contains(
            "- filter[0] \"Drop known scanner network\": block in floating on wan",
        ))
        .stdout(predicate::str::contains("mode=hybrid"))
        .stdout(predicate::str::contains("rdr[0] \"Web server\""));
}

#[test]
fn inspect_orders_automation_rules_by_sequence() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("inspect")
        .arg(fixture("fixtures/opnsense-small.xml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("platform=opnsense version=24.7"))
        .stdout(predicate::str::contains(
            "- filter[0] \"IoT may not reach LAN\": block in automation on opt1",
        ))
        .stdout(predicate::str::contains(
            "- filter[1] \"IoT to vendor MQTT\": pass in automation on opt1",
        ))
        .stdout(predicate::str::contains("lan opt1"));
}

#[test]
fn inspect_json_exposes_the_model() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    let output = cmd
        .arg("inspect")
        .arg(fixture("fixtures/opnsense-small.xml"))
        .arg("--format")
        .arg("json")
        .output()
        .expect("run inspect");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["model"]["platform"], "opnsense");
    assert_eq!(json["model"]["outbound_mode"], "automatic");
    let rules = json["model"]["rules"].as_array().expect("rules");
    assert_eq!(rules.len(), 5);
    assert_eq!(rules[0]["scope"], "automation");
    assert!(rules[0]["origin"]["line"].as_u64().is_some());
}

#[test]
fn inspect_fails_on_unresolved_references() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("inspect")
        .arg(fixture("fixtures/unresolved-aliases.xml"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("unresolved alias 'guests'"));
}

#[test]
fn inspect_needs_a_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("ruleset.nft");
    std::fs::write(&script, "#!/usr/sbin/nft -f\ntable inet patronus\n").expect("write script");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("inspect")
        .arg(&script)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is an nft script"));
}
