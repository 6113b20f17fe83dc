use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::tempdir;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn convert_stdout(input: &PathBuf) -> String {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    let output = cmd.arg("convert").arg(input).output().expect("run convert");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).expect("utf8")
}

#[test]
fn convert_prints_a_table_replacing_script() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("#!/usr/sbin/nft -f"))
        .stdout(predicate::str::contains("delete table inet patronus"))
        .stdout(predicate::str::contains("iifname \"em0\" goto in_wan"))
        .stdout(predicate::str::contains(
            "ip daddr 192.168.1.0/24 tcp dport 22 return comment \"filter[0] 'Allow SSH'\"",
        ))
        .stdout(predicate::str::contains(
            "ip daddr 192.168.1.0/24 drop comment \"filter[1] 'Block WAN to LAN'\"",
        ));
}

#[test]
fn convert_is_deterministic() {
    let first = convert_stdout(&fixture("fixtures/pfsense-small.xml"));
    let second = convert_stdout(&fixture("fixtures/pfsense-small.xml"));
    assert_eq!(first, second);
}

#[test]
fn converting_an_emitted_script_reproduces_it() {
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("ruleset.nft");
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/pfsense-small.xml"))
        .arg("-o")
        .arg(&script)
        .assert()
        .success()
        .stderr(predicate::str::contains("table inet patronus: sets="));

    let original = fs::read_to_string(&script).expect("read script");
    assert!(original.contains("set admin_hosts_v4"));
    assert_eq!(convert_stdout(&script), original);
}

#[test]
fn convert_refuses_to_overwrite_its_input() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("config.xml");
    fs::copy(fixture("fixtures/ssh-wan-lan.xml"), &input).expect("copy fixture");
    let before = fs::read(&input).expect("read input");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join(".").join("config.xml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("refusing to overwrite input file"));
    assert_eq!(fs::read(&input).expect("read input"), before);
}

#[test]
fn convert_json_lists_the_table() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    let output = cmd
        .arg("convert")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .arg("--format")
        .arg("json")
        .output()
        .expect("run convert");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("json");
    let entries = json["nftables"].as_array().expect("nftables array");
    assert!(entries
        .iter()
        .any(|entry| entry["delete"]["table"]["name"] == "patronus"));
    assert!(entries
        .iter()
        .any(|entry| entry["add"]["chain"]["name"] == "in_wan"));
}

#[test]
fn trace_maps_rules_back_to_their_source() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .arg("--trace")
        .assert()
        .success()
        .stderr(predicate::str::contains("- in_wan[0]"))
        .stderr(predicate::str::contains("from: filter[0] \"Allow SSH\""));
}

#[test]
fn optimized_output_still_reads_back() {
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("optimized.nft");
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/opnsense-small.xml"))
        .arg("--optimize")
        .arg("-o")
        .arg(&script)
        .assert()
        .success();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("check")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn rejected_configuration_writes_nothing() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("ruleset.nft");
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/nat-conflict.xml"))
        .arg("-o")
        .arg(&out)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("rdr[0] \"App server\""))
        .stderr(predicate::str::contains("rdr[1] \"Proxy\""));
    assert!(!out.exists());
}

#[test]
fn malformed_xml_is_a_parse_error() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("broken.xml");
    fs::write(&input, "<pfsense>\n  <filter>\n</pfsense>\n").expect("write input");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(&input)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("malformed XML"));
}

#[test]
fn failed_nft_check_leaves_no_output_file() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("ruleset.nft");
    let empty_path = dir.path().join("bin");
    fs::create_dir(&empty_path).expect("create bin dir");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("convert")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .arg("-o")
        .arg(&out)
        .arg("--check-only")
        .env("PATH", &empty_path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nft check failed"));
    assert!(!out.exists());
}
