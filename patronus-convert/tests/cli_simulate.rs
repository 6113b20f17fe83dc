use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn wan_to_lan(dport: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("simulate")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .args(["--hook", "forward", "--in-iface", "wan", "--out-iface", "lan"])
        .args(["--proto", "tcp", "--src", "198.51.100.7", "--dst", "192.168.1.20"])
        .args(["--sport", "40000", "--dport", dport]);
    cmd
}

#[test]
fn ssh_from_wan_is_accepted_by_both_sides() {
    wan_to_lan("22")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "packet hook=forward in=wan out=lan proto=6 198.51.100.7 -> 192.168.1.20 sport=40000 dport=22",
        ))
        .stdout(predicate::str::contains("by filter[0] \"Allow SSH\""))
        .stdout(predicate::str::contains("by in_wan rule 0 (filter[0] \"Allow SSH\")"))
        .stdout(predicate::str::contains("agree"));
}

#[test]
fn other_wan_traffic_is_dropped_by_the_block_rule() {
    let output = wan_to_lan("80")
        .arg("--format")
        .arg("json")
        .output()
        .expect("run simulate");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["agrees"], true);
    assert_eq!(json["simulation"]["model"]["decision"], "drop");
    assert_eq!(json["simulation"]["model"]["rule"], "filter[1] \"Block WAN to LAN\"");
    assert_eq!(json["simulation"]["ruleset"]["decision"], "drop");
    assert_eq!(json["simulation"]["ruleset"]["chain"], "in_wan");
    assert_eq!(
        json["simulation"]["ruleset"]["origins"][0]["label"],
        "filter[1] \"Block WAN to LAN\""
    );
}

#[test]
fn forward_packets_need_both_interfaces() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("simulate")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .args(["--hook", "forward", "--in-iface", "wan"])
        .args(["--proto", "tcp", "--src", "198.51.100.7", "--dst", "192.168.1.20"])
        .args(["--dport", "22"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--out-iface"));
}

#[test]
fn unknown_protocols_are_refused() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patronus-convert"));
    cmd.arg("simulate")
        .arg(fixture("fixtures/ssh-wan-lan.xml"))
        .args(["--hook", "input", "--in-iface", "lan"])
        .args(["--proto", "bogus", "--src", "192.168.1.20", "--dst", "192.168.1.1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown protocol 'bogus'"));
}
