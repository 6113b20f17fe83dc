use std::path::PathBuf;

use pretty_assertions::assert_eq;
use patronus_xml::{parse, parse_file, ParseError};

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

#[test]
fn parses_attributes_empty_and_nested_elements() {
    let node = parse(
        br#"<config>
  <settings><enabled/></settings>
  <items>
    <item id="1">one</item>
    <item id="2">two</item>
    <item id="3"><![CDATA[three & more]]></item>
  </items>
</config>"#,
    )
    .expect("parse should succeed");
    assert_eq!(node.tag, "config");

    let settings = node.get_child("settings").expect("settings should exist");
    assert!(settings.has_child("enabled"));

    let items = node.get_child("items").expect("items should exist");
    let item_nodes = items.get_children("item");
    assert_eq!(item_nodes.len(), 3);
    assert_eq!(item_nodes[0].attributes.get("id"), Some(&"1".to_string()));
    assert_eq!(item_nodes[2].text.as_deref(), Some("three & more"));
    assert_eq!(item_nodes[2].line, 6);
}

#[test]
fn parses_real_world_roots() {
    let pf = parse_file(&fixture("fixtures/pfsense-small.xml")).expect("pfSense fixture parse");
    let opn = parse_file(&fixture("fixtures/opnsense-small.xml")).expect("OPNsense fixture parse");

    assert_eq!(pf.tag, "pfsense");
    assert_eq!(opn.tag, "opnsense");
}

#[test]
fn unescapes_entities_in_text() {
    let node = parse(b"<rule><descr>a &amp; b &lt;c&gt;</descr></rule>").expect("parse");
    assert_eq!(node.get_text(&["descr"]), Some("a & b <c>"));
}

#[test]
fn missing_file_is_io_error() {
    let err = parse_file(&fixture("fixtures/does-not-exist.xml")).expect_err("missing file");
    assert!(matches!(err, ParseError::Io(_)));
    assert_eq!(err.line(), None);
}

#[test]
fn empty_document_has_no_root() {
    let err = parse(b"<?xml version=\"1.0\"?>\n").expect_err("no root");
    assert!(matches!(err, ParseError::Malformed { .. }));
}
