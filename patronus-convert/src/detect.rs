use std::fmt::{self, Display, Formatter};

use patronus_xml::XmlNode;
use serde::Serialize;

/// Firewall distribution a configuration was exported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// `<pfsense>` root.
    PfSense,
    /// `<opnsense>` root.
    OpnSense,
}

impl Platform {
    /// Root element tag for this platform.
    pub fn root_tag(self) -> &'static str {
        match self {
            Platform::PfSense => "pfsense",
            Platform::OpnSense => "opnsense",
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_tag())
    }
}

/// What kind of input a file holds, judged from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// pfSense/OPNsense XML export.
    Xml,
    /// nftables script previously written by this tool.
    NftScript,
}

/// Detect platform from the root tag.
pub fn detect_platform(node: &XmlNode) -> Option<Platform> {
    match node.tag.as_str() {
        "pfsense" => Some(Platform::PfSense),
        "opnsense" => Some(Platform::OpnSense),
        _ => None,
    }
}

/// Return the trimmed `<version>` text, falling back to `system.version`.
pub fn detect_version(node: &XmlNode) -> Option<&str> {
    node.child_text("version")
        .or_else(|| node.get_child("system").and_then(|s| s.child_text("version")))
}

/// Classify raw input bytes. Anything that does not open like XML is
/// treated as an nft script; the script reader rejects what it cannot read.
pub fn detect_input(raw: &str) -> InputKind {
    let head = raw.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with('<') {
        InputKind::Xml
    } else {
        InputKind::NftScript
    }
}

#[cfg(test)]
mod tests {
    use super::{detect_input, detect_platform, detect_version, InputKind, Platform};
    use patronus_xml::parse;

    #[test]
    fn detects_platform_and_version() {
        let root = parse(br#"<opnsense><version>24.7</version></opnsense>"#).expect("parse");
        assert_eq!(detect_platform(&root), Some(Platform::OpnSense));
        assert_eq!(detect_version(&root), Some("24.7"));
    }

    #[test]
    fn version_falls_back_to_system() {
        let root =
            parse(br#"<pfsense><system><version>2.7.2</version></system></pfsense>"#).expect("parse");
        assert_eq!(detect_platform(&root), Some(Platform::PfSense));
        assert_eq!(detect_version(&root), Some("2.7.2"));
    }

    #[test]
    fn unknown_root_is_not_a_platform() {
        let root = parse(br#"<routeros/>"#).expect("parse");
        assert_eq!(detect_platform(&root), None);
    }

    #[test]
    fn input_kind_from_leading_bytes() {
        assert_eq!(detect_input("  <?xml version=\"1.0\"?>"), InputKind::Xml);
        assert_eq!(detect_input("#!/usr/sbin/nft -f\n"), InputKind::NftScript);
    }
}
