//! pfSense/OPNsense XML configuration to [`RuleModel`].
//!
//! Import runs in three steps:
//! 1. Each section reader (`interfaces`, `aliases`, `filter`, `nat`) builds
//!    its entities and records parse errors per construct, so one bad rule
//!    never hides problems in the next one.
//! 2. If any parse error was recorded the document is rejected with all of
//!    them.
//! 3. `refs` checks that every name the model mentions resolves, and
//!    rejects the document with one batched reference error otherwise.
//!
//! Elements a reader does not know are skipped with an [`ImportWarning`].
//! Elements it knows but cannot translate are kept on the entity as
//! [`Construct`]s for the translator to report.

mod aliases;
mod endpoint;
mod filter;
mod interfaces;
mod nat;
pub mod refs;

use std::collections::BTreeSet;
use std::path::Path;

use patronus_xml::XmlNode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::detect::{detect_platform, detect_version};
use crate::error::{ConvertError, Issue, ParseError};
use crate::location::SourceLocation;
use crate::model::{Construct, GlobalConstruct, RuleModel};

/// Interface names pf knows without an `<interfaces>` entry.
pub const PSEUDO_INTERFACES: &[&str] = &[
    "openvpn",
    "ipsec",
    "enc0",
    "l2tp",
    "pppoe",
    "wireguard",
];

/// An element that was skipped because the importer does not know it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportWarning {
    pub location: SourceLocation,
    pub element: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Imported {
    pub model: RuleModel,
    pub warnings: Vec<ImportWarning>,
}

/// Parse and import a configuration document.
pub fn import_bytes(raw: &[u8]) -> Result<Imported, ConvertError> {
    let root = patronus_xml::parse(raw)?;
    import_document(&root)
}

pub fn import_file(path: &Path) -> Result<Imported, ConvertError> {
    let root = patronus_xml::parse_file(path)?;
    import_document(&root)
}

/// Import an already parsed document.
pub fn import_document(root: &XmlNode) -> Result<Imported, ConvertError> {
    let root_loc = SourceLocation::new(root.tag.clone(), root.line);
    let Some(platform) = detect_platform(root) else {
        return Err(ConvertError::Rejected(vec![Issue::Parse(ParseError::new(
            root_loc,
            format!(
                "unsupported root element <{}>, expected <pfsense> or <opnsense>",
                root.tag
            ),
        ))]));
    };

    let mut cx = Context::default();
    let mut model = RuleModel::empty(platform);
    model.version = detect_version(root).map(str::to_string);
    model.interfaces = interfaces::import_interfaces(root, &root_loc, &mut cx);
    model.groups = interfaces::import_groups(root, &root_loc, &mut cx);
    model.aliases = aliases::import_aliases(root, &root_loc, &mut cx);

    let names = Names::from_model(&model);
    model.rules = filter::import_rules(root, &root_loc, &names, &mut cx);
    let (mode, mappings) = nat::import_nat(root, &root_loc, &names, &mut cx);
    model.outbound_mode = mode;
    model.nat = mappings;
    model.global_unsupported = import_shaper(root, &root_loc);

    debug!(
        platform = %platform,
        interfaces = model.interfaces.len(),
        aliases = model.aliases.len(),
        rules = model.rules.len(),
        nat = model.nat.len(),
        errors = cx.errors.len(),
        warnings = cx.warnings.len(),
        "imported configuration"
    );

    if !cx.errors.is_empty() {
        return Err(ConvertError::Rejected(
            cx.errors.into_iter().map(Issue::Parse).collect(),
        ));
    }

    let issues = refs::check_references(&model);
    if !issues.is_empty() {
        return Err(ConvertError::Rejected(issues));
    }

    Ok(Imported {
        model,
        warnings: cx.warnings,
    })
}

/// Traffic shaper queues and limiters have no nftables counterpart.
fn import_shaper(root: &XmlNode, root_loc: &SourceLocation) -> Vec<GlobalConstruct> {
    let mut out = Vec::new();
    for (tag, construct) in [("shaper", "shaper"), ("dnshaper", "limiter")] {
        let Some(section) = root.get_child(tag) else {
            continue;
        };
        if section.has_child("queue") {
            out.push(GlobalConstruct {
                construct: Construct::new(construct, None),
                origin: root_loc.join(tag, section.line),
            });
        }
    }
    let opn_shaper = root
        .get_child("OPNsense")
        .and_then(|opn| opn.get_child("TrafficShaper"));
    if let Some(shaper) = opn_shaper {
        let configured = ["pipes", "queues"].iter().any(|tag| {
            shaper
                .get_child(tag)
                .is_some_and(|node| !node.children.is_empty())
        });
        if configured {
            out.push(GlobalConstruct {
                construct: Construct::new("shaper", None),
                origin: root_loc.join("OPNsense.TrafficShaper", shaper.line),
            });
        }
    }
    out
}

/// Which child elements an entity reader handles, and how.
pub(crate) struct Schema {
    /// Read by the entity reader itself.
    pub consumed: &'static [&'static str],
    /// Bookkeeping with no filtering meaning, skipped silently.
    pub metadata: &'static [&'static str],
    /// Kept as a construct when they carry a non-empty value.
    pub unsupported_values: &'static [&'static str],
    /// Kept as a construct when present at all.
    pub unsupported_flags: &'static [&'static str],
}

/// Per-import accumulator of errors and warnings.
#[derive(Default)]
pub(crate) struct Context {
    pub errors: Vec<ParseError>,
    pub warnings: Vec<ImportWarning>,
}

impl Context {
    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.errors.push(ParseError::new(location, message));
    }

    pub fn warn_unknown(&mut self, location: SourceLocation, element: &str, entity: &str) {
        warn!(
            path = %location.path,
            line = location.line,
            element,
            "skipping unknown element in {entity}"
        );
        self.warnings.push(ImportWarning {
            location,
            element: element.to_string(),
            message: format!("unknown element <{element}> in {entity} skipped"),
        });
    }

    /// Classify every child of `node` against `schema`, warning about
    /// unknown elements and returning the unsupported constructs found.
    pub fn scan(
        &mut self,
        node: &XmlNode,
        loc: &SourceLocation,
        entity: &str,
        schema: &Schema,
    ) -> Vec<Construct> {
        let mut out = Vec::new();
        for child in &node.children {
            let tag = child.tag.as_str();
            if schema.consumed.contains(&tag) || schema.metadata.contains(&tag) {
                continue;
            }
            if schema.unsupported_values.contains(&tag) {
                if let Some(value) = node_text(child) {
                    out.push(Construct::new(tag, Some(value)));
                }
                continue;
            }
            if schema.unsupported_flags.contains(&tag) {
                if is_set(child) {
                    out.push(Construct::new(tag, None));
                }
                continue;
            }
            self.warn_unknown(loc.join(tag, child.line), tag, entity);
        }
        out
    }
}

/// Lowercased interface, group and alias names known to the document.
pub(crate) struct Names {
    interfaces: BTreeSet<String>,
    aliases: BTreeSet<String>,
}

impl Names {
    fn from_model(model: &RuleModel) -> Self {
        let interfaces = model
            .interfaces
            .iter()
            .map(|iface| iface.name.to_ascii_lowercase())
            .chain(model.groups.iter().map(|g| g.name.to_ascii_lowercase()))
            .chain(PSEUDO_INTERFACES.iter().map(|name| name.to_string()))
            .collect();
        let aliases = model
            .aliases
            .iter()
            .map(|alias| alias.name.to_ascii_lowercase())
            .collect();
        Self {
            interfaces,
            aliases,
        }
    }

    pub fn is_interface(&self, name: &str) -> bool {
        self.interfaces.contains(&name.to_ascii_lowercase())
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains(&name.to_ascii_lowercase())
    }
}

/// Trimmed, non-empty text of a node.
pub(crate) fn node_text(node: &XmlNode) -> Option<&str> {
    node.text
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Flag elements are set by presence (`<log/>`) unless they say otherwise.
pub(crate) fn is_set(node: &XmlNode) -> bool {
    !matches!(
        node_text(node).map(str::to_ascii_lowercase).as_deref(),
        Some("0" | "no" | "false" | "off")
    )
}

pub(crate) fn flag(node: &XmlNode, tag: &str) -> bool {
    node.get_child(tag).is_some_and(is_set)
}

/// Split a comma or whitespace separated list, dropping blanks.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{import_bytes, split_list};
    use crate::error::{ConvertError, IssueCategory};
    use crate::model::{Action, OutboundMode, RuleScope};

    #[test]
    fn rejects_unknown_root() {
        let err = import_bytes(br#"<mikrotik/>"#).expect_err("must fail");
        assert_eq!(err.category(), IssueCategory::Parse);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = import_bytes(b"<pfsense><filter></pfsense>").expect_err("must fail");
        assert!(matches!(err, ConvertError::Xml(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn imports_minimal_pfsense_document() {
        let imported = import_bytes(
            br#"<pfsense>
  <version>23.3</version>
  <interfaces>
    <wan><enable/><if>em0</if><ipaddr>dhcp</ipaddr></wan>
    <lan><enable/><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <filter>
    <rule>
      <type>pass</type>
      <interface>lan</interface>
      <source><network>lan</network></source>
      <destination><any/></destination>
      <created><time>1</time></created>
    </rule>
  </filter>
  <nat><outbound><mode>advanced</mode></outbound></nat>
</pfsense>"#,
        )
        .expect("import");

        let model = imported.model;
        assert_eq!(model.version.as_deref(), Some("23.3"));
        assert_eq!(model.interfaces.len(), 2);
        assert_eq!(model.rules.len(), 1);
        assert_eq!(model.rules[0].action, Action::Pass);
        assert_eq!(model.rules[0].scope, RuleScope::Interface);
        assert_eq!(model.outbound_mode, OutboundMode::Manual);
        assert!(imported.warnings.is_empty());
    }

    #[test]
    fn unknown_elements_become_warnings() {
        let imported = import_bytes(
            br#"<pfsense>
  <interfaces><lan><if>em1</if><ipaddr>10.0.0.1</ipaddr><subnet>24</subnet></lan></interfaces>
  <filter>
    <rule>
      <type>pass</type>
      <interface>lan</interface>
      <source><any/></source>
      <destination><any/></destination>
      <vendor-magic>1</vendor-magic>
    </rule>
  </filter>
</pfsense>"#,
        )
        .expect("import");

        assert_eq!(imported.warnings.len(), 1);
        assert_eq!(imported.warnings[0].element, "vendor-magic");
        assert_eq!(imported.warnings[0].location.path, "pfsense.filter.rule[0].vendor-magic");
        assert_eq!(imported.warnings[0].location.line, 9);
    }

    #[test]
    fn shaper_queues_are_global_constructs() {
        let imported = import_bytes(
            br#"<pfsense>
  <shaper><queue><name>qACK</name></queue></shaper>
  <dnshaper></dnshaper>
</pfsense>"#,
        )
        .expect("import");
        let names: Vec<_> = imported
            .model
            .global_unsupported
            .iter()
            .map(|g| g.construct.name.as_str())
            .collect();
        assert_eq!(names, vec!["shaper"]);
    }

    #[test]
    fn lists_split_on_commas_and_spaces() {
        assert_eq!(split_list("wan, lan  opt1"), vec!["wan", "lan", "opt1"]);
    }
}
