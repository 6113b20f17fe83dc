use std::collections::BTreeSet;

use patronus_xml::XmlNode;

use super::endpoint::is_alias_name;
use super::{flag, Context, Schema};
use crate::location::SourceLocation;
use crate::model::{AddressSpec, Alias, AliasEntry, AliasKind, PortRange};

const PFSENSE_SCHEMA: Schema = Schema {
    consumed: &["name", "type", "address", "descr", "url", "aliasurl"],
    metadata: &["detail", "updatefreq", "lastupdate"],
    unsupported_values: &[],
    unsupported_flags: &[],
};

const OPNSENSE_SCHEMA: Schema = Schema {
    consumed: &["enabled", "name", "type", "content", "description"],
    metadata: &[
        "proto",
        "counters",
        "updatefreq",
        "interface",
        "categories",
        "path_expression",
        "authtype",
        "username",
        "password",
        "expire",
        "current_items",
        "last_updated",
        "eval_nomatch",
        "eval_match",
    ],
    unsupported_values: &[],
    unsupported_flags: &[],
};

/// Raw alias before its entries are classified.
struct RawAlias<'a> {
    name: String,
    kind: AliasKind,
    tokens: Vec<String>,
    description: Option<String>,
    enabled: bool,
    node: &'a XmlNode,
    origin: SourceLocation,
}

pub(super) fn import_aliases(
    root: &XmlNode,
    root_loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<Alias> {
    let mut raw = pfsense_aliases(root, root_loc, cx);
    raw.extend(opnsense_aliases(root, root_loc, cx));

    let mut seen = BTreeSet::new();
    let mut unique = Vec::new();
    for alias in raw {
        if !is_alias_name(&alias.name) {
            cx.error(alias.origin, format!("invalid alias name '{}'", alias.name));
            continue;
        }
        if !seen.insert(alias.name.to_ascii_lowercase()) {
            cx.error(alias.origin, format!("duplicate alias name '{}'", alias.name));
            continue;
        }
        unique.push(alias);
    }

    unique
        .into_iter()
        .filter_map(|alias| classify(alias, &seen, cx))
        .collect()
}

fn pfsense_aliases<'a>(
    root: &'a XmlNode,
    root_loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<RawAlias<'a>> {
    let Some(section) = root.get_child("aliases") else {
        return Vec::new();
    };
    let section_loc = root_loc.join("aliases", section.line);
    let mut out = Vec::new();
    for (idx, node) in section.children_named("alias").enumerate() {
        let origin = section_loc.indexed("alias", idx, node.line);
        cx.scan(node, &origin, "alias", &PFSENSE_SCHEMA);
        let Some(name) = node.child_text("name") else {
            cx.error(origin, "alias has no <name>");
            continue;
        };
        let kind = AliasKind::parse(node.child_text("type").unwrap_or("host"));
        let mut tokens: Vec<String> = node
            .child_text("address")
            .map(|value| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if !kind.is_static() {
            for tag in ["url", "aliasurl"] {
                tokens.extend(node.children_named(tag).filter_map(|n| {
                    n.text.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
                }));
            }
        }
        out.push(RawAlias {
            name: name.to_string(),
            kind,
            tokens,
            description: node.child_text("descr").map(str::to_string),
            enabled: true,
            node,
            origin,
        });
    }
    out
}

fn opnsense_aliases<'a>(
    root: &'a XmlNode,
    root_loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<RawAlias<'a>> {
    let Some(opn) = root.get_child("OPNsense") else {
        return Vec::new();
    };
    let Some(section) = opn
        .get_child("Firewall")
        .and_then(|fw| fw.get_child("Alias"))
        .and_then(|alias| alias.get_child("aliases"))
    else {
        return Vec::new();
    };
    let section_loc = root_loc.join("OPNsense.Firewall.Alias.aliases", section.line);
    let mut out = Vec::new();
    for (idx, node) in section.children_named("alias").enumerate() {
        let origin = section_loc.indexed("alias", idx, node.line);
        cx.scan(node, &origin, "alias", &OPNSENSE_SCHEMA);
        let Some(name) = node.child_text("name") else {
            cx.error(origin, "alias has no <name>");
            continue;
        };
        let tokens: Vec<String> = node
            .child_text("content")
            .map(|value| value.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        out.push(RawAlias {
            name: name.to_string(),
            kind: AliasKind::parse(node.child_text("type").unwrap_or("host")),
            tokens,
            description: node.child_text("description").map(str::to_string),
            enabled: node.get_child("enabled").is_none() || flag(node, "enabled"),
            node,
            origin,
        });
    }
    out
}

fn classify(raw: RawAlias<'_>, known: &BTreeSet<String>, cx: &mut Context) -> Option<Alias> {
    let mut entries = Vec::new();
    let mut failed = false;
    for token in &raw.tokens {
        match classify_token(token, &raw.kind, known) {
            Some(entry) => entries.push(entry),
            None => {
                let line = raw.node.line;
                cx.error(
                    raw.origin.join("content", line),
                    format!("alias '{}' has invalid {} entry '{token}'", raw.name, raw.kind),
                );
                failed = true;
            }
        }
    }
    if failed {
        return None;
    }
    Some(Alias {
        name: raw.name,
        kind: raw.kind,
        entries,
        description: raw.description,
        enabled: raw.enabled,
        origin: raw.origin,
    })
}

fn classify_token(token: &str, kind: &AliasKind, known: &BTreeSet<String>) -> Option<AliasEntry> {
    let lower = token.to_ascii_lowercase();
    match kind {
        AliasKind::Host | AliasKind::Network => {
            match AddressSpec::parse_literal(token) {
                Some(AddressSpec::Network(net)) => return Some(AliasEntry::Network(net)),
                Some(AddressSpec::Range { start, end }) => {
                    return Some(AliasEntry::Range { start, end })
                }
                _ => {}
            }
            if known.contains(&lower) || (is_alias_name(token) && !token.contains('.')) {
                return Some(AliasEntry::Alias(token.to_string()));
            }
            is_hostname(token).then(|| AliasEntry::Hostname(token.to_string()))
        }
        AliasKind::Port => {
            if let Some(range) = PortRange::parse(token) {
                return Some(AliasEntry::Port(range));
            }
            is_alias_name(token).then(|| AliasEntry::Alias(token.to_string()))
        }
        _ => Some(AliasEntry::Other(token.to_string())),
    }
}

fn is_hostname(token: &str) -> bool {
    token.contains('.')
        && token.len() <= 253
        && token
            .split('.')
            .all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
}

#[cfg(test)]
mod tests {
    use super::import_aliases;
    use crate::import::Context;
    use crate::location::SourceLocation;
    use crate::model::{AliasEntry, AliasKind};
    use patronus_xml::parse;

    fn import(xml: &[u8]) -> (Vec<crate::model::Alias>, Context) {
        let root = parse(xml).expect("parse");
        let mut cx = Context::default();
        let aliases = import_aliases(&root, &SourceLocation::new(root.tag.clone(), 1), &mut cx);
        (aliases, cx)
    }

    #[test]
    fn pfsense_entries_are_classified() {
        let (aliases, cx) = import(
            br#"<pfsense><aliases>
  <alias><name>mixed</name><type>host</type><address>10.0.0.1 10.0.0.5-10.0.0.9 inner updates.example.com</address></alias>
  <alias><name>inner</name><type>network</type><address>172.16.0.0/12</address></alias>
  <alias><name>web</name><type>port</type><address>80 8000:8080</address></alias>
</aliases></pfsense>"#,
        );
        assert!(cx.errors.is_empty(), "{:?}", cx.errors);
        let mixed = &aliases[0];
        assert!(matches!(mixed.entries[0], AliasEntry::Network(_)));
        assert!(matches!(mixed.entries[1], AliasEntry::Range { .. }));
        assert_eq!(mixed.entries[2], AliasEntry::Alias("inner".to_string()));
        assert_eq!(mixed.entries[3], AliasEntry::Hostname("updates.example.com".to_string()));
        assert!(mixed.has_hostnames());
        assert_eq!(aliases[2].kind, AliasKind::Port);
    }

    #[test]
    fn opnsense_content_is_newline_separated() {
        let (aliases, cx) = import(
            br#"<opnsense><OPNsense><Firewall><Alias><aliases>
  <alias uuid="1"><enabled>0</enabled><name>blocked</name><type>geoip</type><content>RU
CN</content></alias>
</aliases></Alias></Firewall></OPNsense></opnsense>"#,
        );
        assert!(cx.errors.is_empty());
        assert!(!aliases[0].enabled);
        assert_eq!(aliases[0].kind, AliasKind::GeoIp);
        assert_eq!(aliases[0].entries.len(), 2);
    }

    #[test]
    fn duplicate_names_are_parse_errors() {
        let (aliases, cx) = import(
            br#"<pfsense><aliases>
  <alias><name>Servers</name><type>host</type><address>10.0.0.1</address></alias>
  <alias><name>servers</name><type>host</type><address>10.0.0.2</address></alias>
</aliases></pfsense>"#,
        );
        assert_eq!(aliases.len(), 1);
        assert_eq!(cx.errors.len(), 1);
        assert!(cx.errors[0].message.contains("duplicate alias name 'servers'"));
        assert_eq!(cx.errors[0].location.path, "pfsense.aliases.alias[1]");
    }

    #[test]
    fn invalid_port_entry_is_reported() {
        let (aliases, cx) = import(
            br#"<pfsense><aliases>
  <alias><name>ports</name><type>port</type><address>80 90-70</address></alias>
</aliases></pfsense>"#,
        );
        assert!(aliases.is_empty());
        assert!(cx.errors[0].message.contains("invalid port entry '90-70'"));
    }
}
