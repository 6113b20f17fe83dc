//! Source/destination readers shared by filter and NAT rules.

use patronus_xml::XmlNode;

use super::{Context, Names};
use crate::location::SourceLocation;
use crate::model::{AddressSpec, Endpoint, PortRange, PortSpec};

const ENDPOINT_ELEMENTS: &[&str] = &["any", "address", "network", "port", "not"];

/// Read a nested `<source>`/`<destination>` element. A missing element
/// means any.
pub(super) fn parse_endpoint(
    node: Option<&XmlNode>,
    loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<Endpoint> {
    let Some(node) = node else {
        return Some(Endpoint::any());
    };
    for child in &node.children {
        if !ENDPOINT_ELEMENTS.contains(&child.tag.as_str()) {
            cx.warn_unknown(loc.join(&child.tag, child.line), &child.tag, "endpoint");
        }
    }

    let address = if let Some(network) = node.child_text("network") {
        network_spec(network, names)
    } else if let Some(address) = node.child_text("address") {
        match address_spec(address) {
            Some(spec) => spec,
            None => {
                cx.error(loc.clone(), format!("invalid address '{address}'"));
                return None;
            }
        }
    } else {
        AddressSpec::Any
    };

    let port = match node.child_text("port") {
        Some(raw) => Some(port_spec(raw).or_else(|| {
            cx.error(loc.clone(), format!("invalid port '{raw}'"));
            None
        })?),
        None => None,
    };

    Some(Endpoint {
        address,
        port,
        negate: node.has_child("not"),
    })
}

/// Classify a `<network>` value: `(self)`, a literal, an interface
/// network (`lan`) or an interface address (`lanip`).
pub(super) fn network_spec(raw: &str, names: &Names) -> AddressSpec {
    if raw == "(self)" {
        return AddressSpec::Firewall;
    }
    if let Some(literal) = AddressSpec::parse_literal(raw) {
        return literal;
    }
    let lower = raw.to_ascii_lowercase();
    if names.is_interface(&lower) {
        return AddressSpec::InterfaceNet(lower);
    }
    if let Some(stem) = lower.strip_suffix("ip") {
        if !stem.is_empty() {
            return AddressSpec::InterfaceAddress(stem.to_string());
        }
    }
    AddressSpec::InterfaceNet(lower)
}

/// Classify an `<address>` value: a literal or an alias name.
pub(super) fn address_spec(raw: &str) -> Option<AddressSpec> {
    if let Some(literal) = AddressSpec::parse_literal(raw) {
        return Some(literal);
    }
    is_alias_name(raw).then(|| AddressSpec::Alias(raw.to_string()))
}

/// Classify a flat (OPNsense automation) address field, which mixes all
/// of the above in one value.
pub(super) fn flat_address_spec(raw: &str, names: &Names) -> Option<AddressSpec> {
    let lower = raw.to_ascii_lowercase();
    if lower.is_empty() || lower == "any" {
        return Some(AddressSpec::Any);
    }
    if raw == "(self)" {
        return Some(AddressSpec::Firewall);
    }
    if let Some(literal) = AddressSpec::parse_literal(raw) {
        return Some(literal);
    }
    if names.is_interface(&lower) && !names.is_alias(&lower) {
        return Some(AddressSpec::InterfaceNet(lower));
    }
    if let Some(stem) = lower.strip_suffix("ip") {
        if names.is_interface(stem) && !names.is_alias(&lower) {
            return Some(AddressSpec::InterfaceAddress(stem.to_string()));
        }
    }
    address_spec(raw)
}

pub(super) fn port_spec(raw: &str) -> Option<PortSpec> {
    if let Some(range) = PortRange::parse(raw) {
        return Some(PortSpec::Range(range));
    }
    is_alias_name(raw).then(|| PortSpec::Alias(raw.to_string()))
}

/// pf alias names: letters, digits and underscores.
pub(super) fn is_alias_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 31
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !raw.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::{address_spec, is_alias_name, network_spec, parse_endpoint, port_spec};
    use crate::import::{Context, Names};
    use crate::location::SourceLocation;
    use crate::model::{AddressSpec, PortRange, PortSpec};
    use patronus_xml::parse;
    use std::collections::BTreeSet;

    fn names() -> Names {
        Names {
            interfaces: ["wan", "lan", "opt1"].iter().map(|s| s.to_string()).collect(),
            aliases: BTreeSet::new(),
        }
    }

    #[test]
    fn network_values() {
        let names = names();
        assert_eq!(network_spec("(self)", &names), AddressSpec::Firewall);
        assert_eq!(network_spec("LAN", &names), AddressSpec::InterfaceNet("lan".into()));
        assert_eq!(network_spec("wanip", &names), AddressSpec::InterfaceAddress("wan".into()));
        assert!(matches!(network_spec("10.0.0.0/8", &names), AddressSpec::Network(_)));
    }

    #[test]
    fn address_and_port_values() {
        assert_eq!(address_spec("web_servers"), Some(AddressSpec::Alias("web_servers".into())));
        assert_eq!(address_spec("10.0.0.1/33"), None);
        assert_eq!(port_spec("8080:8090"), Some(PortSpec::Range(PortRange { start: 8080, end: 8090 })));
        assert_eq!(port_spec("70000"), None);
        assert!(!is_alias_name("bad-name"));
    }

    #[test]
    fn endpoint_with_negation_and_port() {
        let node = parse(br#"<destination><not/><network>lan</network><port>443</port></destination>"#)
            .expect("parse");
        let mut cx = Context::default();
        let endpoint = parse_endpoint(Some(&node), &SourceLocation::default(), &names(), &mut cx)
            .expect("endpoint");
        assert!(endpoint.negate);
        assert_eq!(endpoint.address, AddressSpec::InterfaceNet("lan".into()));
        assert_eq!(endpoint.port, Some(PortSpec::Range(PortRange::single(443))));
        assert!(cx.errors.is_empty());
    }

    #[test]
    fn invalid_port_is_an_error() {
        let node = parse(br#"<destination><any/><port>99999</port></destination>"#).expect("parse");
        let mut cx = Context::default();
        let endpoint = parse_endpoint(Some(&node), &SourceLocation::default(), &names(), &mut cx);
        assert!(endpoint.is_none());
        assert_eq!(cx.errors.len(), 1);
    }
}
