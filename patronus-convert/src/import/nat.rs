use std::net::IpAddr;

use ipnetwork::IpNetwork;
use patronus_xml::XmlNode;

use super::endpoint::{address_spec, is_alias_name, parse_endpoint};
use super::filter::{child_loc, protocol};
use super::{flag, Context, Names, Schema};
use crate::location::SourceLocation;
use crate::model::{
    AddressFamily, AddressSpec, Construct, Endpoint, FilterAssociation, NatKind, NatMapping,
    OneToOne, OutboundMode, OutboundRule, OutboundTranslation, PortForward, PortRange, PortSpec,
};

const PORT_FORWARD_SCHEMA: Schema = Schema {
    consumed: &[
        "interface",
        "ipprotocol",
        "protocol",
        "source",
        "destination",
        "target",
        "local-port",
        "disabled",
        "nordr",
        "descr",
        "associated-rule-id",
        "natreflection",
    ],
    metadata: &["created", "updated", "nosync", "category"],
    unsupported_values: &["poolopts", "source_hash_key"],
    unsupported_flags: &[],
};

const OUTBOUND_SCHEMA: Schema = Schema {
    consumed: &[
        "interface",
        "ipprotocol",
        "protocol",
        "source",
        "sourceport",
        "destination",
        "dstport",
        "target",
        "targetip",
        "targetip_subnet",
        "staticnatport",
        "nonat",
        "disabled",
        "descr",
    ],
    metadata: &["created", "updated", "nosync", "target_subnet", "category"],
    unsupported_values: &["natport", "poolopts", "source_hash_key", "tag", "tagged"],
    unsupported_flags: &[],
};

const ONE_TO_ONE_SCHEMA: Schema = Schema {
    consumed: &[
        "interface",
        "ipprotocol",
        "external",
        "source",
        "destination",
        "disabled",
        "descr",
        "natreflection",
    ],
    metadata: &["created", "updated", "nosync", "category"],
    unsupported_values: &[],
    unsupported_flags: &["nobinat"],
};

/// Read `<nat>`: outbound mode, port forwards, outbound rules and 1:1
/// mappings, each kind indexed in config order.
pub(super) fn import_nat(
    root: &XmlNode,
    root_loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> (OutboundMode, Vec<NatMapping>) {
    let Some(nat) = root.get_child("nat") else {
        return (OutboundMode::default(), Vec::new());
    };
    let nat_loc = root_loc.join("nat", nat.line);
    let mut out = Vec::new();

    for (idx, node) in nat.children_named("rule").enumerate() {
        let loc = nat_loc.indexed("rule", idx, node.line);
        out.extend(port_forward(node, idx, loc, names, cx));
    }

    let mut mode = OutboundMode::default();
    if let Some(outbound) = nat.get_child("outbound") {
        let outbound_loc = nat_loc.join("outbound", outbound.line);
        if let Some(raw) = outbound.child_text("mode") {
            mode = OutboundMode::parse(raw).unwrap_or_else(|| {
                cx.error(
                    child_loc(outbound, &outbound_loc, "mode"),
                    format!("unknown outbound NAT mode '{raw}'"),
                );
                OutboundMode::default()
            });
        }
        for (idx, node) in outbound.children_named("rule").enumerate() {
            let loc = outbound_loc.indexed("rule", idx, node.line);
            out.extend(outbound_rule(node, idx, loc, names, cx));
        }
    }

    for (idx, node) in nat.children_named("onetoone").enumerate() {
        let loc = nat_loc.indexed("onetoone", idx, node.line);
        out.extend(one_to_one(node, idx, loc, names, cx));
    }

    (mode, out)
}

fn port_forward(
    node: &XmlNode,
    index: usize,
    loc: SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<NatMapping> {
    let mut unsupported = cx.scan(node, &loc, "port forward", &PORT_FORWARD_SCHEMA);
    let errors_before = cx.errors.len();

    let interface = required_interface(node, &loc, cx);
    let family = nat_family(node, &loc, cx);
    let protocol = protocol(node.child_text("protocol"), None, node, &loc, cx);
    let source = parse_endpoint(node.get_child("source"), &child_loc(node, &loc, "source"), names, cx);
    let destination = parse_endpoint(
        node.get_child("destination"),
        &child_loc(node, &loc, "destination"),
        names,
        cx,
    );
    let no_redirect = flag(node, "nordr");

    let target = match node.child_text("target") {
        Some(raw) => address_spec(raw).or_else(|| {
            cx.error(child_loc(node, &loc, "target"), format!("invalid redirect target '{raw}'"));
            None
        }),
        None if no_redirect => Some(AddressSpec::Any),
        None => {
            cx.error(loc.clone(), "port forward has no <target>");
            None
        }
    };
    let local_port = match node.child_text("local-port") {
        Some(raw) => PortRange::parse(raw).or_else(|| {
            cx.error(child_loc(node, &loc, "local-port"), format!("invalid local port '{raw}'"));
            None
        }),
        None => None,
    };

    if let Some(reflection) = node.child_text("natreflection") {
        if !matches!(reflection, "disable" | "default") {
            unsupported.push(Construct::new("natreflection", Some(reflection)));
        }
    }

    if cx.errors.len() > errors_before {
        return None;
    }

    let association = match node.child_text("associated-rule-id") {
        None => FilterAssociation::None,
        Some("pass") => FilterAssociation::Pass,
        Some(id) => FilterAssociation::Rule(id.to_string()),
    };

    Some(NatMapping {
        index,
        kind: NatKind::PortForward(PortForward {
            interface: interface?,
            family,
            protocol,
            source: source?,
            destination: destination?,
            target: target?,
            local_port,
            no_redirect,
            association,
        }),
        disabled: flag(node, "disabled"),
        description: node.child_text("descr").map(str::to_string),
        unsupported,
        origin: loc,
    })
}

fn outbound_rule(
    node: &XmlNode,
    index: usize,
    loc: SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<NatMapping> {
    let unsupported = cx.scan(node, &loc, "outbound NAT rule", &OUTBOUND_SCHEMA);
    let errors_before = cx.errors.len();

    let interface = required_interface(node, &loc, cx);
    let family = nat_family(node, &loc, cx);
    let protocol = protocol(node.child_text("protocol"), None, node, &loc, cx);
    let source = parse_endpoint(node.get_child("source"), &child_loc(node, &loc, "source"), names, cx)
        .and_then(|endpoint| with_port(endpoint, node, "sourceport", &loc, cx));
    let destination = parse_endpoint(
        node.get_child("destination"),
        &child_loc(node, &loc, "destination"),
        names,
        cx,
    )
    .and_then(|endpoint| with_port(endpoint, node, "dstport", &loc, cx));
    let translation = outbound_translation(node, &loc, cx);

    if cx.errors.len() > errors_before {
        return None;
    }

    Some(NatMapping {
        index,
        kind: NatKind::Outbound(OutboundRule {
            interface: interface?,
            family,
            protocol,
            source: source?,
            destination: destination?,
            translation: translation?,
            static_port: flag(node, "staticnatport"),
            no_nat: flag(node, "nonat"),
        }),
        disabled: flag(node, "disabled"),
        description: node.child_text("descr").map(str::to_string),
        unsupported,
        origin: loc,
    })
}

/// Outbound rules carry their ports beside the endpoint (`sourceport`,
/// `dstport`) rather than inside it.
fn with_port(
    mut endpoint: Endpoint,
    node: &XmlNode,
    tag: &str,
    loc: &SourceLocation,
    cx: &mut Context,
) -> Option<Endpoint> {
    let Some(raw) = node.child_text(tag) else {
        return Some(endpoint);
    };
    if let Some(range) = PortRange::parse(raw) {
        endpoint.port = Some(PortSpec::Range(range));
    } else if is_alias_name(raw) {
        endpoint.port = Some(PortSpec::Alias(raw.to_string()));
    } else {
        cx.error(child_loc(node, loc, tag), format!("invalid port '{raw}'"));
        return None;
    }
    Some(endpoint)
}

fn outbound_translation(
    node: &XmlNode,
    loc: &SourceLocation,
    cx: &mut Context,
) -> Option<OutboundTranslation> {
    let Some(raw) = node.child_text("target") else {
        return Some(OutboundTranslation::InterfaceAddress);
    };
    if raw == "other-subnet" {
        let Some(ip) = node.child_text("targetip") else {
            cx.error(child_loc(node, loc, "target"), "other-subnet target without <targetip>");
            return None;
        };
        let subnet = node.child_text("targetip_subnet").unwrap_or("32");
        return Some(OutboundTranslation::Pool(format!("{ip}/{subnet}")));
    }
    if let Ok(addr) = raw.parse::<IpAddr>() {
        return Some(OutboundTranslation::Address(addr));
    }
    if let Ok(net) = raw.parse::<IpNetwork>() {
        return Some(OutboundTranslation::Pool(net.to_string()));
    }
    if is_alias_name(raw) {
        return Some(OutboundTranslation::Pool(raw.to_string()));
    }
    cx.error(child_loc(node, loc, "target"), format!("invalid outbound NAT target '{raw}'"));
    None
}

fn one_to_one(
    node: &XmlNode,
    index: usize,
    loc: SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<NatMapping> {
    let mut unsupported = cx.scan(node, &loc, "1:1 mapping", &ONE_TO_ONE_SCHEMA);
    let errors_before = cx.errors.len();

    let interface = required_interface(node, &loc, cx);
    let external = match node.child_text("external") {
        Some(raw) => raw.parse::<IpAddr>().ok().or_else(|| {
            cx.error(child_loc(node, &loc, "external"), format!("invalid external address '{raw}'"));
            None
        }),
        None => {
            cx.error(loc.clone(), "1:1 mapping has no <external> address");
            None
        }
    };
    let internal = node
        .get_child("source")
        .and_then(|source| source.child_text("address").or_else(|| source.child_text("network")))
        .and_then(|raw| match AddressSpec::parse_literal(raw) {
            Some(AddressSpec::Network(net)) => Some(net),
            _ => {
                cx.error(
                    child_loc(node, &loc, "source"),
                    format!("1:1 internal address '{raw}' must be a host or network"),
                );
                None
            }
        });
    if internal.is_none() && node.get_child("source").is_none() {
        cx.error(loc.clone(), "1:1 mapping has no internal <source>");
    }
    let destination = parse_endpoint(
        node.get_child("destination"),
        &child_loc(node, &loc, "destination"),
        names,
        cx,
    );
    if let Some(reflection) = node.child_text("natreflection") {
        if reflection == "enable" {
            unsupported.push(Construct::new("natreflection", Some(reflection)));
        }
    }

    if cx.errors.len() > errors_before {
        return None;
    }

    Some(NatMapping {
        index,
        kind: NatKind::OneToOne(OneToOne {
            interface: interface?,
            external: external?,
            internal: internal?,
            destination: destination?,
        }),
        disabled: flag(node, "disabled"),
        description: node.child_text("descr").map(str::to_string),
        unsupported,
        origin: loc,
    })
}

fn required_interface(node: &XmlNode, loc: &SourceLocation, cx: &mut Context) -> Option<String> {
    match node.child_text("interface") {
        Some(name) => Some(name.to_ascii_lowercase()),
        None => {
            cx.error(loc.clone(), "NAT entry has no <interface>");
            None
        }
    }
}

fn nat_family(node: &XmlNode, loc: &SourceLocation, cx: &mut Context) -> AddressFamily {
    let Some(raw) = node.child_text("ipprotocol") else {
        return AddressFamily::Inet;
    };
    AddressFamily::parse(raw).unwrap_or_else(|| {
        cx.error(child_loc(node, loc, "ipprotocol"), format!("unknown address family '{raw}'"));
        AddressFamily::Inet
    })
}
