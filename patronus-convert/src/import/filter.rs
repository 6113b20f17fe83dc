use patronus_xml::XmlNode;

use super::endpoint::{flat_address_spec, parse_endpoint, port_spec};
use super::{flag, split_list, Context, Names, Schema};
use crate::location::SourceLocation;
use crate::model::{
    Action, AddressFamily, Construct, Direction, Endpoint, Protocol, Rule, RuleScope,
};

const LEGACY_SCHEMA: Schema = Schema {
    consumed: &[
        "tracker",
        "type",
        "interface",
        "ipprotocol",
        "protocol",
        "icmptype",
        "icmp6-type",
        "source",
        "destination",
        "descr",
        "disabled",
        "log",
        "floating",
        "quick",
        "direction",
        "associated-rule-id",
        "statetype",
    ],
    metadata: &[
        "id",
        "created",
        "updated",
        "nosync",
        "disablereplyto",
        "category",
        "label",
        "sequence",
    ],
    unsupported_values: &[
        "gateway",
        "sched",
        "dnpipe",
        "pdnpipe",
        "ackqueue",
        "defaultqueue",
        "tag",
        "tagged",
        "max",
        "max-src-nodes",
        "max-src-conn",
        "max-src-states",
        "max-src-conn-rate",
        "max-src-conn-rates",
        "statetimeout",
        "os",
        "tcpflags1",
        "tcpflags2",
        "vlanprio",
        "vlanprioset",
        "set-prio",
        "prio",
        "overload",
    ],
    unsupported_flags: &["tcpflags_any", "allowopts", "nopfsync"],
};

const AUTOMATION_SCHEMA: Schema = Schema {
    consumed: &[
        "enabled",
        "sequence",
        "action",
        "quick",
        "interface",
        "direction",
        "ipprotocol",
        "protocol",
        "source_net",
        "source_not",
        "source_port",
        "destination_net",
        "destination_not",
        "destination_port",
        "log",
        "description",
    ],
    metadata: &["categories", "category", "interfacenot", "statetype", "nosync"],
    unsupported_values: &["gateway", "sched", "tag", "tagged", "shaper1", "shaper2"],
    unsupported_flags: &["replyto"],
};

/// Default `statetype`; anything else changes state tracking.
const KEEP_STATE: &str = "keep state";

/// Read all filter rules in pf evaluation order: automation rules by
/// sequence, then floating rules, then interface rules, each in config
/// order. Rule indexes follow that order.
pub(super) fn import_rules(
    root: &XmlNode,
    root_loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Vec<Rule> {
    let mut automation = automation_rules(root, root_loc, names, cx);
    automation.sort_by_key(|(sequence, _)| *sequence);

    let mut floating = Vec::new();
    let mut interface = Vec::new();
    for rule in legacy_rules(root, root_loc, names, cx) {
        if rule.scope == RuleScope::Floating {
            floating.push(rule);
        } else {
            interface.push(rule);
        }
    }

    automation
        .into_iter()
        .map(|(_, rule)| rule)
        .chain(floating)
        .chain(interface)
        .enumerate()
        .map(|(index, mut rule)| {
            rule.index = index;
            rule
        })
        .collect()
}

fn legacy_rules(
    root: &XmlNode,
    root_loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Vec<Rule> {
    let Some(filter) = root.get_child("filter") else {
        return Vec::new();
    };
    let filter_loc = root_loc.join("filter", filter.line);
    filter
        .children_named("rule")
        .enumerate()
        .filter_map(|(idx, node)| {
            let loc = filter_loc.indexed("rule", idx, node.line);
            legacy_rule(node, loc, names, cx)
        })
        .collect()
}

fn legacy_rule(node: &XmlNode, loc: SourceLocation, names: &Names, cx: &mut Context) -> Option<Rule> {
    let mut unsupported = cx.scan(node, &loc, "filter rule", &LEGACY_SCHEMA);
    let errors_before = cx.errors.len();

    let action = match node.child_text("type") {
        None => Action::Pass,
        Some(raw) => Action::parse(raw).unwrap_or_else(|| {
            cx.error(child_loc(node, &loc, "type"), format!("unknown rule action '{raw}'"));
            Action::Pass
        }),
    };
    let floating = flag(node, "floating");
    let scope = if floating {
        RuleScope::Floating
    } else {
        RuleScope::Interface
    };
    let interfaces = interface_list(node.child_text("interface"));
    if interfaces.is_empty() {
        cx.error(loc.clone(), "rule has no <interface>");
    } else if !floating && interfaces.len() > 1 {
        cx.error(
            child_loc(node, &loc, "interface"),
            "only floating rules may name several interfaces",
        );
    }

    let direction = if floating {
        let raw = node.child_text("direction").unwrap_or("any");
        Direction::parse(raw).unwrap_or_else(|| {
            cx.error(child_loc(node, &loc, "direction"), format!("unknown direction '{raw}'"));
            Direction::Any
        })
    } else {
        Direction::In
    };

    let family = family(node.child_text("ipprotocol"), node, &loc, cx);
    let icmp_tag = if family == AddressFamily::Inet6 {
        "icmp6-type"
    } else {
        "icmptype"
    };
    let protocol = protocol(node.child_text("protocol"), node.child_text(icmp_tag), node, &loc, cx);

    let source = parse_endpoint(node.get_child("source"), &child_loc(node, &loc, "source"), names, cx);
    let destination = parse_endpoint(
        node.get_child("destination"),
        &child_loc(node, &loc, "destination"),
        names,
        cx,
    );

    if let Some(state) = node.child_text("statetype") {
        if !state.eq_ignore_ascii_case(KEEP_STATE) {
            unsupported.push(Construct::new("statetype", Some(state)));
        }
    }

    if cx.errors.len() > errors_before {
        return None;
    }

    Some(Rule {
        index: 0,
        tracker: node.child_text("tracker").map(str::to_string),
        action,
        direction,
        interfaces,
        scope,
        // Interface-tab rules are always quick in pf.
        quick: !floating || flag(node, "quick"),
        family,
        protocol,
        source: source?,
        destination: destination?,
        log: flag(node, "log"),
        disabled: flag(node, "disabled"),
        description: node.child_text("descr").map(str::to_string),
        association: node.child_text("associated-rule-id").map(str::to_string),
        unsupported,
        origin: loc,
    })
}

fn automation_rules(
    root: &XmlNode,
    root_loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Vec<(u32, Rule)> {
    let Some(rules) = root
        .get_child("OPNsense")
        .and_then(|opn| opn.get_child("Firewall"))
        .and_then(|fw| fw.get_child("Filter"))
        .and_then(|filter| filter.get_child("rules"))
    else {
        return Vec::new();
    };
    let section_loc = root_loc.join("OPNsense.Firewall.Filter.rules", rules.line);
    rules
        .children_named("rule")
        .enumerate()
        .filter_map(|(idx, node)| {
            let loc = section_loc.indexed("rule", idx, node.line);
            automation_rule(node, loc, names, cx)
        })
        .collect()
}

fn automation_rule(
    node: &XmlNode,
    loc: SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<(u32, Rule)> {
    let unsupported = cx.scan(node, &loc, "automation rule", &AUTOMATION_SCHEMA);
    let errors_before = cx.errors.len();

    let sequence = match node.child_text("sequence") {
        None => u32::MAX,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            cx.error(child_loc(node, &loc, "sequence"), format!("invalid sequence '{raw}'"));
            u32::MAX
        }),
    };
    let action = match node.child_text("action") {
        None => Action::Pass,
        Some(raw) => Action::parse(raw).unwrap_or_else(|| {
            cx.error(child_loc(node, &loc, "action"), format!("unknown rule action '{raw}'"));
            Action::Pass
        }),
    };
    let direction = {
        let raw = node.child_text("direction").unwrap_or("in");
        Direction::parse(raw).unwrap_or_else(|| {
            cx.error(child_loc(node, &loc, "direction"), format!("unknown direction '{raw}'"));
            Direction::In
        })
    };
    let interfaces = interface_list(node.child_text("interface"));
    if interfaces.is_empty() {
        cx.error(loc.clone(), "automation rule has no <interface>");
    }
    let family = family(node.child_text("ipprotocol"), node, &loc, cx);
    let protocol = protocol(node.child_text("protocol"), None, node, &loc, cx);
    let source = flat_endpoint(node, "source", &loc, names, cx);
    let destination = flat_endpoint(node, "destination", &loc, names, cx);

    if cx.errors.len() > errors_before {
        return None;
    }

    let rule = Rule {
        index: 0,
        tracker: node.attributes.get("uuid").cloned(),
        action,
        direction,
        interfaces,
        scope: RuleScope::Automation,
        quick: node.get_child("quick").is_none() || flag(node, "quick"),
        family,
        protocol,
        source: source?,
        destination: destination?,
        log: flag(node, "log"),
        disabled: node.get_child("enabled").is_some() && !flag(node, "enabled"),
        description: node.child_text("description").map(str::to_string),
        association: None,
        unsupported,
        origin: loc,
    };
    Some((sequence, rule))
}

/// `source_net` / `source_not` / `source_port` style endpoint.
fn flat_endpoint(
    node: &XmlNode,
    side: &str,
    loc: &SourceLocation,
    names: &Names,
    cx: &mut Context,
) -> Option<Endpoint> {
    let net_tag = format!("{side}_net");
    let port_tag = format!("{side}_port");
    let raw = node.child_text(&net_tag).unwrap_or("any");
    let Some(address) = flat_address_spec(raw, names) else {
        cx.error(child_loc(node, loc, &net_tag), format!("invalid address '{raw}'"));
        return None;
    };
    let port = match node.child_text(&port_tag) {
        None => None,
        Some(raw) => match port_spec(raw) {
            Some(port) => Some(port),
            None => {
                cx.error(child_loc(node, loc, &port_tag), format!("invalid port '{raw}'"));
                return None;
            }
        },
    };
    Some(Endpoint {
        address,
        port,
        negate: flag(node, &format!("{side}_not")),
    })
}

fn interface_list(raw: Option<&str>) -> Vec<String> {
    raw.map(split_list)
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect()
}

fn family(raw: Option<&str>, node: &XmlNode, loc: &SourceLocation, cx: &mut Context) -> AddressFamily {
    let Some(raw) = raw else {
        return AddressFamily::Inet;
    };
    AddressFamily::parse(raw).unwrap_or_else(|| {
        cx.error(child_loc(node, loc, "ipprotocol"), format!("unknown address family '{raw}'"));
        AddressFamily::Inet
    })
}

pub(super) fn protocol(
    raw: Option<&str>,
    icmp_types: Option<&str>,
    node: &XmlNode,
    loc: &SourceLocation,
    cx: &mut Context,
) -> Protocol {
    let raw = raw.unwrap_or("any");
    match Protocol::parse(raw) {
        Some(Protocol::Icmp { .. }) => Protocol::Icmp {
            types: icmp_types
                .map(split_list)
                .unwrap_or_default()
                .into_iter()
                .filter(|t| t != "any")
                .collect(),
        },
        Some(protocol) => protocol,
        None => {
            cx.error(child_loc(node, loc, "protocol"), format!("unknown protocol '{raw}'"));
            Protocol::Any
        }
    }
}

/// Location of the direct child `tag`, or of the node when absent.
pub(super) fn child_loc(node: &XmlNode, loc: &SourceLocation, tag: &str) -> SourceLocation {
    match node.get_child(tag) {
        Some(child) => loc.join(tag, child.line),
        None => loc.clone(),
    }
}
