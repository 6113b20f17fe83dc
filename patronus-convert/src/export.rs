//! Rule model back to a pfSense/OPNsense configuration document.
//!
//! The document only carries what the model knows: interfaces, VLAN tags,
//! groups, aliases, filter rules, NAT and the traffic shaper markers.
//! Importing it again yields the same model up to source locations.

use std::path::Path;

use patronus_xml::{WriteError, XmlNode};
use tracing::debug;

use crate::detect::Platform;
use crate::model::{
    AddressMode, AddressSpec, Alias, Construct, Endpoint, FilterAssociation, Interface,
    InterfaceGroup, NatKind, NatMapping, OneToOne, OutboundMode, OutboundRule,
    OutboundTranslation, PortForward, Protocol, Rule, RuleModel, RuleScope,
};

/// Build the configuration document for `model`.
pub fn export_document(model: &RuleModel) -> XmlNode {
    let mut root = XmlNode::new(model.platform.root_tag());
    if let Some(version) = &model.version {
        root.children.push(XmlNode::with_text("version", version));
    }

    if !model.interfaces.is_empty() {
        let mut section = XmlNode::new("interfaces");
        section.children.extend(model.interfaces.iter().map(interface));
        root.children.push(section);
    }
    let vlans: Vec<XmlNode> = model.interfaces.iter().filter_map(vlan).collect();
    if !vlans.is_empty() {
        let mut section = XmlNode::new("vlans");
        section.children = vlans;
        root.children.push(section);
    }
    if !model.groups.is_empty() {
        let mut section = XmlNode::new("ifgroups");
        section.children.extend(model.groups.iter().map(group));
        root.children.push(section);
    }

    let legacy_aliases =
        model.platform == Platform::PfSense && model.aliases.iter().all(|alias| alias.enabled);
    if !model.aliases.is_empty() && legacy_aliases {
        let mut section = XmlNode::new("aliases");
        section.children.extend(model.aliases.iter().map(legacy_alias));
        root.children.push(section);
    }

    let legacy_rules: Vec<XmlNode> = model
        .rules
        .iter()
        .filter(|rule| rule.scope != RuleScope::Automation)
        .map(legacy_rule)
        .collect();
    if !legacy_rules.is_empty() {
        let mut section = XmlNode::new("filter");
        section.children = legacy_rules;
        root.children.push(section);
    }

    if !model.nat.is_empty() || model.outbound_mode != OutboundMode::default() {
        root.children.push(nat(model));
    }

    for global in &model.global_unsupported {
        let tag = match global.construct.name.as_str() {
            "limiter" => "dnshaper",
            _ => "shaper",
        };
        root.children.push(XmlNode::new(tag).child(XmlNode::new("queue")));
    }

    let automation: Vec<XmlNode> = model
        .rules
        .iter()
        .filter(|rule| rule.scope == RuleScope::Automation)
        .enumerate()
        .map(|(position, rule)| automation_rule(rule, position))
        .collect();
    let opn_aliases = !model.aliases.is_empty() && !legacy_aliases;
    if !automation.is_empty() || opn_aliases {
        let mut firewall = XmlNode::new("Firewall");
        if opn_aliases {
            let mut list = XmlNode::new("aliases");
            list.children.extend(model.aliases.iter().map(opn_alias));
            firewall.children.push(XmlNode::new("Alias").child(list));
        }
        if !automation.is_empty() {
            let mut rules = XmlNode::new("rules");
            rules.children = automation;
            firewall.children.push(XmlNode::new("Filter").child(rules));
        }
        root.children.push(XmlNode::new("OPNsense").child(firewall));
    }

    debug!(
        platform = %model.platform,
        sections = root.children.len(),
        "built configuration document"
    );
    root
}

/// Serialized configuration document with an XML declaration.
pub fn export_bytes(model: &RuleModel) -> Result<Vec<u8>, WriteError> {
    patronus_xml::write_document(&export_document(model))
}

pub fn export_file(model: &RuleModel, path: &Path) -> Result<(), WriteError> {
    patronus_xml::write_file(&export_document(model), path)
}

fn interface(iface: &Interface) -> XmlNode {
    let mut node = XmlNode::new(iface.name.as_str());
    if iface.enabled {
        node.children.push(XmlNode::new("enable"));
    }
    node.children.push(XmlNode::with_text("if", iface.device.as_str()));
    if let Some(descr) = &iface.description {
        node.children.push(XmlNode::with_text("descr", descr.as_str()));
    }
    address_mode(&mut node, &iface.ipv4, "ipaddr", "subnet");
    address_mode(&mut node, &iface.ipv6, "ipaddrv6", "subnetv6");
    if let Some(gateway) = &iface.gateway {
        node.children.push(XmlNode::with_text("gateway", gateway.as_str()));
    }
    push_constructs(&mut node, &iface.unsupported);
    node
}

fn address_mode(node: &mut XmlNode, mode: &AddressMode, addr_tag: &str, prefix_tag: &str) {
    match mode {
        AddressMode::None => {}
        AddressMode::Static(net) => {
            node.children.push(XmlNode::with_text(addr_tag, net.ip().to_string()));
            node.children.push(XmlNode::with_text(prefix_tag, net.prefix().to_string()));
        }
        AddressMode::Dynamic(kind) => {
            node.children.push(XmlNode::with_text(addr_tag, kind.as_str()));
        }
    }
}

fn vlan(iface: &Interface) -> Option<XmlNode> {
    let tag = iface.vlan?;
    let parent = iface
        .device
        .rsplit_once('.')
        .map_or(iface.device.as_str(), |(parent, _)| parent);
    Some(
        XmlNode::new("vlan")
            .child(XmlNode::with_text("if", parent))
            .child(XmlNode::with_text("tag", tag.to_string()))
            .child(XmlNode::with_text("vlanif", iface.device.as_str())),
    )
}

fn group(group: &InterfaceGroup) -> XmlNode {
    let mut node = XmlNode::new("ifgroupentry")
        .child(XmlNode::with_text("ifname", group.name.as_str()))
        .child(XmlNode::with_text("members", group.members.join(" ")));
    if let Some(descr) = &group.description {
        node.children.push(XmlNode::with_text("descr", descr.as_str()));
    }
    node
}

fn alias_tokens(alias: &Alias) -> Vec<String> {
    alias.entries.iter().map(ToString::to_string).collect()
}

fn legacy_alias(alias: &Alias) -> XmlNode {
    let mut node = XmlNode::new("alias")
        .child(XmlNode::with_text("name", alias.name.as_str()))
        .child(XmlNode::with_text("type", alias.kind.as_str()));
    let tokens = alias_tokens(alias);
    if !tokens.is_empty() {
        node.children.push(XmlNode::with_text("address", tokens.join(" ")));
    }
    if let Some(descr) = &alias.description {
        node.children.push(XmlNode::with_text("descr", descr.as_str()));
    }
    node
}

fn opn_alias(alias: &Alias) -> XmlNode {
    let mut node = XmlNode::new("alias")
        .child(XmlNode::with_text("enabled", bit(alias.enabled)))
        .child(XmlNode::with_text("name", alias.name.as_str()))
        .child(XmlNode::with_text("type", alias.kind.as_str()));
    let tokens = alias_tokens(alias);
    if !tokens.is_empty() {
        node.children.push(XmlNode::with_text("content", tokens.join("\n")));
    }
    if let Some(descr) = &alias.description {
        node.children.push(XmlNode::with_text("description", descr.as_str()));
    }
    node
}

fn legacy_rule(rule: &Rule) -> XmlNode {
    let mut node = XmlNode::new("rule");
    if let Some(tracker) = &rule.tracker {
        node.children.push(XmlNode::with_text("tracker", tracker.as_str()));
    }
    node.children.push(XmlNode::with_text("type", rule.action.as_str()));
    node.children.push(XmlNode::with_text("interface", rule.interfaces.join(",")));
    if rule.scope == RuleScope::Floating {
        node.children.push(XmlNode::with_text("floating", "yes"));
        node.children.push(XmlNode::with_text("direction", rule.direction.as_str()));
        if rule.quick {
            node.children.push(XmlNode::with_text("quick", "yes"));
        }
    }
    node.children.push(XmlNode::with_text("ipprotocol", rule.family.as_str()));
    push_protocol(&mut node, &rule.protocol);
    if let Protocol::Icmp { types } = &rule.protocol {
        if !types.is_empty() {
            let tag = if rule.family == crate::model::AddressFamily::Inet6 {
                "icmp6-type"
            } else {
                "icmptype"
            };
            node.children.push(XmlNode::with_text(tag, types.join(",")));
        }
    }
    node.children.push(endpoint("source", &rule.source));
    node.children.push(endpoint("destination", &rule.destination));
    if rule.log {
        node.children.push(XmlNode::new("log"));
    }
    if rule.disabled {
        node.children.push(XmlNode::new("disabled"));
    }
    if let Some(descr) = &rule.description {
        node.children.push(XmlNode::with_text("descr", descr.as_str()));
    }
    if let Some(id) = &rule.association {
        node.children.push(XmlNode::with_text("associated-rule-id", id.as_str()));
    }
    push_constructs(&mut node, &rule.unsupported);
    node
}

fn automation_rule(rule: &Rule, position: usize) -> XmlNode {
    let mut node = XmlNode::new("rule");
    if let Some(uuid) = &rule.tracker {
        node.attributes.insert("uuid".to_string(), uuid.clone());
    }
    node.children.push(XmlNode::with_text("enabled", bit(!rule.disabled)));
    node.children.push(XmlNode::with_text("sequence", (position + 1).to_string()));
    node.children.push(XmlNode::with_text("action", rule.action.as_str()));
    node.children.push(XmlNode::with_text("quick", bit(rule.quick)));
    node.children.push(XmlNode::with_text("interface", rule.interfaces.join(",")));
    node.children.push(XmlNode::with_text("direction", rule.direction.as_str()));
    node.children.push(XmlNode::with_text("ipprotocol", rule.family.as_str()));
    push_protocol(&mut node, &rule.protocol);
    flat_endpoint(&mut node, "source", &rule.source);
    flat_endpoint(&mut node, "destination", &rule.destination);
    if rule.log {
        node.children.push(XmlNode::with_text("log", "1"));
    }
    if let Some(descr) = &rule.description {
        node.children.push(XmlNode::with_text("description", descr.as_str()));
    }
    push_constructs(&mut node, &rule.unsupported);
    node
}

fn flat_endpoint(node: &mut XmlNode, side: &str, endpoint: &Endpoint) {
    node.children.push(XmlNode::with_text(
        format!("{side}_net"),
        endpoint.address.to_string(),
    ));
    if endpoint.negate {
        node.children.push(XmlNode::with_text(format!("{side}_not"), "1"));
    }
    if let Some(port) = &endpoint.port {
        node.children.push(XmlNode::with_text(format!("{side}_port"), port.to_string()));
    }
}

/// Nested `<source>`/`<destination>` element.
fn endpoint(tag: &str, endpoint: &Endpoint) -> XmlNode {
    let mut node = XmlNode::new(tag);
    if endpoint.negate {
        node.children.push(XmlNode::new("not"));
    }
    node.children.push(address(&endpoint.address));
    if let Some(port) = &endpoint.port {
        node.children.push(XmlNode::with_text("port", port.to_string()));
    }
    node
}

fn address(spec: &AddressSpec) -> XmlNode {
    match spec {
        AddressSpec::Any => XmlNode::new("any"),
        AddressSpec::Network(_) | AddressSpec::Range { .. } | AddressSpec::Alias(_) => {
            XmlNode::with_text("address", spec.to_string())
        }
        AddressSpec::InterfaceNet(_)
        | AddressSpec::InterfaceAddress(_)
        | AddressSpec::Firewall => XmlNode::with_text("network", spec.to_string()),
    }
}

fn push_protocol(node: &mut XmlNode, protocol: &Protocol) {
    let value = match protocol {
        Protocol::Any => return,
        Protocol::Icmp { .. } => "icmp",
        Protocol::Other { name, .. } => name.as_str(),
        Protocol::Tcp => "tcp",
        Protocol::Udp => "udp",
        Protocol::TcpUdp => "tcp/udp",
    };
    node.children.push(XmlNode::with_text("protocol", value));
}

fn push_constructs(node: &mut XmlNode, constructs: &[Construct]) {
    for construct in constructs {
        node.children.push(match &construct.value {
            Some(value) => XmlNode::with_text(construct.name.as_str(), value.as_str()),
            None => XmlNode::new(construct.name.as_str()),
        });
    }
}

fn nat(model: &RuleModel) -> XmlNode {
    let mut section = XmlNode::new("nat");
    let mut outbound = XmlNode::new("outbound")
        .child(XmlNode::with_text("mode", model.outbound_mode.xml_value()));
    let mut one_to_one = Vec::new();
    for mapping in &model.nat {
        match &mapping.kind {
            NatKind::PortForward(pf) => section.children.push(port_forward(mapping, pf)),
            NatKind::Outbound(rule) => outbound.children.push(outbound_rule(mapping, rule)),
            NatKind::OneToOne(binat) => one_to_one.push(binat_mapping(mapping, binat)),
        }
    }
    section.children.push(outbound);
    section.children.extend(one_to_one);
    section
}

/// Elements every NAT entry carries after its own.
fn nat_common(node: &mut XmlNode, mapping: &NatMapping) {
    if mapping.disabled {
        node.children.push(XmlNode::new("disabled"));
    }
    if let Some(descr) = &mapping.description {
        node.children.push(XmlNode::with_text("descr", descr.as_str()));
    }
    push_constructs(node, &mapping.unsupported);
}

fn port_forward(mapping: &NatMapping, pf: &PortForward) -> XmlNode {
    let mut node = XmlNode::new("rule")
        .child(XmlNode::with_text("interface", pf.interface.as_str()))
        .child(XmlNode::with_text("ipprotocol", pf.family.as_str()));
    push_protocol(&mut node, &pf.protocol);
    node.children.push(endpoint("source", &pf.source));
    node.children.push(endpoint("destination", &pf.destination));
    if !(pf.no_redirect && pf.target.is_any()) {
        node.children.push(XmlNode::with_text("target", pf.target.to_string()));
    }
    if let Some(port) = &pf.local_port {
        node.children.push(XmlNode::with_text("local-port", port.to_string()));
    }
    if pf.no_redirect {
        node.children.push(XmlNode::new("nordr"));
    }
    match &pf.association {
        FilterAssociation::None => {}
        FilterAssociation::Pass => {
            node.children.push(XmlNode::with_text("associated-rule-id", "pass"));
        }
        FilterAssociation::Rule(id) => {
            node.children.push(XmlNode::with_text("associated-rule-id", id.as_str()));
        }
    }
    nat_common(&mut node, mapping);
    node
}

fn outbound_rule(mapping: &NatMapping, rule: &OutboundRule) -> XmlNode {
    let mut node = XmlNode::new("rule")
        .child(XmlNode::with_text("interface", rule.interface.as_str()))
        .child(XmlNode::with_text("ipprotocol", rule.family.as_str()));
    push_protocol(&mut node, &rule.protocol);
    for (tag, port_tag, side) in [
        ("source", "sourceport", &rule.source),
        ("destination", "dstport", &rule.destination),
    ] {
        let mut bare = side.clone();
        let port = bare.port.take();
        node.children.push(endpoint(tag, &bare));
        if let Some(port) = port {
            node.children.push(XmlNode::with_text(port_tag, port.to_string()));
        }
    }
    match &rule.translation {
        OutboundTranslation::InterfaceAddress => {}
        OutboundTranslation::Address(addr) => {
            node.children.push(XmlNode::with_text("target", addr.to_string()));
        }
        OutboundTranslation::Pool(pool) => {
            node.children.push(XmlNode::with_text("target", pool.as_str()));
        }
    }
    if rule.static_port {
        node.children.push(XmlNode::new("staticnatport"));
    }
    if rule.no_nat {
        node.children.push(XmlNode::new("nonat"));
    }
    nat_common(&mut node, mapping);
    node
}

fn binat_mapping(mapping: &NatMapping, binat: &OneToOne) -> XmlNode {
    let mut node = XmlNode::new("onetoone")
        .child(XmlNode::with_text("interface", binat.interface.as_str()))
        .child(XmlNode::with_text("external", binat.external.to_string()))
        .child(
            XmlNode::new("source")
                .child(XmlNode::with_text("address", binat.internal.to_string())),
        );
    node.children.push(endpoint("destination", &binat.destination));
    nat_common(&mut node, mapping);
    node
}

fn bit(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
