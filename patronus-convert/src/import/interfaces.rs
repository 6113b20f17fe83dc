use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use patronus_xml::XmlNode;

use super::{flag, split_list, Context, Schema};
use crate::location::SourceLocation;
use crate::model::{AddressMode, Interface, InterfaceGroup};

const INTERFACE_SCHEMA: Schema = Schema {
    consumed: &[
        "enable", "if", "descr", "ipaddr", "subnet", "ipaddrv6", "subnetv6", "gateway",
        "gatewayv6",
    ],
    metadata: &[
        "spoofmac",
        "mtu",
        "mss",
        "media",
        "mediaopt",
        "lock",
        "virtual",
        "type",
        "internal_dynamic",
        "hw_settings_overwrite",
        "dhcphostname",
        "dhcprejectfrom",
        "alias-address",
        "alias-subnet",
        "track6-interface",
        "track6-prefix-id",
        "track6-prefix-id--hex",
        "prefix-6rd",
        "prefix-6rd-v4plen",
        "gateway-6rd",
        "linklocal",
        "blockpriv6",
        "dhcp6-duid",
        "dhcp6-ia-pd-len",
        "dhcp6-ia-pd-send-hint",
        "dhcp6prefixonly",
        "dhcp6usev4iface",
        "dhcp6vlanprio",
        "dhcpvlanprio",
        "dhcp6norelease",
        "ipv6usev4iface",
        "slaacusev4iface",
        "wireless",
    ],
    unsupported_values: &[],
    unsupported_flags: &["blockpriv", "blockbogons"],
};

/// Prefixes of client-side DHCP tuning elements.
const METADATA_PREFIXES: &[&str] = &["adv_dhcp", "dhcp6c", "dhcpd"];

const GROUP_SCHEMA: Schema = Schema {
    consumed: &["ifname", "members", "descr"],
    metadata: &["sequence", "nogroup"],
    unsupported_values: &[],
    unsupported_flags: &[],
};

/// Dynamic IPv4 assignment methods.
const DYNAMIC_V4: &[&str] = &["dhcp", "pppoe", "pptp", "l2tp", "ppp"];
/// Dynamic IPv6 assignment methods.
const DYNAMIC_V6: &[&str] = &["dhcp6", "slaac", "track6", "6rd", "6to4", "pppoe"];

pub(super) fn import_interfaces(
    root: &XmlNode,
    root_loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<Interface> {
    let Some(section) = root.get_child("interfaces") else {
        return Vec::new();
    };
    let section_loc = root_loc.join("interfaces", section.line);
    let vlans = vlan_tags(root);
    let mut out: Vec<Interface> = Vec::new();

    for node in &section.children {
        let loc = section_loc.join(&node.tag, node.line);
        let name = node.tag.to_ascii_lowercase();
        if out.iter().any(|iface| iface.name == name) {
            cx.error(loc, format!("duplicate interface '{name}'"));
            continue;
        }
        let Some(device) = node.child_text("if") else {
            cx.error(loc, format!("interface '{name}' has no <if> device"));
            continue;
        };

        let ipv4 = address_mode(node, "ipaddr", "subnet", DYNAMIC_V4, &loc, cx);
        let ipv6 = address_mode(node, "ipaddrv6", "subnetv6", DYNAMIC_V6, &loc, cx);
        let unsupported = scan_interface(node, &loc, cx);

        out.push(Interface {
            vlan: vlans.get(device).copied(),
            name,
            device: device.to_string(),
            description: node.child_text("descr").map(str::to_string),
            enabled: flag(node, "enable"),
            ipv4,
            ipv6,
            gateway: node
                .child_text("gateway")
                .or_else(|| node.child_text("gatewayv6"))
                .map(str::to_string),
            unsupported,
            origin: loc,
        });
    }
    out
}

fn scan_interface(
    node: &XmlNode,
    loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<crate::model::Construct> {
    // Strip the prefixed DHCP client options before the schema scan; there
    // are too many to list one by one.
    let mut trimmed = node.clone();
    trimmed.children.retain(|child| {
        !METADATA_PREFIXES
            .iter()
            .any(|prefix| child.tag.starts_with(prefix))
    });
    cx.scan(&trimmed, loc, "interface", &INTERFACE_SCHEMA)
}

fn address_mode(
    node: &XmlNode,
    addr_tag: &str,
    prefix_tag: &str,
    dynamic: &[&str],
    loc: &SourceLocation,
    cx: &mut Context,
) -> AddressMode {
    let Some(raw) = node.child_text(addr_tag) else {
        return AddressMode::None;
    };
    let lower = raw.to_ascii_lowercase();
    if dynamic.contains(&lower.as_str()) {
        return AddressMode::Dynamic(lower);
    }
    let child_loc = || {
        let line = node.get_child(addr_tag).map_or(node.line, |child| child.line);
        loc.join(addr_tag, line)
    };
    let Ok(addr) = raw.parse::<IpAddr>() else {
        cx.error(child_loc(), format!("invalid interface address '{raw}'"));
        return AddressMode::None;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    let prefix = match node.child_text(prefix_tag) {
        Some(value) => match value.parse::<u8>() {
            Ok(prefix) if prefix <= max => prefix,
            _ => {
                cx.error(child_loc(), format!("invalid prefix length '{value}'"));
                return AddressMode::None;
            }
        },
        None => max,
    };
    match IpNetwork::new(addr, prefix) {
        Ok(net) => AddressMode::Static(net),
        Err(err) => {
            cx.error(child_loc(), format!("invalid interface network: {err}"));
            AddressMode::None
        }
    }
}

/// VLAN device name to 802.1Q tag.
fn vlan_tags(root: &XmlNode) -> BTreeMap<String, u16> {
    let Some(vlans) = root.get_child("vlans") else {
        return BTreeMap::new();
    };
    vlans
        .children_named("vlan")
        .filter_map(|vlan| {
            let device = vlan.child_text("vlanif")?;
            let tag = vlan.child_text("tag")?.parse().ok()?;
            Some((device.to_string(), tag))
        })
        .collect()
}

pub(super) fn import_groups(
    root: &XmlNode,
    root_loc: &SourceLocation,
    cx: &mut Context,
) -> Vec<InterfaceGroup> {
    let Some(section) = root.get_child("ifgroups") else {
        return Vec::new();
    };
    let section_loc = root_loc.join("ifgroups", section.line);
    let mut out: Vec<InterfaceGroup> = Vec::new();

    for (idx, node) in section.children_named("ifgroupentry").enumerate() {
        let loc = section_loc.indexed("ifgroupentry", idx, node.line);
        let Some(name) = node.child_text("ifname") else {
            cx.error(loc, "interface group has no <ifname>");
            continue;
        };
        if out.iter().any(|group| group.name.eq_ignore_ascii_case(name)) {
            cx.error(loc, format!("duplicate interface group '{name}'"));
            continue;
        }
        cx.scan(node, &loc, "interface group", &GROUP_SCHEMA);
        let members = node
            .child_text("members")
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(|member| member.to_ascii_lowercase())
            .collect();
        out.push(InterfaceGroup {
            name: name.to_string(),
            members,
            description: node.child_text("descr").map(str::to_string),
            origin: loc,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{import_groups, import_interfaces};
    use crate::import::Context;
    use crate::location::SourceLocation;
    use crate::model::AddressMode;
    use patronus_xml::parse;

    fn root_loc() -> SourceLocation {
        SourceLocation::new("pfsense", 1)
    }

    #[test]
    fn reads_static_dynamic_and_vlan_interfaces() {
        let root = parse(
            br#"<pfsense>
  <interfaces>
    <WAN><enable/><if>em0</if><ipaddr>dhcp</ipaddr><ipaddrv6>dhcp6</ipaddrv6><blockpriv/></WAN>
    <opt2><if>em1.30</if><ipaddr>10.30.0.1</ipaddr><subnet>24</subnet><adv_dhcp_pt_timeout/></opt2>
  </interfaces>
  <vlans><vlan><if>em1</if><tag>30</tag><vlanif>em1.30</vlanif></vlan></vlans>
</pfsense>"#,
        )
        .expect("parse");
        let mut cx = Context::default();
        let ifaces = import_interfaces(&root, &root_loc(), &mut cx);

        assert!(cx.errors.is_empty());
        assert!(cx.warnings.is_empty());
        assert_eq!(ifaces[0].name, "wan");
        assert_eq!(ifaces[0].ipv4, AddressMode::Dynamic("dhcp".to_string()));
        assert!(ifaces[0].is_gateway_interface());
        assert_eq!(ifaces[0].unsupported[0].name, "blockpriv");
        assert!(!ifaces[1].enabled);
        assert_eq!(ifaces[1].vlan, Some(30));
        assert_eq!(ifaces[1].networks()[0].to_string(), "10.30.0.0/24");
    }

    #[test]
    fn bad_addresses_are_reported_per_interface() {
        let root = parse(
            br#"<pfsense>
  <interfaces>
    <lan><if>em1</if><ipaddr>192.168.1.300</ipaddr></lan>
    <opt1><if>em2</if><ipaddr>10.0.0.1</ipaddr><subnet>40</subnet></opt1>
    <opt2><ipaddr>10.0.0.1</ipaddr></opt2>
  </interfaces>
</pfsense>"#,
        )
        .expect("parse");
        let mut cx = Context::default();
        import_interfaces(&root, &root_loc(), &mut cx);

        let paths: Vec<_> = cx.errors.iter().map(|e| e.location.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "pfsense.interfaces.lan.ipaddr",
                "pfsense.interfaces.opt1.ipaddr",
                "pfsense.interfaces.opt2"
            ]
        );
    }

    #[test]
    fn groups_keep_member_order() {
        let root = parse(
            br#"<pfsense>
  <ifgroups>
    <ifgroupentry><ifname>INSIDE</ifname><members>LAN opt1</members><descr>inside</descr></ifgroupentry>
  </ifgroups>
</pfsense>"#,
        )
        .expect("parse");
        let mut cx = Context::default();
        let groups = import_groups(&root, &root_loc(), &mut cx);
        assert_eq!(groups[0].name, "INSIDE");
        assert_eq!(groups[0].members, vec!["lan", "opt1"]);
    }
}
