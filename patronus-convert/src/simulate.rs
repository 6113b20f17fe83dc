//! Packet simulation on both sides of a translation.
//!
//! A synthetic packet is decided twice: by walking the rule model with pf
//! first-match semantics, and by evaluating the translated ruleset. The
//! two decisions must agree for every packet; `simulate` reports both.
//!
//! Packets open new connections and are never NAT-translated, so rdr-pass
//! allowances and NAT chains play no part on either side.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::import::PSEUDO_INTERFACES;
use crate::location::SourceLocation;
use crate::model::{
    Action, AddressSpec, AliasEntry, Endpoint, PortRange, PortSpec, Protocol,
    Rule, RuleModel, RuleScope,
};
use crate::nft::eval::{evaluate, protocol_number, Decision, EvalError, NftPacket, Outcome};
use crate::nft::{Hook, Table};
use crate::settings::{InboundDefault, OutboundDefault, Settings};
use crate::translate::filter::icmp_type_name;
use crate::translate::skipped_rules;

const OUTSIDE_V4: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);
const OUTSIDE_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7);
const CLIENT_PORT: u16 = 40000;

#[derive(Debug, Error)]
pub enum SimulateError {
    #[error("hook {hook} needs {flag}")]
    MissingInterface { hook: &'static str, flag: &'static str },
    #[error("unknown interface '{0}'")]
    UnknownInterface(String),
    #[error("source {src} and destination {dst} differ in address family")]
    FamilyMismatch { src: IpAddr, dst: IpAddr },
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// A packet described in rule model terms: logical interfaces and pf
/// ICMP type names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    pub hook: Hook,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_iface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_iface: Option<String>,
    pub protocol: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<String>,
    /// Addressed to the firewall itself even when `dst` is not one of its
    /// static addresses.
    pub to_self: bool,
}

/// How the rule model decides a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelVerdict {
    pub decision: Decision,
    /// Deciding rule label, or the default policy that applied.
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Simulation {
    pub packet: Packet,
    pub model: ModelVerdict,
    pub ruleset: Outcome,
}

impl Simulation {
    pub fn agrees(&self) -> bool {
        self.model.decision == self.ruleset.decision
    }
}

/// IP protocol number of a `--proto` value: a pf name or a number.
pub fn parse_protocol(raw: &str, v6: bool) -> Result<u8, SimulateError> {
    let lower = raw.trim().to_ascii_lowercase();
    let number = match lower.as_str() {
        "icmp" if v6 => Some(58),
        "icmp6" | "icmpv6" | "ipv6-icmp" => Some(58),
        "tcp/udp" => None,
        other => protocol_number(other).or_else(|| match Protocol::parse(other) {
            Some(Protocol::Other { number, .. }) => Some(number),
            _ => None,
        }),
    };
    number.ok_or_else(|| SimulateError::UnknownProtocol(raw.to_string()))
}

/// Decide `packet` on the rule model and on `table`.
pub fn simulate(
    model: &RuleModel,
    settings: &Settings,
    table: &Table,
    packet: &Packet,
) -> Result<Simulation, SimulateError> {
    let nft_packet = to_nft_packet(model, settings, packet)?;
    let verdict = decide(model, settings, packet)?;
    let outcome = evaluate(table, &nft_packet)?;
    debug!(
        model = verdict.decision.as_str(),
        ruleset = outcome.decision.as_str(),
        "simulated packet"
    );
    Ok(Simulation {
        packet: packet.clone(),
        model: verdict,
        ruleset: outcome,
    })
}

fn known_interface(model: &RuleModel, settings: &Settings, name: &str) -> bool {
    model.interface(name).is_some() || settings.pseudo_interfaces.contains_key(&name.to_ascii_lowercase())
}

fn device_of(model: &RuleModel, settings: &Settings, name: &str) -> Result<String, SimulateError> {
    if let Some(iface) = model.interface(name) {
        return Ok(settings.device_name(&iface.device).to_string());
    }
    settings
        .pseudo_interfaces
        .get(&name.to_ascii_lowercase())
        .map(|pattern| pattern.replace('*', "0"))
        .ok_or_else(|| SimulateError::UnknownInterface(name.to_string()))
}

fn check(model: &RuleModel, settings: &Settings, packet: &Packet) -> Result<(), SimulateError> {
    if packet.src.is_ipv4() != packet.dst.is_ipv4() {
        return Err(SimulateError::FamilyMismatch {
            src: packet.src,
            dst: packet.dst,
        });
    }
    let needs_in = matches!(packet.hook, Hook::Input | Hook::Forward);
    let needs_out = matches!(packet.hook, Hook::Output | Hook::Forward);
    let hook = packet.hook.as_str();
    if needs_in && packet.in_iface.is_none() {
        return Err(SimulateError::MissingInterface { hook, flag: "--in-iface" });
    }
    if needs_out && packet.out_iface.is_none() {
        return Err(SimulateError::MissingInterface { hook, flag: "--out-iface" });
    }
    for name in packet.in_iface.iter().chain(&packet.out_iface) {
        if !known_interface(model, settings, name) {
            return Err(SimulateError::UnknownInterface(name.clone()));
        }
    }
    Ok(())
}

fn is_firewall_address(model: &RuleModel, addr: IpAddr) -> bool {
    model
        .interfaces
        .iter()
        .any(|iface| iface.addresses().contains(&addr))
}

/// The packet as the kernel sees it: devices instead of logical names,
/// nft ICMP type names.
pub fn to_nft_packet(
    model: &RuleModel,
    settings: &Settings,
    packet: &Packet,
) -> Result<NftPacket, SimulateError> {
    check(model, settings, packet)?;
    let iif = match (&packet.in_iface, packet.hook) {
        (Some(name), Hook::Input | Hook::Forward) => Some(device_of(model, settings, name)?),
        _ => None,
    };
    let oif = match (&packet.out_iface, packet.hook) {
        (Some(name), Hook::Output | Hook::Forward) => Some(device_of(model, settings, name)?),
        _ => None,
    };
    let v6 = packet.src.is_ipv6();
    Ok(NftPacket {
        hook: packet.hook,
        iif,
        oif,
        l4proto: packet.protocol,
        src: packet.src,
        dst: packet.dst,
        sport: packet.sport,
        dport: packet.dport,
        icmp_type: packet
            .icmp_type
            .as_deref()
            .and_then(|kind| icmp_type_name(kind, v6))
            .map(str::to_string),
        dst_local: packet.to_self || is_firewall_address(model, packet.dst),
    })
}

/// pf first-match decision of the rule model.
pub fn decide(
    model: &RuleModel,
    settings: &Settings,
    packet: &Packet,
) -> Result<ModelVerdict, SimulateError> {
    check(model, settings, packet)?;
    let skipped = skipped_rules(model, settings);
    let walker = Walker {
        model,
        settings,
        packet,
        skipped: &skipped,
    };
    let inbound = match (&packet.in_iface, packet.hook) {
        (Some(iface), Hook::Input | Hook::Forward) => Some(walker.inbound(iface)),
        _ => None,
    };
    if let Some(verdict) = &inbound {
        if verdict.decision != Decision::Accept || packet.hook == Hook::Input {
            return Ok(verdict.clone());
        }
    }
    let outbound = match &packet.out_iface {
        Some(iface) if packet.hook != Hook::Input => walker.outbound(iface),
        _ => None,
    };
    if let Some(verdict) = outbound {
        return Ok(verdict);
    }
    // Without an outbound rule, traffic passed inbound keeps the rule that
    // passed it.
    let fallback = walker.default_outbound();
    match inbound {
        Some(verdict) if fallback.decision == Decision::Accept => Ok(verdict),
        _ => Ok(fallback),
    }
}

struct Walker<'a> {
    model: &'a RuleModel,
    settings: &'a Settings,
    packet: &'a Packet,
    skipped: &'a BTreeSet<usize>,
}

impl Walker<'_> {
    fn inbound(&self, iface: &str) -> ModelVerdict {
        let floating = self.model.active_rules().filter(|rule| {
            rule.is_floating() && rule.direction.covers_in() && self.names_interface(rule, iface)
        });
        if let Some(verdict) = self.first_match(floating) {
            return verdict;
        }
        let mut targets: Vec<String> = self
            .model
            .groups_of(iface)
            .map(|group| group.name.clone())
            .collect();
        targets.push(iface.to_string());
        for target in &targets {
            let rules = self.model.active_rules().filter(|rule| {
                rule.scope == RuleScope::Interface
                    && rule.interfaces.iter().any(|name| name.eq_ignore_ascii_case(target))
            });
            if let Some(verdict) = self.first_match(rules) {
                return verdict;
            }
        }
        ModelVerdict {
            decision: match self.settings.default_inbound {
                InboundDefault::Drop => Decision::Drop,
                InboundDefault::Reject => Decision::Reject,
            },
            rule: "default inbound policy".to_string(),
            location: None,
        }
    }

    fn outbound(&self, iface: &str) -> Option<ModelVerdict> {
        let floating = self.model.active_rules().filter(|rule| {
            rule.is_floating() && rule.direction.covers_out() && self.names_interface(rule, iface)
        });
        self.first_match(floating)
    }

    fn default_outbound(&self) -> ModelVerdict {
        ModelVerdict {
            decision: match self.settings.default_outbound {
                OutboundDefault::Pass => Decision::Accept,
                OutboundDefault::Drop => Decision::Drop,
            },
            rule: "default outbound policy".to_string(),
            location: None,
        }
    }

    fn first_match<'r>(&self, rules: impl Iterator<Item = &'r Rule>) -> Option<ModelVerdict> {
        let rule = rules
            .filter(|rule| !self.skipped.contains(&rule.index))
            .find(|rule| self.rule_matches(rule))?;
        Some(ModelVerdict {
            decision: match rule.action {
                Action::Pass => Decision::Accept,
                Action::Block => Decision::Drop,
                Action::Reject => Decision::Reject,
            },
            rule: rule.label(),
            location: Some(rule.origin.clone()),
        })
    }

    fn names_interface(&self, rule: &Rule, iface: &str) -> bool {
        rule.interfaces.iter().any(|name| {
            name.eq_ignore_ascii_case(iface)
                || self.model.group(name).is_some_and(|group| {
                    group.members.iter().any(|member| member.eq_ignore_ascii_case(iface))
                })
        })
    }

    fn rule_matches(&self, rule: &Rule) -> bool {
        let packet = self.packet;
        let v6 = packet.src.is_ipv6();
        let family = if v6 {
            rule.family.includes_v6()
        } else {
            rule.family.includes_v4()
        };
        family
            && self.protocol_matches(&rule.protocol, v6)
            && self.endpoint_matches(&rule.source, packet.src, packet.sport, false, &rule.protocol)
            && self.endpoint_matches(
                &rule.destination,
                packet.dst,
                packet.dport,
                true,
                &rule.protocol,
            )
    }

    fn protocol_matches(&self, protocol: &Protocol, v6: bool) -> bool {
        let number = self.packet.protocol;
        match protocol {
            Protocol::Any => true,
            Protocol::Tcp => number == 6,
            Protocol::Udp => number == 17,
            Protocol::TcpUdp => number == 6 || number == 17,
            Protocol::Icmp { types } => {
                let expected = if v6 { 58 } else { 1 };
                if number != expected {
                    return false;
                }
                if types.is_empty() {
                    return true;
                }
                let Some(kind) = &self.packet.icmp_type else {
                    return false;
                };
                types.iter().any(|name| {
                    name.eq_ignore_ascii_case(kind) && icmp_type_name(name, v6).is_some()
                })
            }
            Protocol::Other { number: wanted, .. } => number == *wanted,
        }
    }

    fn endpoint_matches(
        &self,
        endpoint: &Endpoint,
        addr: IpAddr,
        port: Option<u16>,
        destination: bool,
        protocol: &Protocol,
    ) -> bool {
        let inside = self.address_contains(&endpoint.address, addr, destination);
        if inside == endpoint.negate {
            return false;
        }
        match (&endpoint.port, protocol.has_ports()) {
            (Some(spec), true) => port.is_some_and(|port| self.port_contains(spec, port)),
            _ => true,
        }
    }

    fn address_contains(&self, spec: &AddressSpec, addr: IpAddr, destination: bool) -> bool {
        let model = self.model;
        match spec {
            AddressSpec::Any => true,
            AddressSpec::Network(net) => net.contains(addr),
            AddressSpec::Range { start, end } => in_range(*start, *end, addr),
            AddressSpec::Alias(name) => {
                let mut seen = BTreeSet::new();
                self.alias_contains(name, &mut seen, &|entry| match entry {
                    AliasEntry::Network(net) => net.contains(addr),
                    AliasEntry::Range { start, end } => in_range(*start, *end, addr),
                    _ => false,
                })
            }
            AddressSpec::InterfaceNet(name) => {
                let members = match model.group(name) {
                    Some(group) => group.members.clone(),
                    None => vec![name.clone()],
                };
                members
                    .iter()
                    .filter_map(|member| model.interface(member))
                    .flat_map(|iface| iface.networks())
                    .any(|net| net.contains(addr))
            }
            AddressSpec::InterfaceAddress(name) => {
                let Some(iface) = model.interface(name) else {
                    return false;
                };
                if destination
                    && iface.has_dynamic_address()
                    && self.settings.approximate_dynamic_addresses
                {
                    return self.packet.to_self || is_firewall_address(model, addr);
                }
                iface.addresses().contains(&addr)
            }
            AddressSpec::Firewall if destination => {
                self.packet.to_self || is_firewall_address(model, addr)
            }
            AddressSpec::Firewall => is_firewall_address(model, addr),
        }
    }

    fn port_contains(&self, spec: &PortSpec, port: u16) -> bool {
        match spec {
            PortSpec::Range(range) => range.contains(port),
            PortSpec::Alias(name) => {
                let mut seen = BTreeSet::new();
                self.alias_contains(name, &mut seen, &|entry| match entry {
                    AliasEntry::Port(range) => range.contains(port),
                    _ => false,
                })
            }
        }
    }

    /// Whether any entry of an enabled alias, nested aliases included,
    /// satisfies `hit`.
    fn alias_contains(
        &self,
        name: &str,
        seen: &mut BTreeSet<String>,
        hit: &dyn Fn(&AliasEntry) -> bool,
    ) -> bool {
        let Some(alias) = self.model.alias(name) else {
            return false;
        };
        if !alias.enabled || !seen.insert(alias.name.to_ascii_lowercase()) {
            return false;
        }
        alias.entries.iter().any(|entry| match entry {
            AliasEntry::Alias(nested) => self.alias_contains(nested, seen, hit),
            other => hit(other),
        })
    }
}

fn in_range(start: IpAddr, end: IpAddr, addr: IpAddr) -> bool {
    start.is_ipv4() == addr.is_ipv4() && start <= addr && addr <= end
}

/// Logical interfaces a packet can arrive on or leave through.
fn packet_interfaces(model: &RuleModel, settings: &Settings) -> Vec<String> {
    let mut names: Vec<String> = model.interfaces.iter().map(|iface| iface.name.clone()).collect();
    for pseudo in PSEUDO_INTERFACES {
        if model.interface(pseudo).is_none() && settings.pseudo_interfaces.contains_key(*pseudo) {
            names.push((*pseudo).to_string());
        }
    }
    names
}

fn offset(net: ipnetwork::IpNetwork, by: u32) -> IpAddr {
    match net.network() {
        IpAddr::V4(v4) if net.prefix() <= 29 => IpAddr::V4(Ipv4Addr::from(u32::from(v4) + by)),
        IpAddr::V6(v6) if net.prefix() <= 120 => {
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) + u128::from(by)))
        }
        other => other,
    }
}

fn endpoint_points(endpoint: &Endpoint, addrs: &mut BTreeSet<IpAddr>, ports: &mut BTreeSet<u16>) {
    match &endpoint.address {
        AddressSpec::Network(net) => {
            addrs.insert(net.ip());
            addrs.insert(offset(*net, 3));
        }
        AddressSpec::Range { start, end } => {
            addrs.insert(*start);
            addrs.insert(*end);
        }
        _ => {}
    }
    if let Some(PortSpec::Range(range)) = &endpoint.port {
        port_points(*range, ports);
    }
}

fn port_points(range: PortRange, ports: &mut BTreeSet<u16>) {
    ports.insert(range.start);
    ports.insert(range.end);
    if range.end < u16::MAX {
        ports.insert(range.end + 1);
    }
}

/// Packets covering every address, port and interface the model
/// mentions, plus an outside host, on all three filter hooks.
pub fn packet_grid(model: &RuleModel, settings: &Settings) -> Vec<Packet> {
    let mut addrs: BTreeSet<IpAddr> = BTreeSet::from([IpAddr::V4(OUTSIDE_V4), IpAddr::V6(OUTSIDE_V6)]);
    let mut ports: BTreeSet<u16> = BTreeSet::from([1, 65000]);
    for iface in &model.interfaces {
        addrs.extend(iface.addresses());
        for net in iface.networks() {
            addrs.insert(offset(net, 5));
        }
    }
    for alias in &model.aliases {
        for entry in &alias.entries {
            match entry {
                AliasEntry::Network(net) => {
                    addrs.insert(net.ip());
                }
                AliasEntry::Range { start, end } => {
                    addrs.insert(*start);
                    addrs.insert(*end);
                }
                AliasEntry::Port(range) => port_points(*range, &mut ports),
                _ => {}
            }
        }
    }
    for rule in &model.rules {
        endpoint_points(&rule.source, &mut addrs, &mut ports);
        endpoint_points(&rule.destination, &mut addrs, &mut ports);
    }

    let mut shapes: Vec<(u8, Option<u16>, Option<&str>)> = Vec::new();
    for port in &ports {
        shapes.push((6, Some(*port), None));
        shapes.push((17, Some(*port), None));
    }
    shapes.push((1, None, Some("echoreq")));
    shapes.push((47, None, None));

    let ifaces = packet_interfaces(model, settings);
    let mut legs: Vec<(Hook, Option<&String>, Option<&String>)> = Vec::new();
    for iface in &ifaces {
        legs.push((Hook::Input, Some(iface), None));
        legs.push((Hook::Output, None, Some(iface)));
        for out in &ifaces {
            if out != iface {
                legs.push((Hook::Forward, Some(iface), Some(out)));
            }
        }
    }

    let mut grid = Vec::new();
    for (hook, in_iface, out_iface) in &legs {
        for src in &addrs {
            for dst in addrs.iter().filter(|dst| dst.is_ipv4() == src.is_ipv4()) {
                for (protocol, dport, icmp_type) in &shapes {
                    let protocol = match (*protocol, src.is_ipv6()) {
                        (1, true) => 58,
                        (number, _) => number,
                    };
                    grid.push(Packet {
                        hook: *hook,
                        in_iface: in_iface.cloned(),
                        out_iface: out_iface.cloned(),
                        protocol,
                        src: *src,
                        dst: *dst,
                        sport: dport.map(|_| CLIENT_PORT),
                        dport: *dport,
                        icmp_type: icmp_type.map(str::to_string),
                        to_self: false,
                    });
                }
            }
        }
    }
    debug!(packets = grid.len(), "built packet grid");
    grid
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::{decide, packet_grid, parse_protocol, simulate, Packet, SimulateError};
    use crate::import::import_bytes;
    use crate::nft::eval::Decision;
    use crate::nft::Hook;
    use crate::settings::Settings;
    use crate::translate::{translate, TranslateOptions};

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <wan><if>em0</if><ipaddr>203.0.113.2</ipaddr><subnet>24</subnet><gateway>WANGW</gateway></wan>
    <lan><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <filter>
    <rule><type>pass</type><interface>wan</interface><protocol>tcp</protocol>
      <source><any/></source><destination><network>lan</network><port>22</port></destination>
      <descr>Allow SSH</descr></rule>
    <rule><type>block</type><interface>wan</interface>
      <source><any/></source><destination><network>lan</network></destination></rule>
    <rule><type>pass</type><interface>lan</interface>
      <source><network>lan</network></source><destination><any/></destination></rule>
  </filter>
</pfsense>"#;

    fn addr(raw: &str) -> IpAddr {
        raw.parse().expect("address")
    }

    fn forward(dport: Option<u16>, protocol: u8) -> Packet {
        Packet {
            hook: Hook::Forward,
            in_iface: Some("wan".to_string()),
            out_iface: Some("lan".to_string()),
            protocol,
            src: addr("198.51.100.7"),
            dst: addr("192.168.1.20"),
            sport: dport.map(|_| 40000),
            dport,
            icmp_type: None,
            to_self: false,
        }
    }

    #[test]
    fn ssh_passes_and_other_wan_to_lan_traffic_drops() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let table = &unit.ruleset.table;

        let ssh = simulate(&imported.model, &settings, table, &forward(Some(22), 6)).expect("ssh");
        assert!(ssh.agrees());
        assert_eq!(ssh.model.decision, Decision::Accept);
        assert_eq!(ssh.model.rule, "filter[0] \"Allow SSH\"");
        assert_eq!(ssh.ruleset.chain, "in_wan");
        assert_eq!(ssh.ruleset.rule, Some(0));
        assert_eq!(ssh.ruleset.origins[0].label, "filter[0] \"Allow SSH\"");

        let http = simulate(&imported.model, &settings, table, &forward(Some(80), 6)).expect("http");
        assert!(http.agrees());
        assert_eq!(http.ruleset.decision, Decision::Drop);
        assert_eq!(http.model.rule, "filter[1]");
        assert_eq!(http.ruleset.chain, "in_wan");

        let gre = simulate(&imported.model, &settings, table, &forward(None, 47)).expect("gre");
        assert_eq!(gre.ruleset.decision, Decision::Drop);
    }

    #[test]
    fn every_grid_packet_agrees() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let grid = packet_grid(&imported.model, &settings);
        assert!(grid.len() > 100);
        for packet in &grid {
            let sim = simulate(&imported.model, &settings, &unit.ruleset.table, packet)
                .expect("simulate");
            assert!(sim.agrees(), "{packet:?}: {:?} vs {:?}", sim.model, sim.ruleset);
        }
    }

    #[test]
    fn packets_must_name_their_interfaces() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let mut packet = forward(Some(22), 6);
        packet.out_iface = None;
        assert!(matches!(
            decide(&imported.model, &settings, &packet),
            Err(SimulateError::MissingInterface { flag: "--out-iface", .. })
        ));
        packet.out_iface = Some("dmz".to_string());
        assert!(matches!(
            decide(&imported.model, &settings, &packet),
            Err(SimulateError::UnknownInterface(name)) if name == "dmz"
        ));
    }

    #[test]
    fn protocols_by_name_or_number() {
        assert_eq!(parse_protocol("tcp", false).expect("tcp"), 6);
        assert_eq!(parse_protocol("icmp", true).expect("icmp6"), 58);
        assert_eq!(parse_protocol("gre", false).expect("gre"), 47);
        assert_eq!(parse_protocol("132", false).expect("sctp"), 132);
        assert!(parse_protocol("bogus", false).is_err());
    }
}
