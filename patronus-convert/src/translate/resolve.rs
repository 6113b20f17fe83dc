//! Name resolution: aliases to named sets, interfaces to devices and
//! networks.

use std::collections::{BTreeMap, BTreeSet};

use ipnetwork::IpNetwork;

use crate::model::interface::canonical;
use crate::model::{AddressSpec, Alias, AliasEntry, PortRange, PortSpec, RuleModel};
use crate::nft::{MatchValue, Set, SetType, Value};
use crate::settings::Settings;

/// Flattened static content of an alias, nested aliases included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Flat {
    pub v4: Vec<Value>,
    pub v6: Vec<Value>,
    pub ports: Vec<Value>,
}

/// Which side of a rule an address sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Source,
    Destination,
}

/// A resolved address spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Addr {
    Any,
    /// Per-family match values; `None` means nothing of that family.
    Values {
        v4: Option<MatchValue>,
        v6: Option<MatchValue>,
    },
    /// Any address of this host (`fib daddr type local`).
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Ports {
    Any,
    Values(MatchValue),
    /// A port alias without entries.
    Never,
}

pub(crate) struct Resolver<'a> {
    pub model: &'a RuleModel,
    pub settings: &'a Settings,
    flat: BTreeMap<String, Flat>,
}

impl<'a> Resolver<'a> {
    pub fn new(model: &'a RuleModel, settings: &'a Settings) -> Self {
        let flat = model
            .aliases
            .iter()
            .map(|alias| {
                let mut out = Flat::default();
                collect(model, alias, &mut out, &mut BTreeSet::new());
                (alias.name.to_ascii_lowercase(), out)
            })
            .collect();
        Self {
            model,
            settings,
            flat,
        }
    }

    pub fn flat(&self, alias: &str) -> Flat {
        self.flat
            .get(&alias.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Named sets for every alias with content, in alias order.
    pub fn sets(&self) -> Vec<Set> {
        let mut out = Vec::new();
        for alias in &self.model.aliases {
            let flat = self.flat(&alias.name);
            let name = alias.name.to_ascii_lowercase();
            for (suffix, kind, elements) in [
                ("v4", SetType::Ipv4Addr, flat.v4),
                ("v6", SetType::Ipv6Addr, flat.v6),
                ("ports", SetType::InetService, flat.ports),
            ] {
                if !elements.is_empty() {
                    out.push(Set {
                        name: set_name(&name, suffix),
                        kind,
                        elements,
                    });
                }
            }
        }
        out
    }

    /// Device names (or patterns) behind an interface, group or pseudo
    /// interface. `None` for a pseudo interface without a configured device.
    pub fn devices(&self, name: &str) -> Option<Vec<Value>> {
        if let Some(iface) = self.model.interface(name) {
            return Some(vec![Value::Name(
                self.settings.device_name(&iface.device).to_string(),
            )]);
        }
        if let Some(group) = self.model.group(name) {
            let mut out = Vec::new();
            for member in &group.members {
                for device in self.devices(member).unwrap_or_default() {
                    if !out.contains(&device) {
                        out.push(device);
                    }
                }
            }
            return Some(out);
        }
        self.settings
            .pseudo_interfaces
            .get(&name.to_ascii_lowercase())
            .map(|pattern| vec![Value::Name(pattern.clone())])
    }

    /// Interfaces a name stands for: the interface itself or the members
    /// of a group.
    pub fn members(&self, name: &str) -> Vec<String> {
        match self.model.group(name) {
            Some(group) => group.members.clone(),
            None => vec![name.to_ascii_lowercase()],
        }
    }

    pub fn address(&self, spec: &AddressSpec, side: Side) -> Addr {
        match spec {
            AddressSpec::Any => Addr::Any,
            AddressSpec::Network(net) => {
                by_family(vec![Value::Net(canonical(*net).unwrap_or(*net))])
            }
            AddressSpec::Range { start, end } => by_family(vec![Value::AddrRange(*start, *end)]),
            AddressSpec::Alias(name) => {
                let flat = self.flat(name);
                let lower = name.to_ascii_lowercase();
                Addr::Values {
                    v4: (!flat.v4.is_empty()).then(|| MatchValue::Named(set_name(&lower, "v4"))),
                    v6: (!flat.v6.is_empty()).then(|| MatchValue::Named(set_name(&lower, "v6"))),
                }
            }
            AddressSpec::InterfaceNet(name) => {
                let nets = self
                    .members(name)
                    .iter()
                    .filter_map(|member| self.model.interface(member))
                    .flat_map(|iface| iface.networks())
                    .map(Value::Net)
                    .collect();
                by_family(nets)
            }
            AddressSpec::InterfaceAddress(name) => {
                let Some(iface) = self.model.interface(name) else {
                    return by_family(Vec::new());
                };
                if side == Side::Destination
                    && iface.has_dynamic_address()
                    && self.settings.approximate_dynamic_addresses
                {
                    return Addr::Local;
                }
                by_family(iface.addresses().into_iter().map(host).collect())
            }
            AddressSpec::Firewall => match side {
                Side::Destination => Addr::Local,
                Side::Source => by_family(
                    self.model
                        .interfaces
                        .iter()
                        .flat_map(|iface| iface.addresses())
                        .map(host)
                        .collect(),
                ),
            },
        }
    }

    pub fn ports(&self, spec: Option<&PortSpec>) -> Ports {
        match spec {
            None => Ports::Any,
            Some(PortSpec::Range(range)) => Ports::Values(MatchValue::One(port_value(*range))),
            Some(PortSpec::Alias(name)) => {
                if self.flat(name).ports.is_empty() {
                    Ports::Never
                } else {
                    Ports::Values(MatchValue::Named(set_name(
                        &name.to_ascii_lowercase(),
                        "ports",
                    )))
                }
            }
        }
    }
}

fn collect(model: &RuleModel, alias: &Alias, out: &mut Flat, seen: &mut BTreeSet<String>) {
    if !seen.insert(alias.name.to_ascii_lowercase()) || !alias.enabled {
        return;
    }
    for entry in &alias.entries {
        let (list, value) = match entry {
            AliasEntry::Network(net) => {
                let net = canonical(*net).unwrap_or(*net);
                let list = if net.is_ipv4() { &mut out.v4 } else { &mut out.v6 };
                (list, Value::Net(net))
            }
            AliasEntry::Range { start, end } => {
                let list = if start.is_ipv4() { &mut out.v4 } else { &mut out.v6 };
                (list, Value::AddrRange(*start, *end))
            }
            AliasEntry::Port(range) => (&mut out.ports, port_value(*range)),
            AliasEntry::Alias(name) => {
                if let Some(nested) = model.alias(name) {
                    collect(model, nested, out, seen);
                }
                continue;
            }
            AliasEntry::Hostname(_) | AliasEntry::Other(_) => continue,
        };
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

pub(crate) fn set_name(alias: &str, suffix: &str) -> String {
    format!("{alias}_{suffix}")
}

pub(crate) fn port_value(range: PortRange) -> Value {
    if range.is_single() {
        Value::Port(range.start)
    } else {
        Value::PortRange(range.start, range.end)
    }
}

fn host(addr: std::net::IpAddr) -> Value {
    Value::Net(IpNetwork::from(addr))
}

/// One value or an anonymous set; `None` when empty.
pub(crate) fn match_value(mut values: Vec<Value>) -> Option<MatchValue> {
    let mut seen = Vec::new();
    values.retain(|value| {
        if seen.contains(value) {
            false
        } else {
            seen.push(value.clone());
            true
        }
    });
    match values.len() {
        0 => None,
        1 => values.pop().map(MatchValue::One),
        _ => Some(MatchValue::Set(values)),
    }
}

pub(crate) fn is_v4(value: &Value) -> bool {
    match value {
        Value::Net(net) => net.is_ipv4(),
        Value::AddrRange(start, _) => start.is_ipv4(),
        _ => false,
    }
}

fn by_family(values: Vec<Value>) -> Addr {
    let (v4, v6): (Vec<Value>, Vec<Value>) = values.into_iter().partition(is_v4);
    Addr::Values {
        v4: match_value(v4),
        v6: match_value(v6),
    }
}
