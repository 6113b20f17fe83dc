//! Expansion of one source selector (interfaces, family, protocol,
//! endpoints) into the match lists of one or more nft rules.
//!
//! Each address family a selector covers yields one branch. A branch that
//! can never match (an empty alias family, an empty port alias) is
//! dropped. Two identical branches collapse into one family-free rule;
//! otherwise a branch without a family-implying match gets an explicit
//! `meta nfproto`. Branches of one selector are disjoint by family, so
//! emitting them adjacently keeps first-match order.

use super::filter::icmp_type_name;
use super::resolve::{match_value, Addr, Ports, Resolver, Side};
use crate::model::{AddressFamily, Endpoint, Protocol};
use crate::nft::{Match, MatchKey, MatchValue, Transport, Value};

pub(crate) struct Selector<'a> {
    /// `iifname`/`oifname` match, first in every branch.
    pub iface: Option<Match>,
    /// Matches placed right after the interface (`ct status dnat`).
    pub extra: Vec<Match>,
    pub family: AddressFamily,
    pub protocol: &'a Protocol,
    pub source: &'a Endpoint,
    pub destination: &'a Endpoint,
}

enum Part {
    Free,
    Never,
    Cond(Match),
}

pub(crate) fn expand(resolver: &Resolver<'_>, selector: &Selector<'_>) -> Vec<Vec<Match>> {
    let mut branches: Vec<(bool, Vec<Match>)> = Vec::new();
    for v6 in [false, true] {
        let covered = if v6 {
            selector.family.includes_v6()
        } else {
            selector.family.includes_v4()
        };
        if !covered {
            continue;
        }
        if let Some(matches) = branch(resolver, selector, v6) {
            branches.push((v6, matches));
        }
    }

    if branches.len() == 2 && branches[0].1 == branches[1].1 {
        branches.truncate(1);
        return branches.into_iter().map(|(_, matches)| matches).collect();
    }
    let lead = usize::from(selector.iface.is_some()) + selector.extra.len();
    branches
        .into_iter()
        .map(|(v6, mut matches)| {
            if !matches.iter().any(implies_family) {
                let proto = if v6 { "ipv6" } else { "ipv4" };
                matches.insert(lead, Match::one(MatchKey::NfProto, Value::Symbol(proto.to_string())));
            }
            matches
        })
        .collect()
}

fn branch(resolver: &Resolver<'_>, selector: &Selector<'_>, v6: bool) -> Option<Vec<Match>> {
    let mut out: Vec<Match> = selector.iface.iter().cloned().collect();
    out.extend(selector.extra.iter().cloned());

    let (saddr, daddr) = if v6 {
        (MatchKey::Ip6Saddr, MatchKey::Ip6Daddr)
    } else {
        (MatchKey::IpSaddr, MatchKey::IpDaddr)
    };
    let source = address_part(
        resolver.address(&selector.source.address, Side::Source),
        selector.source.negate,
        v6,
        saddr,
    );
    let destination = address_part(
        resolver.address(&selector.destination.address, Side::Destination),
        selector.destination.negate,
        v6,
        daddr,
    );

    let transport = transport(selector);
    let (sport, dport) = match transport {
        Some(transport) => (
            port_part(resolver.ports(selector.source.port.as_ref()), MatchKey::Sport(transport)),
            port_part(
                resolver.ports(selector.destination.port.as_ref()),
                MatchKey::Dport(transport),
            ),
        ),
        None => (Part::Free, Part::Free),
    };
    let l4proto = l4proto_part(selector.protocol, transport, v6);
    let icmp = icmp_part(selector.protocol, v6);

    for part in [l4proto, source, sport, destination, dport, icmp] {
        match part {
            Part::Free => {}
            Part::Never => return None,
            Part::Cond(m) => out.push(m),
        }
    }
    Some(out)
}

/// Port matches use the protocol's own header for single-protocol rules
/// and the generic transport header for tcp/udp.
fn transport(selector: &Selector<'_>) -> Option<Transport> {
    let has_ports = selector.source.port.is_some() || selector.destination.port.is_some();
    if !has_ports {
        return None;
    }
    match selector.protocol {
        Protocol::Tcp => Some(Transport::Tcp),
        Protocol::Udp => Some(Transport::Udp),
        Protocol::TcpUdp => Some(Transport::Th),
        _ => None,
    }
}

fn address_part(addr: Addr, negate: bool, v6: bool, key: MatchKey) -> Part {
    match addr {
        Addr::Any if negate => Part::Never,
        Addr::Any => Part::Free,
        Addr::Local => Part::Cond(Match {
            key: MatchKey::FibDaddrType,
            negate,
            value: MatchValue::One(Value::Symbol("local".to_string())),
        }),
        Addr::Values { v4, v6: v6_value } => {
            let value = if v6 { v6_value } else { v4 };
            match value {
                Some(value) => Part::Cond(Match { key, negate, value }),
                None if negate => Part::Free,
                None => Part::Never,
            }
        }
    }
}

fn port_part(ports: Ports, key: MatchKey) -> Part {
    match ports {
        Ports::Any => Part::Free,
        Ports::Never => Part::Never,
        Ports::Values(value) => Part::Cond(Match::new(key, value)),
    }
}

fn l4proto_part(protocol: &Protocol, transport: Option<Transport>, v6: bool) -> Part {
    let symbol = |name: &str| Value::Symbol(name.to_string());
    let value = match protocol {
        Protocol::Any => return Part::Free,
        // `tcp dport` and `udp dport` carry their own protocol dependency.
        Protocol::Tcp | Protocol::Udp if transport.is_some() => return Part::Free,
        Protocol::Tcp => MatchValue::One(symbol("tcp")),
        Protocol::Udp => MatchValue::One(symbol("udp")),
        Protocol::TcpUdp => MatchValue::Set(vec![symbol("tcp"), symbol("udp")]),
        Protocol::Icmp { types } if !types.is_empty() => return Part::Free,
        Protocol::Icmp { .. } => MatchValue::One(symbol(if v6 { "ipv6-icmp" } else { "icmp" })),
        Protocol::Other { number, .. } => MatchValue::One(Value::Symbol(number.to_string())),
    };
    Part::Cond(Match::new(MatchKey::L4Proto, value))
}

fn icmp_part(protocol: &Protocol, v6: bool) -> Part {
    let Protocol::Icmp { types } = protocol else {
        return Part::Free;
    };
    if types.is_empty() {
        return Part::Free;
    }
    let names = types
        .iter()
        .filter_map(|kind| icmp_type_name(kind, v6))
        .map(|name| Value::Symbol(name.to_string()))
        .collect();
    let key = if v6 {
        MatchKey::Icmpv6Type
    } else {
        MatchKey::IcmpType
    };
    match match_value(names) {
        Some(value) => Part::Cond(Match::new(key, value)),
        None => Part::Never,
    }
}

fn implies_family(m: &Match) -> bool {
    m.key.is_address() || matches!(m.key, MatchKey::IcmpType | MatchKey::Icmpv6Type)
}

#[cfg(test)]
mod tests {
    use super::{expand, Selector};
    use crate::import::import_bytes;
    use crate::model::{AddressFamily, AddressSpec, Endpoint, PortRange, PortSpec, Protocol};
    use crate::nft::emit::render_expr;
    use crate::nft::{Expr, Match, MatchKey, Value};
    use crate::settings::Settings;
    use crate::translate::resolve::Resolver;

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <lan><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <aliases>
    <alias><name>dual</name><type>host</type><address>10.0.0.1 fd00::1</address></alias>
    <alias><name>v6only</name><type>host</type><address>fd00::2</address></alias>
  </aliases>
</pfsense>"#;

    fn render(branches: Vec<Vec<Match>>) -> Vec<String> {
        branches
            .into_iter()
            .map(|matches| {
                matches
                    .into_iter()
                    .map(|m| render_expr(&Expr::Match(m)))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    fn endpoint(address: AddressSpec, port: Option<u16>, negate: bool) -> Endpoint {
        Endpoint {
            address,
            port: port.map(|p| PortSpec::Range(PortRange::single(p))),
            negate,
        }
    }

    #[test]
    fn dual_stack_alias_splits_by_family() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let resolver = Resolver::new(&imported.model, &settings);
        let source = endpoint(AddressSpec::Alias("dual".to_string()), None, false);
        let destination = endpoint(AddressSpec::Any, Some(443), false);
        let selector = Selector {
            iface: Some(Match::one(MatchKey::IifName, Value::Name("em1".to_string()))),
            extra: Vec::new(),
            family: AddressFamily::Inet46,
            protocol: &Protocol::Tcp,
            source: &source,
            destination: &destination,
        };
        assert_eq!(
            render(expand(&resolver, &selector)),
            vec![
                "iifname \"em1\" ip saddr @dual_v4 tcp dport 443",
                "iifname \"em1\" ip6 saddr @dual_v6 tcp dport 443",
            ]
        );
    }

    #[test]
    fn family_free_rules_collapse_and_dead_families_vanish() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let resolver = Resolver::new(&imported.model, &settings);
        let any = Endpoint::any();
        let firewall = endpoint(AddressSpec::Firewall, None, false);
        let selector = Selector {
            iface: None,
            extra: Vec::new(),
            family: AddressFamily::Inet46,
            protocol: &Protocol::Udp,
            source: &any,
            destination: &firewall,
        };
        assert_eq!(
            render(expand(&resolver, &selector)),
            vec!["meta l4proto udp fib daddr type local"]
        );

        let v6only = endpoint(AddressSpec::Alias("v6only".to_string()), None, false);
        let selector = Selector {
            family: AddressFamily::Inet,
            source: &v6only,
            ..selector
        };
        assert!(expand(&resolver, &selector).is_empty());

        let selector = Selector {
            family: AddressFamily::Inet,
            protocol: &Protocol::Icmp { types: Vec::new() },
            source: &any,
            destination: &any,
            ..selector
        };
        assert_eq!(
            render(expand(&resolver, &selector)),
            vec!["meta nfproto ipv4 meta l4proto icmp"]
        );
    }
}
