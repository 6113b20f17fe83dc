//! NAT conflict detection.
//!
//! Two mappings conflict when they can claim the same packet and would
//! translate it differently. nft would silently let the first one win;
//! the configuration is rejected instead, naming both mappings.

use std::collections::BTreeSet;
use std::net::IpAddr;

use super::nat::redirect_target;
use super::resolve::{Addr, Resolver, Side};
use super::support::Skipped;
use super::Note;
use crate::error::{ConflictEntry, ConflictError, Issue};
use crate::model::{
    AddressFamily, AddressSpec, Endpoint, NatKind, NatMapping, OneToOne, OutboundRule,
    PortForward, PortSpec, Protocol,
};
use crate::nft::{MatchValue, Value};

#[derive(Debug, Default)]
pub(crate) struct Conflicts {
    pub issues: Vec<Issue>,
    pub notes: Vec<Note>,
}

/// Addresses or ports an endpoint can match.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Span<T> {
    All,
    Ranges(Vec<(T, T)>),
}

impl<T: PartialOrd + Copy> Span<T> {
    fn overlaps(&self, other: &Span<T>, comparable: impl Fn(&T, &T) -> bool) -> bool {
        match (self, other) {
            (Span::All, _) | (_, Span::All) => true,
            (Span::Ranges(left), Span::Ranges(right)) => left.iter().any(|(a0, a1)| {
                right
                    .iter()
                    .any(|(b0, b1)| comparable(a0, b0) && a0 <= b1 && b0 <= a1)
            }),
        }
    }

    fn contains(&self, point: T, comparable: impl Fn(&T, &T) -> bool) -> bool {
        self.overlaps(&Span::Ranges(vec![(point, point)]), comparable)
    }
}

fn same_family(a: &IpAddr, b: &IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn always(_: &u16, _: &u16) -> bool {
    true
}

pub(crate) fn detect(resolver: &Resolver<'_>, skipped: &Skipped) -> Conflicts {
    let mut out = Conflicts::default();
    let mappings: Vec<&NatMapping> = resolver
        .model
        .active_nat()
        .filter(|mapping| !skipped.nat(mapping))
        .collect();

    for (i, first) in mappings.iter().enumerate() {
        for second in &mappings[i + 1..] {
            if !first.interface().eq_ignore_ascii_case(second.interface()) {
                continue;
            }
            match (&first.kind, &second.kind) {
                (NatKind::PortForward(a), NatKind::PortForward(b)) => {
                    port_forwards(resolver, &mut out, first, a, second, b);
                }
                (NatKind::OneToOne(a), NatKind::OneToOne(b)) => {
                    one_to_ones(&mut out, first, a, second, b);
                }
                (NatKind::PortForward(pf), NatKind::OneToOne(binat)) => {
                    forward_over_binat(resolver, &mut out, first, pf, second, binat);
                }
                (NatKind::OneToOne(binat), NatKind::PortForward(pf)) => {
                    forward_over_binat(resolver, &mut out, second, pf, first, binat);
                }
                (NatKind::Outbound(a), NatKind::Outbound(b)) => {
                    outbounds(&mut out, first, a, second, b);
                }
                _ => {}
            }
        }
    }
    out
}

fn entry(mapping: &NatMapping) -> ConflictEntry {
    ConflictEntry {
        label: mapping.label(),
        location: mapping.origin.clone(),
    }
}

fn conflict(out: &mut Conflicts, first: &NatMapping, second: &NatMapping, reason: String) {
    out.issues.push(Issue::Conflict(ConflictError {
        first: entry(first),
        second: entry(second),
        reason,
    }));
}

fn duplicate(out: &mut Conflicts, first: &NatMapping, second: &NatMapping) {
    out.notes.push(Note {
        subject: second.label(),
        location: Some(second.origin.clone()),
        message: format!("duplicates {}; the first one wins", first.label()),
    });
}

fn port_forwards(
    resolver: &Resolver<'_>,
    out: &mut Conflicts,
    first: &NatMapping,
    a: &PortForward,
    second: &NatMapping,
    b: &PortForward,
) {
    let scope_a = (a.family, &a.protocol, &a.source, &a.destination);
    let scope_b = (b.family, &b.protocol, &b.source, &b.destination);
    let outcome_a = (redirect_target(a), a.local_port, a.no_redirect);
    let outcome_b = (redirect_target(b), b.local_port, b.no_redirect);
    if scope_a == scope_b && outcome_a == outcome_b {
        duplicate(out, first, second);
        return;
    }
    let overlap = families_overlap(a.family, b.family)
        && protocols_overlap(&a.protocol, &b.protocol)
        && endpoints_overlap(resolver, &a.source, &b.source, Side::Source, &a.protocol)
        && endpoints_overlap(
            resolver,
            &a.destination,
            &b.destination,
            Side::Destination,
            &a.protocol,
        );
    if overlap && outcome_a != outcome_b {
        let reason = match (a.no_redirect, b.no_redirect) {
            (false, false) => format!(
                "overlapping port forwards redirect to {} and {}",
                describe(a),
                describe(b)
            ),
            _ => "overlapping port forwards disagree on redirection".to_string(),
        };
        conflict(out, first, second, reason);
    }
}

fn describe(pf: &PortForward) -> String {
    match pf.local_port {
        Some(port) if port.is_single() => format!("{}:{}", pf.target, port.start),
        Some(port) => format!("{}:{}-{}", pf.target, port.start, port.end),
        None => pf.target.to_string(),
    }
}

fn one_to_ones(
    out: &mut Conflicts,
    first: &NatMapping,
    a: &OneToOne,
    second: &NatMapping,
    b: &OneToOne,
) {
    if a == b {
        duplicate(out, first, second);
        return;
    }
    if a.external == b.external && a.internal != b.internal {
        conflict(
            out,
            first,
            second,
            format!(
                "external address {} maps to both {} and {}",
                a.external, a.internal, b.internal
            ),
        );
    } else if a.internal == b.internal && a.external != b.external {
        conflict(
            out,
            first,
            second,
            format!(
                "internal {} maps to both {} and {}",
                a.internal, a.external, b.external
            ),
        );
    }
}

fn forward_over_binat(
    resolver: &Resolver<'_>,
    out: &mut Conflicts,
    forward: &NatMapping,
    pf: &PortForward,
    binat_mapping: &NatMapping,
    binat: &OneToOne,
) {
    if pf.destination.negate {
        return;
    }
    let span = address_span(resolver, &pf.destination, Side::Destination);
    if span.contains(binat.external, same_family) {
        let (first, second) = if binat_mapping.origin.line <= forward.origin.line {
            (binat_mapping, forward)
        } else {
            (forward, binat_mapping)
        };
        conflict(
            out,
            first,
            second,
            format!(
                "port forward and 1:1 mapping both claim {}",
                binat.external
            ),
        );
    }
}

fn outbounds(
    out: &mut Conflicts,
    first: &NatMapping,
    a: &OutboundRule,
    second: &NatMapping,
    b: &OutboundRule,
) {
    let same_scope = a.family == b.family
        && a.protocol == b.protocol
        && a.source == b.source
        && a.destination == b.destination;
    if !same_scope {
        return;
    }
    let outcome_a = (&a.translation, a.static_port, a.no_nat);
    let outcome_b = (&b.translation, b.static_port, b.no_nat);
    if outcome_a == outcome_b {
        duplicate(out, first, second);
    } else {
        conflict(
            out,
            first,
            second,
            format!(
                "identical outbound scope translated to {} and {}",
                outcome_text(a),
                outcome_text(b)
            ),
        );
    }
}

fn outcome_text(rule: &OutboundRule) -> String {
    if rule.no_nat {
        return "no nat".to_string();
    }
    if rule.static_port {
        return format!("{} (static port)", rule.translation);
    }
    rule.translation.to_string()
}

fn families_overlap(a: AddressFamily, b: AddressFamily) -> bool {
    (a.includes_v4() && b.includes_v4()) || (a.includes_v6() && b.includes_v6())
}

/// IP protocol numbers a rule can match; `None` for all of them.
fn protocol_numbers(protocol: &Protocol) -> Option<BTreeSet<u8>> {
    let numbers: &[u8] = match protocol {
        Protocol::Any => return None,
        Protocol::Tcp => &[6],
        Protocol::Udp => &[17],
        Protocol::TcpUdp => &[6, 17],
        Protocol::Icmp { .. } => &[1, 58],
        Protocol::Other { number, .. } => return Some(BTreeSet::from([*number])),
    };
    Some(numbers.iter().copied().collect())
}

fn protocols_overlap(a: &Protocol, b: &Protocol) -> bool {
    match (protocol_numbers(a), protocol_numbers(b)) {
        (Some(left), Some(right)) => !left.is_disjoint(&right),
        _ => true,
    }
}

fn endpoints_overlap(
    resolver: &Resolver<'_>,
    a: &Endpoint,
    b: &Endpoint,
    side: Side,
    protocol: &Protocol,
) -> bool {
    let addresses = address_span(resolver, a, side)
        .overlaps(&address_span(resolver, b, side), same_family);
    if !addresses || !protocol.has_ports() {
        return addresses;
    }
    port_span(resolver, a.port.as_ref()).overlaps(&port_span(resolver, b.port.as_ref()), always)
}

fn address_span(resolver: &Resolver<'_>, endpoint: &Endpoint, side: Side) -> Span<IpAddr> {
    if endpoint.negate {
        return Span::All;
    }
    let values: Vec<Value> = match &endpoint.address {
        AddressSpec::Alias(name) => {
            let flat = resolver.flat(name);
            flat.v4.into_iter().chain(flat.v6).collect()
        }
        spec => match resolver.address(spec, side) {
            Addr::Any | Addr::Local => return Span::All,
            Addr::Values { v4, v6 } => v4.into_iter().chain(v6).flat_map(values_of).collect(),
        },
    };
    let ranges: Vec<(IpAddr, IpAddr)> = values.iter().filter_map(address_bounds).collect();
    let runtime = matches!(
        endpoint.address,
        AddressSpec::InterfaceNet(_) | AddressSpec::InterfaceAddress(_)
    );
    if ranges.is_empty() && runtime {
        return Span::All;
    }
    Span::Ranges(ranges)
}

fn port_span(resolver: &Resolver<'_>, spec: Option<&PortSpec>) -> Span<u16> {
    match spec {
        None => Span::All,
        Some(PortSpec::Range(range)) => Span::Ranges(vec![(range.start, range.end)]),
        Some(PortSpec::Alias(name)) => Span::Ranges(
            resolver
                .flat(name)
                .ports
                .iter()
                .filter_map(|value| match value {
                    Value::Port(port) => Some((*port, *port)),
                    Value::PortRange(start, end) => Some((*start, *end)),
                    _ => None,
                })
                .collect(),
        ),
    }
}

fn values_of(value: MatchValue) -> Vec<Value> {
    match value {
        MatchValue::One(value) => vec![value],
        MatchValue::Set(values) => values,
        MatchValue::Named(_) => Vec::new(),
    }
}

fn address_bounds(value: &Value) -> Option<(IpAddr, IpAddr)> {
    match value {
        Value::Net(net) => Some((net.network(), net.broadcast())),
        Value::AddrRange(start, end) => Some((*start, *end)),
        _ => None,
    }
}
