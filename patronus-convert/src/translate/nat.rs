//! NAT chains: `nat_prerouting` (1:1 DNAT, port forwards) and
//! `nat_postrouting` (1:1 SNAT, outbound rules per mode).

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::debug;

use super::expand::{expand, Selector};
use super::{comment, Builder};
use crate::model::{
    AddressFamily, AddressSpec, Endpoint, NatKind, NatMapping, OneToOne, OutboundRule,
    OutboundTranslation, PortForward, PortSpec, Protocol,
};
use crate::nft::{
    is_host, BaseHook, Chain, ChainType, Expr, Hook, IpFamily, Match, MatchKey, NatStmt, NftRule,
    Origin, Value, Verdict,
};

pub(crate) const NAT_PREROUTING: &str = "nat_prerouting";
pub(crate) const NAT_POSTROUTING: &str = "nat_postrouting";

/// Where a port forward sends traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Host(IpAddr),
    Alias(String),
    /// Anything that is not a single host, as written.
    Pool(String),
}

pub(crate) fn redirect_target(pf: &PortForward) -> Target {
    match &pf.target {
        AddressSpec::Network(net) if is_host(net) => Target::Host(net.ip()),
        AddressSpec::Alias(name) => Target::Alias(name.clone()),
        other => Target::Pool(other.to_string()),
    }
}

/// Port the redirect rewrites to: `Some(None)` keeps the original port,
/// `None` means a range shifted onto another range, which one nat
/// statement cannot express.
pub(crate) fn redirect_port(pf: &PortForward) -> Option<Option<u16>> {
    let Some(local) = pf.local_port else {
        return Some(None);
    };
    match &pf.destination.port {
        None if local.is_single() => Some(Some(local.start)),
        None => None,
        Some(PortSpec::Range(external)) if external.is_single() && local.is_single() => {
            Some(Some(local.start))
        }
        Some(PortSpec::Range(external)) if external.start == local.start => Some(None),
        Some(_) => None,
    }
}

pub(crate) fn build(b: &mut Builder<'_>) -> Vec<Chain> {
    let model = b.model;
    let mut pre = Vec::new();
    let mut post = Vec::new();

    for mapping in model.active_nat() {
        if b.skipped.nat(mapping) {
            continue;
        }
        if let NatKind::OneToOne(binat) = &mapping.kind {
            let (dnat, snat) = one_to_one(b, mapping, binat);
            pre.extend(dnat);
            post.extend(snat);
        }
    }
    for mapping in model.active_nat() {
        if b.skipped.nat(mapping) {
            continue;
        }
        if let NatKind::PortForward(pf) = &mapping.kind {
            pre.extend(port_forward(b, mapping, pf));
        }
    }
    if model.outbound_mode.uses_manual_rules() {
        for mapping in model.active_nat() {
            if b.skipped.nat(mapping) {
                continue;
            }
            if let NatKind::Outbound(out) = &mapping.kind {
                post.extend(outbound(b, mapping, out));
            }
        }
    }
    if model.outbound_mode.generates_automatic_rules() {
        post.extend(automatic(b));
    }

    debug!(prerouting = pre.len(), postrouting = post.len(), "built nat chains");
    let mut chains = Vec::new();
    if !pre.is_empty() {
        chains.push(nat_chain(NAT_PREROUTING, Hook::Prerouting, -100, pre));
    }
    if !post.is_empty() {
        chains.push(nat_chain(NAT_POSTROUTING, Hook::Postrouting, 100, post));
    }
    chains
}

fn nat_chain(name: &str, hook: Hook, priority: i32, rules: Vec<NftRule>) -> Chain {
    Chain {
        name: name.to_string(),
        hook: Some(BaseHook {
            kind: ChainType::Nat,
            hook,
            priority,
            policy: None,
        }),
        rules,
    }
}

fn family_of(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn narrow(family: AddressFamily, to: &IpAddr) -> Option<AddressFamily> {
    let covered = if to.is_ipv4() {
        family.includes_v4()
    } else {
        family.includes_v6()
    };
    covered.then(|| family_of(to))
}

/// Build the rules of one mapping, one per expanded branch.
fn emit(
    b: &mut Builder<'_>,
    mapping: &NatMapping,
    selector: Selector<'_>,
    tail: Expr,
) -> Vec<NftRule> {
    let branches = expand(&b.resolver, &selector);
    let label = mapping.label();
    if branches.is_empty() {
        b.note(&label, Some(&mapping.origin), "can never match; not emitted");
    }
    branches
        .into_iter()
        .map(|matches| {
            let mut exprs: Vec<Expr> = matches.into_iter().map(Expr::Match).collect();
            exprs.push(tail.clone());
            let mut rule = NftRule::new(exprs);
            rule.comment = Some(comment(&label));
            rule.origins = vec![Origin::new(label.clone(), Some(mapping.origin.clone()))];
            rule
        })
        .collect()
}

fn one_to_one(
    b: &mut Builder<'_>,
    mapping: &NatMapping,
    binat: &OneToOne,
) -> (Vec<NftRule>, Vec<NftRule>) {
    let internal = binat.internal.ip();
    if internal.is_ipv4() != binat.external.is_ipv4() {
        b.note(
            &mapping.label(),
            Some(&mapping.origin),
            "external and internal addresses differ in family; not emitted",
        );
        return (Vec::new(), Vec::new());
    }
    let family = family_of(&binat.external);
    let ip_family = IpFamily::of(&binat.external);
    let label = mapping.label();
    let names = std::slice::from_ref(&binat.interface);

    let mut dnat = Vec::new();
    if let Some(iface) = b.iface_match(MatchKey::IifName, names, &label, Some(&mapping.origin)) {
        let external = Endpoint {
            address: AddressSpec::Network(IpNetwork::from(binat.external)),
            port: None,
            negate: false,
        };
        let selector = Selector {
            iface: Some(iface),
            extra: Vec::new(),
            family,
            protocol: &Protocol::Any,
            source: &binat.destination,
            destination: &external,
        };
        let stmt = Expr::Nat(NatStmt::Dnat {
            family: ip_family,
            addr: internal,
            port: None,
        });
        dnat = emit(b, mapping, selector, stmt);
    }

    let mut snat = Vec::new();
    if let Some(iface) = b.iface_match(MatchKey::OifName, names, &label, Some(&mapping.origin)) {
        let inside = Endpoint {
            address: AddressSpec::Network(IpNetwork::from(internal)),
            port: None,
            negate: false,
        };
        let selector = Selector {
            iface: Some(iface),
            extra: Vec::new(),
            family,
            protocol: &Protocol::Any,
            source: &inside,
            destination: &binat.destination,
        };
        let stmt = Expr::Nat(NatStmt::Snat {
            family: ip_family,
            addr: binat.external,
            random: false,
        });
        snat = emit(b, mapping, selector, stmt);
    }
    (dnat, snat)
}

fn port_forward(b: &mut Builder<'_>, mapping: &NatMapping, pf: &PortForward) -> Vec<NftRule> {
    let label = mapping.label();
    let (family, tail) = if pf.no_redirect {
        (pf.family, Expr::Verdict(Verdict::Accept))
    } else {
        let (Target::Host(target), Some(port)) = (redirect_target(pf), redirect_port(pf)) else {
            return Vec::new();
        };
        let Some(family) = narrow(pf.family, &target) else {
            b.note(
                &label,
                Some(&mapping.origin),
                "redirect target family is not covered by the rule; not emitted",
            );
            return Vec::new();
        };
        let stmt = NatStmt::Dnat {
            family: IpFamily::of(&target),
            addr: target,
            port,
        };
        (family, Expr::Nat(stmt))
    };
    let Some(iface) = b.iface_match(
        MatchKey::IifName,
        std::slice::from_ref(&pf.interface),
        &label,
        Some(&mapping.origin),
    ) else {
        return Vec::new();
    };
    let selector = Selector {
        iface: Some(iface),
        extra: Vec::new(),
        family,
        protocol: &pf.protocol,
        source: &pf.source,
        destination: &pf.destination,
    };
    emit(b, mapping, selector, tail)
}

fn outbound(b: &mut Builder<'_>, mapping: &NatMapping, out: &OutboundRule) -> Vec<NftRule> {
    let label = mapping.label();
    let random = !out.static_port;
    let (family, tail) = match &out.translation {
        _ if out.no_nat => (out.family, Expr::Verdict(Verdict::Accept)),
        OutboundTranslation::InterfaceAddress => {
            (out.family, Expr::Nat(NatStmt::Masquerade { random }))
        }
        OutboundTranslation::Address(addr) => {
            let Some(family) = narrow(out.family, addr) else {
                b.note(
                    &label,
                    Some(&mapping.origin),
                    "translation address family is not covered by the rule; not emitted",
                );
                return Vec::new();
            };
            let stmt = NatStmt::Snat {
                family: IpFamily::of(addr),
                addr: *addr,
                random,
            };
            (family, Expr::Nat(stmt))
        }
        OutboundTranslation::Pool(_) => return Vec::new(),
    };
    let Some(iface) = b.iface_match(
        MatchKey::OifName,
        std::slice::from_ref(&out.interface),
        &label,
        Some(&mapping.origin),
    ) else {
        return Vec::new();
    };
    let selector = Selector {
        iface: Some(iface),
        extra: Vec::new(),
        family,
        protocol: &out.protocol,
        source: &out.source,
        destination: &out.destination,
    };
    emit(b, mapping, selector, tail)
}

/// pf's automatic outbound NAT: every static IPv4 network of a
/// non-gateway interface is masqueraded on each gateway interface.
fn automatic(b: &mut Builder<'_>) -> Vec<NftRule> {
    let model = b.model;
    let internal: Vec<Value> = model
        .interfaces
        .iter()
        .filter(|iface| !iface.is_gateway_interface())
        .flat_map(|iface| iface.networks())
        .filter(IpNetwork::is_ipv4)
        .map(Value::Net)
        .collect();
    let Some(sources) = super::resolve::match_value(internal) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for iface in model.interfaces.iter().filter(|iface| iface.is_gateway_interface()) {
        let device = Value::Name(b.settings.device_name(&iface.device).to_string());
        let mut rule = NftRule::new(vec![
            Expr::Match(Match::one(MatchKey::OifName, device)),
            Expr::Match(Match::new(MatchKey::IpSaddr, sources.clone())),
            Expr::Nat(NatStmt::Masquerade { random: true }),
        ]);
        let label = format!("automatic outbound NAT on {}", iface.name);
        rule.comment = Some(comment(&label));
        rule.origins = vec![Origin::new(label, Some(iface.origin.clone()))];
        out.push(rule);
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{redirect_port, redirect_target, Target};
    use crate::import::import_bytes;
    use crate::model::NatKind;
    use crate::nft::emit::render_rule;
    use crate::settings::Settings;
    use crate::translate::{translate, TranslateOptions};

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <wan><if>em0</if><ipaddr>203.0.113.2</ipaddr><subnet>24</subnet><gateway>WANGW</gateway></wan>
    <lan><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
    <opt1><if>em2</if><ipaddr>10.0.0.1</ipaddr><subnet>24</subnet></opt1>
  </interfaces>
  <nat>
    <outbound><mode>hybrid</mode>
      <rule><interface>wan</interface><source><network>10.0.0.0/24</network></source>
        <destination><any/></destination><target>203.0.113.9</target><staticnatport/><descr>dmz</descr></rule>
    </outbound>
    <rule><interface>wan</interface><protocol>tcp</protocol><source><any/></source>
      <destination><network>wanip</network><port>8443</port></destination>
      <target>192.168.1.20</target><local-port>443</local-port><descr>web</descr></rule>
    <rule><interface>wan</interface><protocol>tcp</protocol><source><any/></source>
      <destination><network>wanip</network><port>2000-2010</port></destination>
      <target>192.168.1.21</target><local-port>2000</local-port></rule>
    <onetoone><interface>wan</interface><external>203.0.113.50</external>
      <source><address>192.168.1.50</address></source><destination><any/></destination></onetoone>
  </nat>
</pfsense>"#;

    fn chain_rules(name: &str) -> Vec<String> {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default()).expect("translate");
        unit.ruleset
            .table
            .chain(name)
            .unwrap_or_else(|| panic!("chain {name}"))
            .rules
            .iter()
            .map(render_rule)
            .collect()
    }

    #[test]
    fn prerouting_has_binat_before_port_forwards() {
        assert_eq!(
            chain_rules("nat_prerouting"),
            vec![
                "iifname \"em0\" ip daddr 203.0.113.50 dnat ip to 192.168.1.50 comment \"binat[0]\"",
                "iifname \"em0\" ip daddr 203.0.113.2 tcp dport 8443 dnat ip to 192.168.1.20:443 comment \"rdr[0] 'web'\"",
                "iifname \"em0\" ip daddr 203.0.113.2 tcp dport 2000-2010 dnat ip to 192.168.1.21 comment \"rdr[1]\"",
            ]
        );
    }

    #[test]
    fn hybrid_outbound_runs_manual_then_automatic() {
        assert_eq!(
            chain_rules("nat_postrouting"),
            vec![
                "oifname \"em0\" ip saddr 192.168.1.50 snat ip to 203.0.113.50 comment \"binat[0]\"",
                "oifname \"em0\" ip saddr 10.0.0.0/24 snat ip to 203.0.113.9 comment \"outbound[0] 'dmz'\"",
                "oifname \"em0\" ip saddr { 192.168.1.0/24, 10.0.0.0/24 } masquerade random comment \"automatic outbound NAT on wan\"",
            ]
        );
    }

    #[test]
    fn shifted_port_ranges_are_not_expressible() {
        let imported = import_bytes(CONFIG).expect("import");
        let mut forwards = imported.model.nat.iter().filter_map(|mapping| match &mapping.kind {
            NatKind::PortForward(pf) => Some(pf),
            _ => None,
        });
        let web = forwards.next().expect("web");
        assert_eq!(redirect_port(web), Some(Some(443)));
        assert_eq!(redirect_target(web), Target::Host("192.168.1.20".parse().expect("ip")));

        let mut shifted = forwards.next().expect("range").clone();
        assert_eq!(redirect_port(&shifted), Some(None));
        shifted.local_port = Some(crate::model::PortRange::single(3000));
        assert_eq!(redirect_port(&shifted), None);
    }
}
