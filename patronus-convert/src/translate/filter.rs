//! Filter chains: the base hooks, inbound dispatch per interface and the
//! floating rule chains.
//!
//! ```text
//! input    -> jump filter_in                    -> accept
//! forward  -> jump filter_in -> jump filter_out -> accept
//! output   -> jump filter_out                   -> accept
//! filter_in: rdr-pass allowances, floating in rules,
//!            iifname <dev> goto in_<if>, default inbound verdict
//! in_<if>:   group rules, interface rules, default inbound verdict
//! filter_out: floating out rules, default outbound verdict
//! ```
//!
//! A passing source rule returns to the base chain, which goes on to the
//! outbound check or its final accept. Blocking rules end the hook.

use tracing::debug;

use super::expand::{expand, Selector};
use super::nat::{redirect_port, redirect_target, Target};
use super::{comment, Builder};
use crate::import::PSEUDO_INTERFACES;
use crate::model::{
    Action, AddressSpec, Endpoint, FilterAssociation, NatKind, PortRange, PortSpec, Protocol,
    Rule, RuleScope,
};
use crate::nft::{
    BaseHook, Chain, ChainType, Expr, Hook, Match, MatchKey, NftRule, Origin, Policy, RejectKind,
    Value, Verdict,
};
use crate::settings::{InboundDefault, OutboundDefault};

pub(crate) const FILTER_IN: &str = "filter_in";
pub(crate) const FILTER_OUT: &str = "filter_out";

/// pf ICMP type names with their nft spelling.
const ICMP_TYPES: &[(&str, &str)] = &[
    ("echorep", "echo-reply"),
    ("unreach", "destination-unreachable"),
    ("squench", "source-quench"),
    ("redir", "redirect"),
    ("echoreq", "echo-request"),
    ("routeradv", "router-advertisement"),
    ("routersol", "router-solicitation"),
    ("timex", "time-exceeded"),
    ("paramprob", "parameter-problem"),
    ("timereq", "timestamp-request"),
    ("timerep", "timestamp-reply"),
    ("inforeq", "info-request"),
    ("inforep", "info-reply"),
    ("maskreq", "address-mask-request"),
    ("maskrep", "address-mask-reply"),
];

const ICMPV6_TYPES: &[(&str, &str)] = &[
    ("unreach", "destination-unreachable"),
    ("toobig", "packet-too-big"),
    ("timex", "time-exceeded"),
    ("paramprob", "parameter-problem"),
    ("echoreq", "echo-request"),
    ("echorep", "echo-reply"),
    ("listqry", "mld-listener-query"),
    ("listenrep", "mld-listener-report"),
    ("listendone", "mld-listener-done"),
    ("routersol", "nd-router-solicit"),
    ("routeradv", "nd-router-advert"),
    ("neighbrsol", "nd-neighbor-solicit"),
    ("neighbradv", "nd-neighbor-advert"),
    ("redir", "nd-redirect"),
    ("routrrenum", "router-renumbering"),
];

/// nft name of a pf ICMP (or ICMPv6) type; `None` when nft has none.
pub fn icmp_type_name(name: &str, v6: bool) -> Option<&'static str> {
    let table = if v6 { ICMPV6_TYPES } else { ICMP_TYPES };
    let lower = name.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(pf, _)| *pf == lower)
        .map(|(_, nft)| *nft)
}

pub(crate) fn build(b: &mut Builder<'_>) -> Vec<Chain> {
    let stateful = b.settings.stateful;
    let mut chains = vec![
        base("input", Hook::Input, stateful, &[FILTER_IN]),
        base("forward", Hook::Forward, stateful, &[FILTER_IN, FILTER_OUT]),
        base("output", Hook::Output, stateful, &[FILTER_OUT]),
    ];

    let mut filter_in = Chain::regular(FILTER_IN);
    filter_in.rules.extend(rdr_pass_allowances(b));

    let model = b.model;
    for rule in model.active_rules() {
        if rule.scope == RuleScope::Interface || !rule.direction.covers_in() || b.skipped.rule(rule) {
            continue;
        }
        let Some(iface) = b.iface_match(MatchKey::IifName, &rule.interfaces, &rule.label(), Some(&rule.origin))
        else {
            continue;
        };
        filter_in.rules.extend(filter_rule(b, rule, Some(iface)));
    }

    let mut per_interface = Vec::new();
    for name in dispatch_targets(b) {
        let mut chain = Chain::regular(format!("in_{name}"));
        for rule in interface_rules(b, &name) {
            chain.rules.extend(filter_rule(b, rule, None));
        }
        if chain.rules.is_empty() {
            continue;
        }
        chain.rules.push(default_inbound(b));
        let origin = b.model.interface(&name).map(|iface| iface.origin.clone());
        let Some(iface) = b.iface_match(
            MatchKey::IifName,
            std::slice::from_ref(&name),
            &format!("interface {name}"),
            origin.as_ref(),
        ) else {
            continue;
        };
        let mut dispatch = NftRule::new(vec![
            Expr::Match(iface),
            Expr::Verdict(Verdict::Goto(chain.name.clone())),
        ]);
        dispatch.origins = vec![Origin::new(format!("interface {name}"), None)];
        filter_in.rules.push(dispatch);
        per_interface.push(chain);
    }
    filter_in.rules.push(default_inbound(b));

    let mut filter_out = Chain::regular(FILTER_OUT);
    for rule in model.active_rules() {
        if rule.scope == RuleScope::Interface || !rule.direction.covers_out() || b.skipped.rule(rule) {
            continue;
        }
        let Some(iface) = b.iface_match(MatchKey::OifName, &rule.interfaces, &rule.label(), Some(&rule.origin))
        else {
            continue;
        };
        filter_out.rules.extend(filter_rule(b, rule, Some(iface)));
    }
    filter_out.rules.push(default_outbound(b));

    debug!(
        inbound = filter_in.rules.len(),
        interfaces = per_interface.len(),
        outbound = filter_out.rules.len(),
        "built filter chains"
    );
    chains.push(filter_in);
    chains.extend(per_interface);
    chains.push(filter_out);
    chains
}

fn base(name: &str, hook: Hook, stateful: bool, jumps: &[&str]) -> Chain {
    let mut rules = Vec::new();
    if stateful {
        let state = |states: &str, verdict| {
            let mut rule = NftRule::new(vec![
                Expr::Match(Match::one(MatchKey::CtState, Value::Symbol(states.to_string()))),
                Expr::Verdict(verdict),
            ]);
            rule.origins = vec![Origin::new("state tracking", None)];
            rule
        };
        rules.push(state("established,related", Verdict::Accept));
        rules.push(state("invalid", Verdict::Drop));
    }
    for target in jumps {
        let mut rule = NftRule::new(vec![Expr::Verdict(Verdict::Jump((*target).to_string()))]);
        rule.origins = vec![Origin::new(format!("{name} dispatch"), None)];
        rules.push(rule);
    }
    let mut accept = NftRule::new(vec![Expr::Verdict(Verdict::Accept)]);
    accept.origins = vec![Origin::new("passed traffic", None)];
    rules.push(accept);
    Chain {
        name: name.to_string(),
        hook: Some(BaseHook {
            kind: ChainType::Filter,
            hook,
            priority: 0,
            policy: Some(Policy::Drop),
        }),
        rules,
    }
}

/// Interfaces with their own inbound chain: model interfaces in order,
/// then mapped pseudo interfaces.
fn dispatch_targets(b: &Builder<'_>) -> Vec<String> {
    let mut names: Vec<String> = b.model.interfaces.iter().map(|iface| iface.name.clone()).collect();
    for pseudo in PSEUDO_INTERFACES {
        if b.model.interface(pseudo).is_none() && b.settings.pseudo_interfaces.contains_key(*pseudo) {
            names.push((*pseudo).to_string());
        }
    }
    names
}

/// Interface-tab rules that apply to `name`: rules of each group it
/// belongs to (group order), then its own rules.
fn interface_rules<'m>(b: &Builder<'m>, name: &str) -> Vec<&'m Rule> {
    let model = b.model;
    let mut targets: Vec<String> = model
        .groups_of(name)
        .map(|group| group.name.to_ascii_lowercase())
        .collect();
    targets.push(name.to_string());
    let mut out = Vec::new();
    for target in &targets {
        out.extend(model.active_rules().filter(|rule| {
            rule.scope == RuleScope::Interface
                && rule.interfaces.iter().any(|iface| iface.eq_ignore_ascii_case(target))
                && !b.skipped.rule(rule)
        }));
    }
    out
}

fn filter_rule(b: &mut Builder<'_>, rule: &Rule, iface: Option<Match>) -> Vec<NftRule> {
    let selector = Selector {
        iface,
        extra: Vec::new(),
        family: rule.family,
        protocol: &rule.protocol,
        source: &rule.source,
        destination: &rule.destination,
    };
    let branches = expand(&b.resolver, &selector);
    if branches.is_empty() {
        b.note(&rule.label(), Some(&rule.origin), "can never match; not emitted");
        return Vec::new();
    }
    // pf answers a rejected TCP peer with a reset whatever else the rule
    // matches, so mixed-protocol rejects get a TCP twin ahead of them.
    let reset_first = rule.action == Action::Reject
        && matches!(rule.protocol, Protocol::Any | Protocol::TcpUdp);
    let verdict = match rule.action {
        Action::Pass => Verdict::Return,
        Action::Block => Verdict::Drop,
        Action::Reject if rule.protocol == Protocol::Tcp => Verdict::Reject(RejectKind::TcpReset),
        Action::Reject => Verdict::Reject(RejectKind::Default),
    };
    let label = rule.label();
    let mut out = Vec::new();
    for matches in branches {
        if reset_first {
            let reset = Verdict::Reject(RejectKind::TcpReset);
            out.push(emit_filter_rule(b, rule, &label, only_tcp(&matches), reset));
        }
        out.push(emit_filter_rule(b, rule, &label, matches, verdict.clone()));
    }
    out
}

fn emit_filter_rule(
    b: &Builder<'_>,
    rule: &Rule,
    label: &str,
    matches: Vec<Match>,
    verdict: Verdict,
) -> NftRule {
    let mut exprs: Vec<Expr> = matches.into_iter().map(Expr::Match).collect();
    if rule.log {
        exprs.push(Expr::Log {
            prefix: format!("{} filter[{}]: ", b.settings.log_prefix, rule.index),
        });
    }
    exprs.push(Expr::Verdict(verdict));
    let mut out = NftRule::new(exprs);
    out.comment = Some(comment(label));
    out.origins = vec![Origin::new(label, Some(rule.origin.clone()))];
    out
}

/// `matches` narrowed to TCP: a protocol set becomes `tcp`, a rule
/// without one gains `meta l4proto tcp`.
fn only_tcp(matches: &[Match]) -> Vec<Match> {
    let tcp = || Match::one(MatchKey::L4Proto, Value::Symbol("tcp".to_string()));
    let mut narrowed = matches.to_vec();
    match narrowed
        .iter_mut()
        .find(|m| m.key == MatchKey::L4Proto && !m.negate)
    {
        Some(m) => *m = tcp(),
        None => narrowed.push(tcp()),
    }
    narrowed
}

/// Redirected traffic of `pass`-associated port forwards, accepted on the
/// translated address and port.
fn rdr_pass_allowances(b: &mut Builder<'_>) -> Vec<NftRule> {
    let model = b.model;
    let mut out = Vec::new();
    for mapping in model.active_nat() {
        let NatKind::PortForward(pf) = &mapping.kind else {
            continue;
        };
        if pf.no_redirect || pf.association != FilterAssociation::Pass || b.skipped.nat(mapping) {
            continue;
        }
        let (Target::Host(target), Some(port)) = (redirect_target(pf), redirect_port(pf)) else {
            continue;
        };
        let label = mapping.label();
        let Some(iface) = b.iface_match(
            MatchKey::IifName,
            std::slice::from_ref(&pf.interface),
            &label,
            Some(&mapping.origin),
        ) else {
            continue;
        };
        let destination = Endpoint {
            address: AddressSpec::Network(target.into()),
            port: match port {
                Some(port) => Some(PortSpec::Range(PortRange::single(port))),
                None => pf.destination.port.clone(),
            },
            negate: false,
        };
        let selector = Selector {
            iface: Some(iface),
            extra: vec![Match::one(MatchKey::CtStatus, Value::Symbol("dnat".to_string()))],
            family: pf.family,
            protocol: &pf.protocol,
            source: &pf.source,
            destination: &destination,
        };
        for matches in expand(&b.resolver, &selector) {
            let mut exprs: Vec<Expr> = matches.into_iter().map(Expr::Match).collect();
            exprs.push(Expr::Verdict(Verdict::Return));
            let mut rule = NftRule::new(exprs);
            rule.comment = Some(comment(&label));
            rule.origins = vec![Origin::new(label.clone(), Some(mapping.origin.clone()))];
            out.push(rule);
        }
    }
    out
}

fn default_inbound(b: &Builder<'_>) -> NftRule {
    let verdict = match b.settings.default_inbound {
        InboundDefault::Drop => Verdict::Drop,
        InboundDefault::Reject => Verdict::Reject(RejectKind::Default),
    };
    let mut rule = NftRule::new(vec![Expr::Verdict(verdict)]);
    rule.origins = vec![Origin::new("default inbound policy", None)];
    rule
}

fn default_outbound(b: &Builder<'_>) -> NftRule {
    let verdict = match b.settings.default_outbound {
        OutboundDefault::Pass => Verdict::Return,
        OutboundDefault::Drop => Verdict::Drop,
    };
    let mut rule = NftRule::new(vec![Expr::Verdict(verdict)]);
    rule.origins = vec![Origin::new("default outbound policy", None)];
    rule
}
