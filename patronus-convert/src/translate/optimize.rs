//! Equivalence-preserving ruleset optimization.
//!
//! Three rewrites run per chain until none applies:
//!
//! - rules after an unconditional terminal rule are unreachable and go;
//! - a rule whose matches repeat those of an earlier terminal rule is
//!   unreachable and goes;
//! - two adjacent rules with the same statements that differ in exactly
//!   one match become one rule matching the union of both values.
//!
//! Merged rules keep the origins of both, so the trace still names every
//! source rule an nft rule stands for.

use tracing::debug;

use super::comment;
use crate::nft::{Chain, Expr, Match, MatchKey, MatchValue, NftRule, Table, Value, Verdict};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub merged: usize,
    pub removed: usize,
}

pub fn optimize(table: &mut Table) -> Stats {
    let mut stats = Stats::default();
    for chain in &mut table.chains {
        let before = chain.rules.len();
        loop {
            let removed = drop_after_terminal(chain) + drop_shadowed(chain);
            let merged = merge_adjacent(chain);
            stats.removed += removed;
            stats.merged += merged;
            if removed + merged == 0 {
                break;
            }
        }
        if chain.rules.len() != before {
            debug!(chain = %chain.name, before, after = chain.rules.len(), "optimized chain");
        }
    }
    stats
}

/// A rule that ends evaluation of its chain whenever its matches hold.
fn is_terminal(rule: &NftRule) -> bool {
    match rule.verdict() {
        Some(Verdict::Jump(_)) => false,
        Some(_) => true,
        None => rule.exprs.iter().any(|expr| matches!(expr, Expr::Nat(_))),
    }
}

fn drop_after_terminal(chain: &mut Chain) -> usize {
    let cut = chain
        .rules
        .iter()
        .position(|rule| rule.matches().next().is_none() && is_terminal(rule));
    let Some(cut) = cut else {
        return 0;
    };
    let removed = chain.rules.len() - cut - 1;
    chain.rules.truncate(cut + 1);
    removed
}

fn same_matches(a: &NftRule, b: &NftRule) -> bool {
    let left: Vec<&Match> = a.matches().collect();
    let right: Vec<&Match> = b.matches().collect();
    left.len() == right.len() && left.iter().all(|m| right.contains(m))
}

fn drop_shadowed(chain: &mut Chain) -> usize {
    let mut kept: Vec<NftRule> = Vec::with_capacity(chain.rules.len());
    let mut removed = 0;
    for rule in chain.rules.drain(..) {
        let shadowed = kept
            .iter()
            .any(|earlier| is_terminal(earlier) && same_matches(earlier, &rule));
        if shadowed {
            removed += 1;
        } else {
            kept.push(rule);
        }
    }
    chain.rules = kept;
    removed
}

fn merge_adjacent(chain: &mut Chain) -> usize {
    let mut merged = 0;
    let mut out: Vec<NftRule> = Vec::with_capacity(chain.rules.len());
    for rule in chain.rules.drain(..) {
        if let Some(last) = out.last_mut() {
            if let Some(combined) = merge(last, &rule) {
                *last = combined;
                merged += 1;
                continue;
            }
        }
        out.push(rule);
    }
    chain.rules = out;
    merged
}

/// Keys whose values can be listed in an anonymous set.
fn settable(key: MatchKey) -> bool {
    matches!(
        key,
        MatchKey::IifName
            | MatchKey::OifName
            | MatchKey::L4Proto
            | MatchKey::IpSaddr
            | MatchKey::IpDaddr
            | MatchKey::Ip6Saddr
            | MatchKey::Ip6Daddr
            | MatchKey::Sport(_)
            | MatchKey::Dport(_)
            | MatchKey::IcmpType
            | MatchKey::Icmpv6Type
    )
}

fn listed(value: &MatchValue) -> Option<&[Value]> {
    match value {
        MatchValue::One(value) => Some(std::slice::from_ref(value)),
        MatchValue::Set(values) => Some(values),
        MatchValue::Named(_) => None,
    }
}

fn merge(a: &NftRule, b: &NftRule) -> Option<NftRule> {
    if a.exprs.len() != b.exprs.len() || a.statements() != b.statements() {
        return None;
    }
    let mut differing = None;
    for (idx, (left, right)) in a.exprs.iter().zip(&b.exprs).enumerate() {
        match (left, right) {
            (Expr::Match(l), Expr::Match(r)) if l == r => {}
            (Expr::Match(l), Expr::Match(r)) if l.key == r.key => {
                if differing.is_some() {
                    return None;
                }
                differing = Some((idx, l, r));
            }
            (left, right) if left == right => {}
            _ => return None,
        }
    }
    let (idx, left, right) = differing?;
    if left.negate || right.negate || !settable(left.key) {
        return None;
    }
    let mut values = listed(&left.value)?.to_vec();
    for value in listed(&right.value)? {
        if values.iter().any(|known| intersects(known, value)) {
            return None;
        }
        values.push(value.clone());
    }

    let mut exprs = a.exprs.clone();
    exprs[idx] = Expr::Match(Match::new(left.key, MatchValue::Set(values)));
    let mut origins = a.origins.clone();
    origins.extend(b.origins.iter().cloned());
    let labels: Vec<&str> = if origins.is_empty() {
        a.comment.iter().chain(&b.comment).map(String::as_str).collect()
    } else {
        origins.iter().map(|origin| origin.label.as_str()).collect()
    };
    Some(NftRule {
        exprs,
        comment: (!labels.is_empty()).then(|| comment(&labels.join(", "))),
        origins,
    })
}

/// Whether two set elements share a point; an interval set rejects such
/// pairs.
fn intersects(a: &Value, b: &Value) -> bool {
    match (bounds(a), bounds(b)) {
        (Some((a0, a1)), Some((b0, b1))) => a0 <= b1 && b0 <= a1,
        _ => a == b,
    }
}

/// Numeric span of an address or port element.
fn bounds(value: &Value) -> Option<(u128, u128)> {
    let addr = |ip: std::net::IpAddr| match ip {
        std::net::IpAddr::V4(v4) => u128::from(u32::from(v4)),
        std::net::IpAddr::V6(v6) => u128::from(v6),
    };
    match value {
        Value::Net(net) => Some((addr(net.network()), addr(net.broadcast()))),
        Value::AddrRange(start, end) => Some((addr(*start), addr(*end))),
        Value::Port(port) => Some((u128::from(*port), u128::from(*port))),
        Value::PortRange(start, end) => Some((u128::from(*start), u128::from(*end))),
        Value::Symbol(_) | Value::Name(_) => None,
    }
}
