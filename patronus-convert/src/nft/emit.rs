//! `nft -f` script rendering.

use std::fmt::Write;

use super::{
    BaseHook, Chain, Expr, IpFamily, Match, MatchValue, NatStmt, NftRule, RejectKind, Ruleset,
    Set, Value, Verdict,
};

pub const SHEBANG: &str = "#!/usr/sbin/nft -f";
pub const HEADER: &str = "# Generated by patronus-convert; edits are overwritten.";

/// Render the ruleset as a script that atomically replaces the table:
/// declare it (so the delete cannot fail), delete it, define it again.
pub fn emit(ruleset: &Ruleset) -> String {
    let table = &ruleset.table;
    let head = format!("table {} {}", table.family.as_str(), table.name);
    let mut out = String::new();

    let _ = writeln!(out, "{SHEBANG}");
    let _ = writeln!(out, "{HEADER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "{head}");
    let _ = writeln!(out, "delete {head}");
    let _ = writeln!(out);
    let _ = writeln!(out, "{head} {{");

    let mut first = true;
    for set in &table.sets {
        if !first {
            let _ = writeln!(out);
        }
        first = false;
        write_set(&mut out, set);
    }
    for chain in &table.chains {
        if !first {
            let _ = writeln!(out);
        }
        first = false;
        write_chain(&mut out, chain);
    }

    let _ = writeln!(out, "}}");
    out
}

fn write_set(out: &mut String, set: &Set) {
    let _ = writeln!(out, "\tset {} {{", set.name);
    let _ = writeln!(out, "\t\ttype {}", set.kind.as_str());
    let _ = writeln!(out, "\t\tflags interval");
    let _ = writeln!(out, "\t\tauto-merge");
    if !set.elements.is_empty() {
        let _ = writeln!(out, "\t\telements = {{ {} }}", join_values(&set.elements));
    }
    let _ = writeln!(out, "\t}}");
}

fn write_chain(out: &mut String, chain: &Chain) {
    let _ = writeln!(out, "\tchain {} {{", chain.name);
    if let Some(hook) = &chain.hook {
        let _ = writeln!(out, "\t\t{}", render_hook(hook));
    }
    for rule in &chain.rules {
        let _ = writeln!(out, "\t\t{}", render_rule(rule));
    }
    let _ = writeln!(out, "\t}}");
}

pub fn render_hook(hook: &BaseHook) -> String {
    let kind = match hook.kind {
        super::ChainType::Filter => "filter",
        super::ChainType::Nat => "nat",
    };
    let mut line = format!(
        "type {kind} hook {} priority {};",
        hook.hook.as_str(),
        hook.priority
    );
    if let Some(policy) = hook.policy {
        let policy = match policy {
            super::Policy::Accept => "accept",
            super::Policy::Drop => "drop",
        };
        let _ = write!(line, " policy {policy};");
    }
    line
}

/// One rule on one line, without indentation.
pub fn render_rule(rule: &NftRule) -> String {
    let mut parts: Vec<String> = rule.exprs.iter().map(render_expr).collect();
    if let Some(comment) = &rule.comment {
        parts.push(format!("comment \"{comment}\""));
    }
    parts.join(" ")
}

pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Match(m) => render_match(m),
        Expr::Log { prefix } => format!("log prefix \"{prefix}\""),
        Expr::Nat(nat) => render_nat(nat),
        Expr::Verdict(verdict) => render_verdict(verdict),
    }
}

fn render_match(m: &Match) -> String {
    let op = if m.negate { "!= " } else { "" };
    let value = match &m.value {
        MatchValue::One(value) => value.to_string(),
        MatchValue::Set(values) => format!("{{ {} }}", join_values(values)),
        MatchValue::Named(name) => format!("@{name}"),
    };
    format!("{} {op}{value}", m.key.text())
}

fn render_nat(nat: &NatStmt) -> String {
    match nat {
        NatStmt::Dnat { family, addr, port } => {
            let target = match (family, port) {
                (IpFamily::Ip, Some(port)) => format!("{addr}:{port}"),
                (IpFamily::Ip6, Some(port)) => format!("[{addr}]:{port}"),
                (_, None) => addr.to_string(),
            };
            format!("dnat {} to {target}", family.as_str())
        }
        NatStmt::Snat {
            family,
            addr,
            random,
        } => {
            let flags = if *random { " random" } else { "" };
            format!("snat {} to {addr}{flags}", family.as_str())
        }
        NatStmt::Masquerade { random: true } => "masquerade random".to_string(),
        NatStmt::Masquerade { random: false } => "masquerade".to_string(),
    }
}

fn render_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Accept => "accept".to_string(),
        Verdict::Drop => "drop".to_string(),
        Verdict::Reject(RejectKind::Default) => "reject".to_string(),
        Verdict::Reject(RejectKind::TcpReset) => "reject with tcp reset".to_string(),
        Verdict::Return => "return".to_string(),
        Verdict::Jump(target) => format!("jump {target}"),
        Verdict::Goto(target) => format!("goto {target}"),
    }
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
