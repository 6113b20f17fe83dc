//! Packet evaluator for the ruleset IR.
//!
//! Walks the filter base chains of one hook the way the kernel does
//! (jump/goto/return, base chain policy) for a single packet that opens a
//! new connection. NAT chains are not evaluated.

use std::net::IpAddr;

use serde::Serialize;
use thiserror::Error;

use super::{
    Chain, ChainType, Expr, Hook, Match, MatchKey, MatchValue, Origin, Policy, Table, Transport,
    Value, Verdict,
};

/// Jump depth the kernel allows before rejecting a ruleset.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("jump to unknown chain '{0}'")]
    UnknownChain(String),
    #[error("reference to unknown set '{0}'")]
    UnknownSet(String),
    #[error("chain nesting deeper than {MAX_DEPTH}")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Drop,
    Reject,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Drop => "drop",
            Decision::Reject => "reject",
        }
    }
}

/// A packet as the kernel sees it at a filter hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftPacket {
    pub hook: Hook,
    pub iif: Option<String>,
    pub oif: Option<String>,
    pub l4proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub sport: Option<u16>,
    pub dport: Option<u16>,
    /// nft ICMP/ICMPv6 type name (`echo-request`).
    pub icmp_type: Option<String>,
    /// Destination is an address of this host (`fib daddr type local`).
    pub dst_local: bool,
}

/// Where and how a packet was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub decision: Decision,
    pub chain: String,
    /// Deciding rule position, `None` for a base chain policy.
    pub rule: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<Origin>,
}

enum Flow {
    /// Fell through, carrying the last rule that returned the packet.
    Continue(Option<Outcome>),
    Final(Outcome),
}

/// Decide `packet` against every filter base chain on its hook, lowest
/// priority first. A hook without base chains accepts.
pub fn evaluate(table: &Table, packet: &NftPacket) -> Result<Outcome, EvalError> {
    let mut bases: Vec<(&Chain, i32, Option<Policy>)> = table
        .chains
        .iter()
        .filter_map(|chain| {
            let hook = chain.hook.as_ref()?;
            (hook.kind == ChainType::Filter && hook.hook == packet.hook)
                .then_some((chain, hook.priority, hook.policy))
        })
        .collect();
    bases.sort_by_key(|(_, priority, _)| *priority);

    let mut last = Outcome {
        decision: Decision::Accept,
        chain: String::new(),
        rule: None,
        origins: Vec::new(),
    };
    let eval = Evaluator { table, packet };
    for (chain, _, policy) in bases {
        let outcome = match eval.chain(chain, 0)? {
            Flow::Final(outcome) => outcome,
            Flow::Continue(_) => Outcome {
                decision: match policy {
                    Some(Policy::Drop) => Decision::Drop,
                    _ => Decision::Accept,
                },
                chain: chain.name.clone(),
                rule: None,
                origins: Vec::new(),
            },
        };
        if outcome.decision != Decision::Accept {
            return Ok(outcome);
        }
        last = outcome;
    }
    Ok(last)
}

struct Evaluator<'a> {
    table: &'a Table,
    packet: &'a NftPacket,
}

impl Evaluator<'_> {
    fn chain(&self, chain: &Chain, depth: usize) -> Result<Flow, EvalError> {
        if depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        let mut passed: Option<Outcome> = None;
        for (position, rule) in chain.rules.iter().enumerate() {
            let mut matched = true;
            for m in rule.matches() {
                if !self.matches(m)? {
                    matched = false;
                    break;
                }
            }
            if !matched {
                continue;
            }
            let Some(verdict) = rule.exprs.iter().find_map(|expr| match expr {
                Expr::Verdict(verdict) => Some(verdict),
                _ => None,
            }) else {
                continue;
            };
            let decided = |decision| Outcome {
                decision,
                chain: chain.name.clone(),
                rule: Some(position),
                origins: rule.origins.clone(),
            };
            let unconditional = rule.matches().next().is_none();
            match verdict {
                // A catch-all accept in a base chain passes what an earlier
                // rule returned; that rule decided the packet.
                Verdict::Accept => {
                    let outcome = match passed {
                        Some(returned) if depth == 0 && unconditional => returned,
                        _ => decided(Decision::Accept),
                    };
                    return Ok(Flow::Final(outcome));
                }
                Verdict::Drop => return Ok(Flow::Final(decided(Decision::Drop))),
                Verdict::Reject(_) => return Ok(Flow::Final(decided(Decision::Reject))),
                // A chain's closing catch-all return only falls through.
                Verdict::Return if unconditional && position + 1 == chain.rules.len() => {
                    return Ok(Flow::Continue(passed));
                }
                Verdict::Return => return Ok(Flow::Continue(Some(decided(Decision::Accept)))),
                Verdict::Jump(target) => match self.chain(self.lookup(target)?, depth + 1)? {
                    Flow::Final(outcome) => return Ok(Flow::Final(outcome)),
                    Flow::Continue(returned) => {
                        if returned.is_some() {
                            passed = returned;
                        }
                    }
                },
                Verdict::Goto(target) => {
                    return Ok(match self.chain(self.lookup(target)?, depth + 1)? {
                        Flow::Continue(returned) => Flow::Continue(returned.or(passed)),
                        last => last,
                    });
                }
            }
        }
        Ok(Flow::Continue(passed))
    }

    fn lookup(&self, name: &str) -> Result<&Chain, EvalError> {
        self.table
            .chain(name)
            .ok_or_else(|| EvalError::UnknownChain(name.to_string()))
    }

    fn matches(&self, m: &Match) -> Result<bool, EvalError> {
        let packet = self.packet;
        let v4 = packet.src.is_ipv4();
        // Payload matches carry an implicit protocol dependency that fails
        // regardless of negation.
        let applicable = match m.key {
            MatchKey::IpSaddr | MatchKey::IpDaddr => v4,
            MatchKey::Ip6Saddr | MatchKey::Ip6Daddr => !v4,
            MatchKey::Sport(transport) | MatchKey::Dport(transport) => match transport {
                Transport::Tcp => packet.l4proto == TCP,
                Transport::Udp => packet.l4proto == UDP,
                Transport::Th => packet.sport.is_some() || packet.dport.is_some(),
            },
            MatchKey::IcmpType => packet.l4proto == ICMP,
            MatchKey::Icmpv6Type => packet.l4proto == ICMPV6,
            _ => true,
        };
        if !applicable {
            return Ok(false);
        }

        let field = match m.key {
            MatchKey::IifName => Field::Name(packet.iif.as_deref().unwrap_or_default()),
            MatchKey::OifName => Field::Name(packet.oif.as_deref().unwrap_or_default()),
            MatchKey::NfProto => Field::Symbol(if v4 { "ipv4" } else { "ipv6" }),
            MatchKey::L4Proto => Field::Proto(packet.l4proto),
            MatchKey::IpSaddr | MatchKey::Ip6Saddr => Field::Addr(packet.src),
            MatchKey::IpDaddr | MatchKey::Ip6Daddr => Field::Addr(packet.dst),
            MatchKey::Sport(_) => match packet.sport {
                Some(port) => Field::Port(port),
                None => return Ok(false),
            },
            MatchKey::Dport(_) => match packet.dport {
                Some(port) => Field::Port(port),
                None => return Ok(false),
            },
            MatchKey::IcmpType | MatchKey::Icmpv6Type => match &packet.icmp_type {
                Some(kind) => Field::Symbol(kind),
                None => return Ok(m.negate),
            },
            // Simulated packets open new connections and are never NATed.
            MatchKey::CtState => Field::Flags("new"),
            MatchKey::CtStatus => Field::Flags(""),
            MatchKey::FibDaddrType => Field::Symbol(if packet.dst_local { "local" } else { "unicast" }),
        };

        let hit = match &m.value {
            MatchValue::One(value) => field.hits(value),
            MatchValue::Set(values) => values.iter().any(|value| field.hits(value)),
            MatchValue::Named(name) => {
                let set = self
                    .table
                    .set(name)
                    .ok_or_else(|| EvalError::UnknownSet(name.clone()))?;
                set.elements.iter().any(|value| field.hits(value))
            }
        };
        Ok(hit != m.negate)
    }
}

const ICMP: u8 = 1;
const TCP: u8 = 6;
const UDP: u8 = 17;
const ICMPV6: u8 = 58;

/// Protocol number for an `l4proto` symbol.
pub fn protocol_number(symbol: &str) -> Option<u8> {
    match symbol {
        "icmp" => Some(ICMP),
        "tcp" => Some(TCP),
        "udp" => Some(UDP),
        "ipv6-icmp" | "icmpv6" => Some(ICMPV6),
        other => other.parse().ok(),
    }
}

enum Field<'a> {
    Name(&'a str),
    Symbol(&'a str),
    Proto(u8),
    Addr(IpAddr),
    Port(u16),
    /// Comma separated flags the packet carries.
    Flags(&'a str),
}

impl Field<'_> {
    fn hits(&self, value: &Value) -> bool {
        match (self, value) {
            (Field::Name(name), Value::Name(pattern)) => match pattern.strip_suffix('*') {
                Some(prefix) => name.starts_with(prefix),
                None => *name == pattern.as_str(),
            },
            (Field::Symbol(symbol), Value::Symbol(expected)) => *symbol == expected.as_str(),
            (Field::Proto(number), Value::Symbol(expected)) => {
                protocol_number(expected) == Some(*number)
            }
            (Field::Addr(addr), Value::Net(net)) => net.contains(*addr),
            (Field::Addr(addr), Value::AddrRange(start, end)) => {
                addr.is_ipv4() == start.is_ipv4() && start <= addr && addr <= end
            }
            (Field::Port(port), Value::Port(expected)) => port == expected,
            (Field::Port(port), Value::PortRange(start, end)) => start <= port && port <= end,
            (Field::Flags(flags), Value::Symbol(expected)) => expected
                .split(',')
                .any(|flag| flags.split(',').any(|have| have == flag)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, Decision, NftPacket};
    use crate::nft::parse::parse;
    use crate::nft::Hook;

    const SCRIPT: &str = "table inet t {
\tset admins_v4 {
\t\ttype ipv4_addr
\t\tflags interval
\t\tauto-merge
\t\telements = { 192.168.1.0/24 }
\t}

\tchain input {
\t\ttype filter hook input priority 0; policy drop;
\t\tct state established,related accept
\t\tjump filter_in
\t\taccept
\t}

\tchain filter_in {
\t\tiifname \"em0\" goto in_wan
\t\tiifname \"em1\" goto in_lan
\t\tdrop
\t}

\tchain in_wan {
\t\tmeta l4proto tcp tcp dport 22 return
\t\tdrop
\t}

\tchain in_lan {
\t\tip saddr @admins_v4 return
\t\treject
\t}
}
";

    fn packet(iif: &str, src: &str, dport: u16) -> NftPacket {
        NftPacket {
            hook: Hook::Input,
            iif: Some(iif.to_string()),
            oif: None,
            l4proto: 6,
            src: src.parse().expect("ip"),
            dst: "192.168.1.1".parse().expect("ip"),
            sport: Some(40000),
            dport: Some(dport),
            icmp_type: None,
            dst_local: true,
        }
    }

    #[test]
    fn goto_and_return_follow_kernel_semantics() {
        let table = parse(SCRIPT).expect("parse").table;

        let ssh = evaluate(&table, &packet("em0", "203.0.113.9", 22)).expect("eval");
        assert_eq!(ssh.decision, Decision::Accept);
        assert_eq!((ssh.chain.as_str(), ssh.rule), ("in_wan", Some(0)));

        let web = evaluate(&table, &packet("em0", "203.0.113.9", 80)).expect("eval");
        assert_eq!(web.decision, Decision::Drop);
        assert_eq!((web.chain.as_str(), web.rule), ("in_wan", Some(1)));

        let admin = evaluate(&table, &packet("em1", "192.168.1.20", 80)).expect("eval");
        assert_eq!(admin.decision, Decision::Accept);
        assert_eq!((admin.chain.as_str(), admin.rule), ("in_lan", Some(0)));

        let other = evaluate(&table, &packet("em1", "10.9.9.9", 80)).expect("eval");
        assert_eq!(other.decision, Decision::Reject);

        let unknown = evaluate(&table, &packet("em7", "10.9.9.9", 80)).expect("eval");
        assert_eq!((unknown.chain.as_str(), unknown.decision), ("filter_in", Decision::Drop));
    }

    #[test]
    fn address_matches_do_not_apply_across_families() {
        let table = parse(
            "table inet t {\n\tchain output {\n\t\ttype filter hook output priority 0; policy accept;\n\t\tip daddr != 10.0.0.0/8 drop\n\t}\n}\n",
        )
        .expect("parse")
        .table;
        let mut outbound = packet("", "fd00::1", 80);
        outbound.hook = Hook::Output;
        outbound.dst = "fd00::2".parse().expect("ip");
        let outcome = evaluate(&table, &outbound).expect("eval");
        assert_eq!(outcome.decision, Decision::Accept);
        assert_eq!(outcome.rule, None);
    }

    #[test]
    fn forwarded_packets_are_credited_to_the_rule_that_returned_them() {
        let table = parse(
            "table inet t {
\tchain forward {
\t\ttype filter hook forward priority 0; policy drop;
\t\tjump filter_in
\t\tjump filter_out
\t\taccept
\t}

\tchain filter_in {
\t\tiifname \"em0\" goto in_wan
\t\tdrop
\t}

\tchain in_wan {
\t\tmeta l4proto tcp tcp dport 22 return comment \"filter[0] 'Allow SSH'\"
\t\tdrop
\t}

\tchain filter_out {
\t\toifname \"em2\" meta l4proto tcp tcp dport 22 drop
\t\treturn
\t}
}
",
        )
        .expect("parse")
        .table;

        let mut ssh = packet("em0", "203.0.113.9", 22);
        ssh.hook = Hook::Forward;
        ssh.oif = Some("em1".to_string());
        ssh.dst_local = false;
        let outcome = evaluate(&table, &ssh).expect("eval");
        assert_eq!(outcome.decision, Decision::Accept);
        assert_eq!((outcome.chain.as_str(), outcome.rule), ("in_wan", Some(0)));

        ssh.oif = Some("em2".to_string());
        let outcome = evaluate(&table, &ssh).expect("eval");
        assert_eq!(outcome.decision, Decision::Drop);
        assert_eq!((outcome.chain.as_str(), outcome.rule), ("filter_out", Some(0)));

        ssh.dport = Some(80);
        ssh.oif = Some("em1".to_string());
        let outcome = evaluate(&table, &ssh).expect("eval");
        assert_eq!((outcome.chain.as_str(), outcome.rule), ("in_wan", Some(1)));
    }
}
