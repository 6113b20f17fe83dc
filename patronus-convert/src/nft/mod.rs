//! nftables ruleset IR, its text/JSON emitters, the text reader and a
//! packet evaluator.
//!
//! The IR covers exactly the subset the translator produces: one table
//! with named interval sets, base and regular chains, and rules made of
//! match expressions followed by statements and a verdict.

pub mod apply;
pub mod emit;
pub mod eval;
pub mod json;
pub mod parse;

use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::location::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Inet,
    Ip,
    Ip6,
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Inet => "inet",
            Family::Ip => "ip",
            Family::Ip6 => "ip6",
        }
    }

    pub fn parse(raw: &str) -> Option<Family> {
        match raw {
            "inet" => Some(Family::Inet),
            "ip" => Some(Family::Ip),
            "ip6" => Some(Family::Ip6),
            _ => None,
        }
    }
}

/// A complete ruleset: one table, replaced atomically on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ruleset {
    pub table: Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub family: Family,
    pub name: String,
    pub sets: Vec<Set>,
    pub chains: Vec<Chain>,
}

impl Table {
    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|chain| chain.name == name)
    }

    pub fn set(&self, name: &str) -> Option<&Set> {
        self.sets.iter().find(|set| set.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    Ipv4Addr,
    Ipv6Addr,
    InetService,
}

impl SetType {
    pub fn as_str(self) -> &'static str {
        match self {
            SetType::Ipv4Addr => "ipv4_addr",
            SetType::Ipv6Addr => "ipv6_addr",
            SetType::InetService => "inet_service",
        }
    }

    pub fn parse(raw: &str) -> Option<SetType> {
        match raw {
            "ipv4_addr" => Some(SetType::Ipv4Addr),
            "ipv6_addr" => Some(SetType::Ipv6Addr),
            "inet_service" => Some(SetType::InetService),
            _ => None,
        }
    }
}

/// Named set; always `flags interval` with `auto-merge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Set {
    pub name: String,
    pub kind: SetType,
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Filter,
    Nat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::Prerouting => "prerouting",
            Hook::Input => "input",
            Hook::Forward => "forward",
            Hook::Output => "output",
            Hook::Postrouting => "postrouting",
        }
    }

    pub fn parse(raw: &str) -> Option<Hook> {
        match raw {
            "prerouting" => Some(Hook::Prerouting),
            "input" => Some(Hook::Input),
            "forward" => Some(Hook::Forward),
            "output" => Some(Hook::Output),
            "postrouting" => Some(Hook::Postrouting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Accept,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaseHook {
    pub kind: ChainType,
    pub hook: Hook,
    pub priority: i32,
    /// Only filter chains carry a policy.
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<BaseHook>,
    pub rules: Vec<NftRule>,
}

impl Chain {
    pub fn regular(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hook: None,
            rules: Vec::new(),
        }
    }
}

/// What produced an emitted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    /// `filter[3] "Allow SSH"`, `rdr[0]`, `default inbound policy`.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Origin {
    pub fn new(label: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self {
            label: label.into(),
            location,
        }
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.label),
            None => f.write_str(&self.label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NftRule {
    pub exprs: Vec<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Source rules this nft rule stands for; empty for rules read back
    /// from a script.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<Origin>,
}

impl NftRule {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self {
            exprs,
            comment: None,
            origins: Vec::new(),
        }
    }

    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.exprs.iter().filter_map(|expr| match expr {
            Expr::Match(m) => Some(m),
            _ => None,
        })
    }

    /// Final verdict, when the rule has one.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self.exprs.last() {
            Some(Expr::Verdict(verdict)) => Some(verdict),
            _ => None,
        }
    }

    /// Everything after the matches: log, NAT and verdict statements.
    pub fn statements(&self) -> Vec<&Expr> {
        self.exprs
            .iter()
            .filter(|expr| !matches!(expr, Expr::Match(_)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    Match(Match),
    Log { prefix: String },
    Nat(NatStmt),
    Verdict(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
    /// Any transport header (`th`), used for tcp/udp rules.
    Th,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Th => "th",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    IifName,
    OifName,
    NfProto,
    L4Proto,
    IpSaddr,
    IpDaddr,
    Ip6Saddr,
    Ip6Daddr,
    Sport(Transport),
    Dport(Transport),
    IcmpType,
    Icmpv6Type,
    CtState,
    CtStatus,
    /// `fib daddr type`
    FibDaddrType,
}

impl MatchKey {
    /// Text form of the key as it appears in a script.
    pub fn text(self) -> String {
        match self {
            MatchKey::IifName => "iifname".to_string(),
            MatchKey::OifName => "oifname".to_string(),
            MatchKey::NfProto => "meta nfproto".to_string(),
            MatchKey::L4Proto => "meta l4proto".to_string(),
            MatchKey::IpSaddr => "ip saddr".to_string(),
            MatchKey::IpDaddr => "ip daddr".to_string(),
            MatchKey::Ip6Saddr => "ip6 saddr".to_string(),
            MatchKey::Ip6Daddr => "ip6 daddr".to_string(),
            MatchKey::Sport(transport) => format!("{} sport", transport.as_str()),
            MatchKey::Dport(transport) => format!("{} dport", transport.as_str()),
            MatchKey::IcmpType => "icmp type".to_string(),
            MatchKey::Icmpv6Type => "icmpv6 type".to_string(),
            MatchKey::CtState => "ct state".to_string(),
            MatchKey::CtStatus => "ct status".to_string(),
            MatchKey::FibDaddrType => "fib daddr type".to_string(),
        }
    }

    pub fn is_address(self) -> bool {
        matches!(
            self,
            MatchKey::IpSaddr | MatchKey::IpDaddr | MatchKey::Ip6Saddr | MatchKey::Ip6Daddr
        )
    }

    pub fn is_port(self) -> bool {
        matches!(self, MatchKey::Sport(_) | MatchKey::Dport(_))
    }
}

/// One element of a match right-hand side or a set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Symbolic constant: protocol, ICMP type, ct state, fib type.
    Symbol(String),
    /// Interface name, written quoted; may end in `*`.
    Name(String),
    Net(IpNetwork),
    AddrRange(IpAddr, IpAddr),
    Port(u16),
    PortRange(u16, u16),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(symbol) => f.write_str(symbol),
            Value::Name(name) => write!(f, "\"{name}\""),
            Value::Net(net) if is_host(net) => write!(f, "{}", net.ip()),
            Value::Net(net) => write!(f, "{net}"),
            Value::AddrRange(start, end) => write!(f, "{start}-{end}"),
            Value::Port(port) => write!(f, "{port}"),
            Value::PortRange(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

pub(crate) fn is_host(net: &IpNetwork) -> bool {
    match net {
        IpNetwork::V4(v4) => v4.prefix() == 32,
        IpNetwork::V6(v6) => v6.prefix() == 128,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MatchValue {
    One(Value),
    /// Anonymous set `{ a, b }`; never empty.
    Set(Vec<Value>),
    /// Named set reference `@name`.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub key: MatchKey,
    pub negate: bool,
    pub value: MatchValue,
}

impl Match {
    pub fn new(key: MatchKey, value: MatchValue) -> Self {
        Self {
            key,
            negate: false,
            value,
        }
    }

    pub fn one(key: MatchKey, value: Value) -> Self {
        Self::new(key, MatchValue::One(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ip,
    Ip6,
}

impl IpFamily {
    pub fn of(addr: &IpAddr) -> Self {
        if addr.is_ipv4() {
            IpFamily::Ip
        } else {
            IpFamily::Ip6
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IpFamily::Ip => "ip",
            IpFamily::Ip6 => "ip6",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NatStmt {
    Dnat {
        family: IpFamily,
        addr: IpAddr,
        port: Option<u16>,
    },
    Snat {
        family: IpFamily,
        addr: IpAddr,
        random: bool,
    },
    Masquerade {
        random: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    Default,
    TcpReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Drop,
    Reject(RejectKind),
    Return,
    Jump(String),
    Goto(String),
}

impl Verdict {
    /// Ends evaluation of the whole hook (not just the chain).
    pub fn is_final(&self) -> bool {
        matches!(self, Verdict::Accept | Verdict::Drop | Verdict::Reject(_))
    }
}
