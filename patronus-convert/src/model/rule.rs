use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use super::address::{AddressFamily, Endpoint};
use crate::location::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Pass,
    Block,
    Reject,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Action> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" => Some(Action::Pass),
            "block" => Some(Action::Block),
            "reject" => Some(Action::Reject),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pass => "pass",
            Action::Block => "block",
            Action::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Any,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Direction> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            "any" | "" => Some(Direction::Any),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Any => "any",
        }
    }

    pub fn covers_in(self) -> bool {
        matches!(self, Direction::In | Direction::Any)
    }

    pub fn covers_out(self) -> bool {
        matches!(self, Direction::Out | Direction::Any)
    }
}

/// IP protocols pf accepts by name, with their IANA numbers.
const NAMED_PROTOCOLS: &[(&str, u8)] = &[
    ("igmp", 2),
    ("ipencap", 4),
    ("ipv6", 41),
    ("gre", 47),
    ("esp", 50),
    ("ah", 51),
    ("ospf", 89),
    ("pim", 103),
    ("l2tp", 115),
    ("carp", 112),
    ("sctp", 132),
    ("pfsync", 240),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    TcpUdp,
    /// ICMP (ICMPv6 on inet6 rules), optionally restricted to named types.
    Icmp { types: Vec<String> },
    Other { name: String, number: u8 },
}

impl Protocol {
    /// Parse the `<protocol>` value. `None` for names pf would reject.
    pub fn parse(raw: &str) -> Option<Protocol> {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "" | "any" => Some(Protocol::Any),
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "tcp/udp" => Some(Protocol::TcpUdp),
            "icmp" | "icmp6" | "ipv6-icmp" => Some(Protocol::Icmp { types: Vec::new() }),
            name => NAMED_PROTOCOLS
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(known, number)| Protocol::Other {
                    name: (*known).to_string(),
                    number: *number,
                }),
        }
    }

    /// Whether ports can be matched for this protocol.
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp | Protocol::TcpUdp)
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Any => f.write_str("any"),
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
            Protocol::TcpUdp => f.write_str("tcp/udp"),
            Protocol::Icmp { types } if types.is_empty() => f.write_str("icmp"),
            Protocol::Icmp { types } => write!(f, "icmp({})", types.join(",")),
            Protocol::Other { name, .. } => f.write_str(name),
        }
    }
}

/// Where a rule lives in pf's evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// OPNsense automation (MVC) rules, evaluated before floating rules.
    Automation,
    Floating,
    /// Interface or interface-group tab.
    Interface,
}

/// A source element with no nftables equivalent, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Construct {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Construct {
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }
}

impl Display for Construct {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={value}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Position among all rules of the model, in evaluation order.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    pub action: Action,
    pub direction: Direction,
    /// Lowercased interface or group names.
    pub interfaces: Vec<String>,
    pub scope: RuleScope,
    pub quick: bool,
    pub family: AddressFamily,
    pub protocol: Protocol,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub log: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `associated-rule-id` linking a filter rule to its port forward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<Construct>,
    pub origin: SourceLocation,
}

impl Rule {
    /// Short human label: `filter[3] "Allow SSH"`.
    pub fn label(&self) -> String {
        match &self.description {
            Some(descr) => format!("filter[{}] \"{descr}\"", self.index),
            None => format!("filter[{}]", self.index),
        }
    }

    pub fn is_floating(&self) -> bool {
        self.scope != RuleScope::Interface
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, Protocol};

    #[test]
    fn protocol_names() {
        assert_eq!(Protocol::parse("TCP/UDP"), Some(Protocol::TcpUdp));
        assert_eq!(
            Protocol::parse("gre"),
            Some(Protocol::Other {
                name: "gre".to_string(),
                number: 47
            })
        );
        assert_eq!(Protocol::parse("ipv6-icmp"), Some(Protocol::Icmp { types: Vec::new() }));
        assert_eq!(Protocol::parse("bogus"), None);
        assert!(Protocol::Udp.has_ports());
        assert!(!Protocol::Any.has_ports());
    }

    #[test]
    fn empty_direction_means_any() {
        assert_eq!(Direction::parse(""), Some(Direction::Any));
        assert!(Direction::Any.covers_in() && Direction::Any.covers_out());
    }
}
