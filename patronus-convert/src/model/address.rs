//! Address and port specifications shared by filter rules and NAT mappings.

use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

/// What an endpoint's address field refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AddressSpec {
    Any,
    /// Literal host or CIDR network.
    Network(IpNetwork),
    /// Literal inclusive address range `a-b`, both ends in the same family.
    Range { start: IpAddr, end: IpAddr },
    /// Named alias, stored as written.
    Alias(String),
    /// Subnet of a logical interface (`lan`).
    InterfaceNet(String),
    /// Primary address of a logical interface (`lanip`).
    InterfaceAddress(String),
    /// Any address owned by the firewall (`(self)`).
    Firewall,
}

impl AddressSpec {
    /// Parse a literal network, host or range. Returns `None` for names.
    pub fn parse_literal(raw: &str) -> Option<AddressSpec> {
        let raw = raw.trim();
        if let Some((start, end)) = raw.split_once('-') {
            let start: IpAddr = start.trim().parse().ok()?;
            let end: IpAddr = end.trim().parse().ok()?;
            if start.is_ipv4() != end.is_ipv4() || start > end {
                return None;
            }
            return Some(AddressSpec::Range { start, end });
        }
        raw.parse::<IpNetwork>().ok().map(AddressSpec::Network)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, AddressSpec::Any)
    }
}

impl Display for AddressSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Any => f.write_str("any"),
            AddressSpec::Network(net) if net.prefix() == max_prefix(net) => write!(f, "{}", net.ip()),
            AddressSpec::Network(net) => write!(f, "{net}"),
            AddressSpec::Range { start, end } => write!(f, "{start}-{end}"),
            AddressSpec::Alias(name) => f.write_str(name),
            AddressSpec::InterfaceNet(name) => f.write_str(name),
            AddressSpec::InterfaceAddress(name) => write!(f, "{name}ip"),
            AddressSpec::Firewall => f.write_str("(self)"),
        }
    }
}

fn max_prefix(net: &IpNetwork) -> u8 {
    match net {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

/// Inclusive port range; a single port has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Accepts `22`, `1000-2000` and pf's `1000:2000`.
    pub fn parse(raw: &str) -> Option<PortRange> {
        let raw = raw.trim();
        let (start, end) = match raw.split_once(['-', ':']) {
            Some((start, end)) => (start.trim().parse().ok()?, end.trim().parse().ok()?),
            None => {
                let port = raw.parse().ok()?;
                (port, port)
            }
        };
        if start > end {
            return None;
        }
        Some(PortRange { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PortSpec {
    Range(PortRange),
    Alias(String),
}

impl Display for PortSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Range(range) => write!(f, "{range}"),
            PortSpec::Alias(name) => f.write_str(name),
        }
    }
}

/// Source or destination of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub address: AddressSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSpec>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub negate: bool,
}

impl Endpoint {
    pub fn any() -> Self {
        Self {
            address: AddressSpec::Any,
            port: None,
            negate: false,
        }
    }

    /// Matches every packet regardless of address or port.
    pub fn is_unrestricted(&self) -> bool {
        self.address.is_any() && self.port.is_none() && !self.negate
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::any()
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("!")?;
        }
        write!(f, "{}", self.address)?;
        if let Some(port) = &self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Address family a rule applies to (`ipprotocol`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
    Inet46,
}

impl AddressFamily {
    pub fn parse(raw: &str) -> Option<AddressFamily> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inet" | "ipv4" => Some(AddressFamily::Inet),
            "inet6" | "ipv6" => Some(AddressFamily::Inet6),
            "inet46" | "ipv4+ipv6" => Some(AddressFamily::Inet46),
            _ => None,
        }
    }

    pub fn includes_v4(self) -> bool {
        matches!(self, AddressFamily::Inet | AddressFamily::Inet46)
    }

    pub fn includes_v6(self) -> bool {
        matches!(self, AddressFamily::Inet6 | AddressFamily::Inet46)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressFamily::Inet => "inet",
            AddressFamily::Inet6 => "inet6",
            AddressFamily::Inet46 => "inet46",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressSpec, PortRange};

    #[test]
    fn literal_forms() {
        assert!(matches!(
            AddressSpec::parse_literal("192.168.1.0/24"),
            Some(AddressSpec::Network(_))
        ));
        assert!(matches!(
            AddressSpec::parse_literal("10.0.0.5-10.0.0.9"),
            Some(AddressSpec::Range { .. })
        ));
        assert_eq!(AddressSpec::parse_literal("10.0.0.9-10.0.0.5"), None);
        assert_eq!(AddressSpec::parse_literal("10.0.0.1-fd00::1"), None);
        assert_eq!(AddressSpec::parse_literal("web_servers"), None);
    }

    #[test]
    fn host_network_renders_without_prefix() {
        let host = AddressSpec::parse_literal("192.168.1.20").expect("literal");
        assert_eq!(host.to_string(), "192.168.1.20");
    }

    #[test]
    fn port_range_accepts_pf_colon_form() {
        assert_eq!(PortRange::parse("8080:8090"), Some(PortRange { start: 8080, end: 8090 }));
        assert_eq!(PortRange::parse("22"), Some(PortRange::single(22)));
        assert_eq!(PortRange::parse("90-80"), None);
        assert_eq!(PortRange::parse("http"), None);
        assert!(PortRange { start: 10, end: 20 }.overlaps(&PortRange::single(20)));
    }
}
