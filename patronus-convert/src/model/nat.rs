use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

use super::address::{AddressFamily, AddressSpec, Endpoint, PortRange};
use super::rule::{Construct, Protocol};
use crate::location::SourceLocation;

/// Outbound NAT generation mode (`nat.outbound.mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundMode {
    #[default]
    Automatic,
    Hybrid,
    /// `advanced` in the XML.
    Manual,
    Disabled,
}

impl OutboundMode {
    pub fn parse(raw: &str) -> Option<OutboundMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "automatic" | "" => Some(OutboundMode::Automatic),
            "hybrid" => Some(OutboundMode::Hybrid),
            "advanced" | "manual" => Some(OutboundMode::Manual),
            "disabled" => Some(OutboundMode::Disabled),
            _ => None,
        }
    }

    /// Value written back to `<mode>`.
    pub fn xml_value(self) -> &'static str {
        match self {
            OutboundMode::Automatic => "automatic",
            OutboundMode::Hybrid => "hybrid",
            OutboundMode::Manual => "advanced",
            OutboundMode::Disabled => "disabled",
        }
    }

    pub fn uses_manual_rules(self) -> bool {
        matches!(self, OutboundMode::Hybrid | OutboundMode::Manual)
    }

    pub fn generates_automatic_rules(self) -> bool {
        matches!(self, OutboundMode::Automatic | OutboundMode::Hybrid)
    }
}

/// Filter rule handling of a port forward (`associated-rule-id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterAssociation {
    /// No filter rule; traffic must be passed by an explicit rule.
    None,
    /// `pass`: redirected traffic is accepted without a filter rule.
    Pass,
    /// Linked filter rule id; the filter rule governs.
    Rule(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortForward {
    pub interface: String,
    pub family: AddressFamily,
    pub protocol: Protocol,
    pub source: Endpoint,
    /// External address and ports being redirected.
    pub destination: Endpoint,
    /// Internal address (literal or alias).
    pub target: AddressSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<PortRange>,
    pub no_redirect: bool,
    pub association: FilterAssociation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutboundTranslation {
    /// Masquerade to the outgoing interface address.
    InterfaceAddress,
    Address(IpAddr),
    /// Address pool (alias or subnet); round-robin pools are not translated.
    Pool(String),
}

impl Display for OutboundTranslation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OutboundTranslation::InterfaceAddress => f.write_str("interface address"),
            OutboundTranslation::Address(addr) => write!(f, "{addr}"),
            OutboundTranslation::Pool(name) => write!(f, "pool {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundRule {
    pub interface: String,
    pub family: AddressFamily,
    pub protocol: Protocol,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub translation: OutboundTranslation,
    pub static_port: bool,
    pub no_nat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OneToOne {
    pub interface: String,
    pub external: IpAddr,
    pub internal: IpNetwork,
    pub destination: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NatKind {
    PortForward(PortForward),
    Outbound(OutboundRule),
    OneToOne(OneToOne),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NatMapping {
    /// Position among mappings of the same kind, in config order.
    pub index: usize,
    pub kind: NatKind,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<Construct>,
    pub origin: SourceLocation,
}

impl NatMapping {
    pub fn interface(&self) -> &str {
        match &self.kind {
            NatKind::PortForward(pf) => &pf.interface,
            NatKind::Outbound(out) => &out.interface,
            NatKind::OneToOne(binat) => &binat.interface,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NatKind::PortForward(_) => "rdr",
            NatKind::Outbound(_) => "outbound",
            NatKind::OneToOne(_) => "binat",
        }
    }

    /// Short human label: `rdr[0] "Web server"`.
    pub fn label(&self) -> String {
        match &self.description {
            Some(descr) => format!("{}[{}] \"{descr}\"", self.kind_name(), self.index),
            None => format!("{}[{}]", self.kind_name(), self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OutboundMode;

    #[test]
    fn advanced_is_manual() {
        assert_eq!(OutboundMode::parse("advanced"), Some(OutboundMode::Manual));
        assert_eq!(OutboundMode::Manual.xml_value(), "advanced");
        assert!(OutboundMode::Hybrid.uses_manual_rules());
        assert!(OutboundMode::Hybrid.generates_automatic_rules());
        assert!(!OutboundMode::Disabled.generates_automatic_rules());
        assert_eq!(OutboundMode::parse("sideways"), None);
    }
}
