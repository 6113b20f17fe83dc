use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

use super::rule::Construct;
use crate::location::SourceLocation;

/// How an interface obtains an address in one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum AddressMode {
    None,
    /// Interface address with its on-link prefix (`192.168.1.1/24`).
    Static(IpNetwork),
    /// Runtime-assigned (`dhcp`, `pppoe`, `track6`, ...).
    Dynamic(String),
}

impl AddressMode {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, AddressMode::Dynamic(_))
    }
}

/// A logical interface (`wan`, `lan`, `opt1`) bound to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub ipv4: AddressMode,
    pub ipv6: AddressMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Implicit pf rules (`blockpriv`, `blockbogons`) without a translation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<Construct>,
    pub origin: SourceLocation,
}

impl Interface {
    /// On-link networks of the interface with host bits cleared.
    pub fn networks(&self) -> Vec<IpNetwork> {
        [&self.ipv4, &self.ipv6]
            .into_iter()
            .filter_map(|mode| match mode {
                AddressMode::Static(net) => canonical(*net),
                _ => None,
            })
            .collect()
    }

    /// Statically configured interface addresses.
    pub fn addresses(&self) -> Vec<IpAddr> {
        [&self.ipv4, &self.ipv6]
            .into_iter()
            .filter_map(|mode| match mode {
                AddressMode::Static(net) => Some(net.ip()),
                _ => None,
            })
            .collect()
    }

    pub fn has_dynamic_address(&self) -> bool {
        self.ipv4.is_dynamic() || self.ipv6.is_dynamic()
    }

    /// Interfaces with an upstream gateway are treated as egress for
    /// automatic outbound NAT, as pf does.
    pub fn is_gateway_interface(&self) -> bool {
        self.gateway.is_some()
            || matches!(&self.ipv4, AddressMode::Dynamic(kind) if kind != "track6")
    }
}

/// Clear host bits (`192.168.1.1/24` becomes `192.168.1.0/24`).
pub fn canonical(net: IpNetwork) -> Option<IpNetwork> {
    IpNetwork::new(net.network(), net.prefix()).ok()
}

/// Named interface group (`<ifgroups>`); rules on it apply to every member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceGroup {
    pub name: String,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub origin: SourceLocation,
}

#[cfg(test)]
mod tests {
    use super::{canonical, AddressMode, Interface};
    use crate::location::SourceLocation;

    fn lan() -> Interface {
        Interface {
            name: "lan".to_string(),
            device: "em1".to_string(),
            description: None,
            enabled: true,
            ipv4: AddressMode::Static("192.168.1.1/24".parse().expect("net")),
            ipv6: AddressMode::Dynamic("track6".to_string()),
            vlan: None,
            gateway: None,
            unsupported: Vec::new(),
            origin: SourceLocation::default(),
        }
    }

    #[test]
    fn networks_are_masked() {
        let iface = lan();
        assert_eq!(iface.networks(), vec!["192.168.1.0/24".parse().expect("net")]);
        assert_eq!(iface.addresses(), vec!["192.168.1.1".parse::<std::net::IpAddr>().expect("ip")]);
        assert!(iface.has_dynamic_address());
        assert!(!iface.is_gateway_interface());
    }

    #[test]
    fn canonical_keeps_prefix() {
        let net = canonical("fd00:1::1/64".parse().expect("net")).expect("canonical");
        assert_eq!(net.to_string(), "fd00:1::/64");
    }
}
