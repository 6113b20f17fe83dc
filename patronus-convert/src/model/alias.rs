use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

use super::address::PortRange;
use crate::location::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    Host,
    Network,
    Port,
    Url,
    UrlTable,
    UrlPorts,
    UrlTablePorts,
    GeoIp,
    Mac,
    Asn,
    DynIpv6Host,
    Other(String),
}

impl AliasKind {
    pub fn parse(raw: &str) -> AliasKind {
        match raw.trim().to_ascii_lowercase().as_str() {
            "host" => AliasKind::Host,
            "network" => AliasKind::Network,
            "port" => AliasKind::Port,
            "url" => AliasKind::Url,
            "urltable" => AliasKind::UrlTable,
            "url_ports" => AliasKind::UrlPorts,
            "urltable_ports" => AliasKind::UrlTablePorts,
            "geoip" => AliasKind::GeoIp,
            "mac" => AliasKind::Mac,
            "asn" => AliasKind::Asn,
            "dynipv6host" => AliasKind::DynIpv6Host,
            other => AliasKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AliasKind::Host => "host",
            AliasKind::Network => "network",
            AliasKind::Port => "port",
            AliasKind::Url => "url",
            AliasKind::UrlTable => "urltable",
            AliasKind::UrlPorts => "url_ports",
            AliasKind::UrlTablePorts => "urltable_ports",
            AliasKind::GeoIp => "geoip",
            AliasKind::Mac => "mac",
            AliasKind::Asn => "asn",
            AliasKind::DynIpv6Host => "dynipv6host",
            AliasKind::Other(other) => other,
        }
    }

    /// Kinds whose content is known at translation time.
    pub fn is_static(&self) -> bool {
        matches!(self, AliasKind::Host | AliasKind::Network | AliasKind::Port)
    }

    pub fn is_port(&self) -> bool {
        matches!(
            self,
            AliasKind::Port | AliasKind::UrlPorts | AliasKind::UrlTablePorts
        )
    }
}

impl Display for AliasKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AliasEntry {
    Network(IpNetwork),
    Range { start: IpAddr, end: IpAddr },
    Port(PortRange),
    /// Reference to another alias.
    Alias(String),
    /// DNS name resolved by the firewall at runtime.
    Hostname(String),
    /// URL, MAC, ASN, country code; anything only meaningful to a dynamic kind.
    Other(String),
}

impl Display for AliasEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AliasEntry::Network(net) => write!(f, "{net}"),
            AliasEntry::Range { start, end } => write!(f, "{start}-{end}"),
            AliasEntry::Port(range) => write!(f, "{range}"),
            AliasEntry::Alias(name) | AliasEntry::Hostname(name) | AliasEntry::Other(name) => {
                f.write_str(name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub name: String,
    pub kind: AliasKind,
    pub entries: Vec<AliasEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub origin: SourceLocation,
}

impl Alias {
    /// Names of directly nested aliases.
    pub fn nested(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            AliasEntry::Alias(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_hostnames(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry, AliasEntry::Hostname(_)))
    }
}
