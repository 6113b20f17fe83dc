//! In-memory rule model produced by `import` and consumed by `translate`.
//!
//! The model owns every entity of one run. Cross references (rule to alias,
//! rule to interface, group to member) are by name and stay unresolved
//! until translation; `import::refs` guarantees they resolve.

pub mod address;
pub mod alias;
pub mod interface;
pub mod nat;
pub mod rule;

use serde::Serialize;

pub use address::{AddressFamily, AddressSpec, Endpoint, PortRange, PortSpec};
pub use alias::{Alias, AliasEntry, AliasKind};
pub use interface::{AddressMode, Interface, InterfaceGroup};
pub use nat::{
    FilterAssociation, NatKind, NatMapping, OneToOne, OutboundMode, OutboundRule,
    OutboundTranslation, PortForward,
};
pub use rule::{Action, Construct, Direction, Protocol, Rule, RuleScope};

use crate::detect::Platform;
use crate::location::SourceLocation;

/// A construct outside any rule (traffic shaper, limiters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalConstruct {
    pub construct: Construct,
    pub origin: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleModel {
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub interfaces: Vec<Interface>,
    pub groups: Vec<InterfaceGroup>,
    pub aliases: Vec<Alias>,
    /// Filter rules in pf evaluation order (automation, floating, interface).
    pub rules: Vec<Rule>,
    pub nat: Vec<NatMapping>,
    pub outbound_mode: OutboundMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub global_unsupported: Vec<GlobalConstruct>,
}

impl RuleModel {
    pub fn empty(platform: Platform) -> Self {
        Self {
            platform,
            version: None,
            interfaces: Vec::new(),
            groups: Vec::new(),
            aliases: Vec::new(),
            rules: Vec::new(),
            nat: Vec::new(),
            outbound_mode: OutboundMode::default(),
            global_unsupported: Vec::new(),
        }
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|iface| iface.name.eq_ignore_ascii_case(name))
    }

    pub fn group(&self, name: &str) -> Option<&InterfaceGroup> {
        self.groups
            .iter()
            .find(|group| group.name.eq_ignore_ascii_case(name))
    }

    pub fn alias(&self, name: &str) -> Option<&Alias> {
        self.aliases
            .iter()
            .find(|alias| alias.name.eq_ignore_ascii_case(name))
    }

    /// Groups `iface` belongs to, in group definition order.
    pub fn groups_of<'a>(&'a self, iface: &'a str) -> impl Iterator<Item = &'a InterfaceGroup> + 'a {
        self.groups.iter().filter(move |group| {
            group
                .members
                .iter()
                .any(|member| member.eq_ignore_ascii_case(iface))
        })
    }

    /// Enabled filter rules, in evaluation order.
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|rule| !rule.disabled)
    }

    pub fn active_nat(&self) -> impl Iterator<Item = &NatMapping> {
        self.nat.iter().filter(|mapping| !mapping.disabled)
    }

    /// Copy of the model with every source location cleared, for comparing
    /// models built from different documents.
    pub fn strip_locations(&self) -> RuleModel {
        let mut model = self.clone();
        let blank = SourceLocation::default;
        for iface in &mut model.interfaces {
            iface.origin = blank();
        }
        for group in &mut model.groups {
            group.origin = blank();
        }
        for alias in &mut model.aliases {
            alias.origin = blank();
        }
        for rule in &mut model.rules {
            rule.origin = blank();
        }
        for mapping in &mut model.nat {
            mapping.origin = blank();
        }
        for global in &mut model.global_unsupported {
            global.origin = blank();
        }
        model
    }
}
