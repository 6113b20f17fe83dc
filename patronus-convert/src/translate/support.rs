//! Detection of source constructs the ruleset cannot express.
//!
//! Every construct found on an active entity becomes an
//! [`UnsupportedFeatureError`] unless settings waive it by name; a waived
//! construct becomes a [`Note`]. Constructs that make the whole entity
//! untranslatable (an unmapped pseudo interface, a shifted port range)
//! also mark the entity as skipped so the chain builders leave it out.

use std::collections::BTreeSet;
use std::net::IpAddr;

use tracing::debug;

use super::filter::icmp_type_name;
use super::nat::{redirect_port, redirect_target, Target};
use super::Note;
use crate::error::{Issue, UnsupportedFeatureError};
use crate::import::PSEUDO_INTERFACES;
use crate::location::SourceLocation;
use crate::model::{
    AddressFamily, AddressMode, AddressSpec, Endpoint, NatKind, NatMapping, OutboundTranslation,
    PortSpec, Protocol, Rule, RuleModel,
};
use crate::settings::Settings;

/// Entities left out of the ruleset after a waived construct.
#[derive(Debug, Default)]
pub(crate) struct Skipped {
    rules: BTreeSet<usize>,
    nat: BTreeSet<(&'static str, usize)>,
}

impl Skipped {
    pub fn rule(&self, rule: &Rule) -> bool {
        self.rules.contains(&rule.index)
    }

    pub fn nat(&self, mapping: &NatMapping) -> bool {
        self.nat.contains(&(mapping.kind_name(), mapping.index))
    }

    pub fn rule_indexes(&self) -> BTreeSet<usize> {
        self.rules.clone()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Audit {
    pub issues: Vec<Issue>,
    pub notes: Vec<Note>,
    pub skipped: Skipped,
}

/// Whether a construct only drops a rule option or removes the entity.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Effect {
    Ignore,
    Skip,
}

/// A logical name pf accepts without an `<interfaces>` entry.
pub(crate) fn is_pseudo(model: &RuleModel, name: &str) -> bool {
    model.interface(name).is_none()
        && model.group(name).is_none()
        && PSEUDO_INTERFACES.contains(&name.to_ascii_lowercase().as_str())
}

pub(crate) fn audit(model: &RuleModel, settings: &Settings) -> Audit {
    let mut auditor = Auditor {
        model,
        settings,
        out: Audit::default(),
    };
    for global in &model.global_unsupported {
        auditor.report(
            &global.construct.name,
            global.construct.value.as_deref(),
            "configuration",
            &global.origin,
            Effect::Ignore,
            None,
        );
    }
    for iface in &model.interfaces {
        let subject = format!("interface {}", iface.name);
        for construct in &iface.unsupported {
            auditor.report(
                &construct.name,
                construct.value.as_deref(),
                &subject,
                &iface.origin,
                Effect::Ignore,
                None,
            );
        }
    }
    for rule in model.active_rules() {
        auditor.rule(rule);
    }
    for mapping in model.active_nat() {
        auditor.mapping(mapping);
    }
    debug!(
        issues = auditor.out.issues.len(),
        waived = auditor.out.notes.len(),
        "audited unsupported constructs"
    );
    auditor.out
}

struct Auditor<'a> {
    model: &'a RuleModel,
    settings: &'a Settings,
    out: Audit,
}

/// Entity key used to record a skip.
enum Entity {
    Rule(usize),
    Nat(&'static str, usize),
}

impl Auditor<'_> {
    fn report(
        &mut self,
        construct: &str,
        value: Option<&str>,
        subject: &str,
        location: &SourceLocation,
        effect: Effect,
        entity: Option<Entity>,
    ) {
        if !self.settings.is_waived(construct) {
            self.out.issues.push(Issue::Unsupported(UnsupportedFeatureError {
                construct: construct.to_string(),
                subject: subject.to_string(),
                location: location.clone(),
            }));
            return;
        }
        let shown = match value {
            Some(value) => format!("{construct}={value}"),
            None => construct.to_string(),
        };
        let message = match effect {
            Effect::Ignore => format!("waived {shown}; translated without it"),
            Effect::Skip => format!("waived {shown}; not translated"),
        };
        self.out.notes.push(Note {
            subject: subject.to_string(),
            location: Some(location.clone()),
            message,
        });
        if effect == Effect::Skip {
            match entity {
                Some(Entity::Rule(index)) => {
                    self.out.skipped.rules.insert(index);
                }
                Some(Entity::Nat(kind, index)) => {
                    self.out.skipped.nat.insert((kind, index));
                }
                None => {}
            }
        }
    }

    fn rule(&mut self, rule: &Rule) {
        let subject = rule.label();
        let mut found: Vec<(String, Option<String>, Effect)> = rule
            .unsupported
            .iter()
            .map(|construct| (construct.name.clone(), construct.value.clone(), Effect::Ignore))
            .collect();
        if rule.is_floating() && !rule.quick {
            found.push(("non_quick_floating".to_string(), None, Effect::Skip));
        }
        for name in &rule.interfaces {
            found.extend(self.interface_constructs(name));
        }
        found.extend(self.endpoint_constructs(&rule.source, false, rule.family));
        found.extend(self.endpoint_constructs(&rule.destination, true, rule.family));
        if let Protocol::Icmp { types } = &rule.protocol {
            for kind in types {
                let v4_ok = !rule.family.includes_v4() || icmp_type_name(kind, false).is_some();
                let v6_ok = !rule.family.includes_v6() || icmp_type_name(kind, true).is_some();
                if !(v4_ok && v6_ok) {
                    found.push(("icmp_type".to_string(), Some(kind.clone()), Effect::Skip));
                }
            }
        }
        self.emit_found(found, &subject, &rule.origin, || Entity::Rule(rule.index));
    }

    fn mapping(&mut self, mapping: &NatMapping) {
        let subject = mapping.label();
        let mut found: Vec<(String, Option<String>, Effect)> = mapping
            .unsupported
            .iter()
            .map(|construct| (construct.name.clone(), construct.value.clone(), Effect::Ignore))
            .collect();
        found.extend(self.interface_constructs(mapping.interface()));
        match &mapping.kind {
            NatKind::PortForward(pf) => {
                found.extend(self.endpoint_constructs(&pf.source, false, pf.family));
                found.extend(self.endpoint_constructs(&pf.destination, true, pf.family));
                if !pf.no_redirect {
                    match redirect_target(pf) {
                        Target::Host(_) => {}
                        Target::Alias(name) => {
                            found.push(("alias_target".to_string(), Some(name), Effect::Skip))
                        }
                        Target::Pool(shown) => {
                            found.push(("address_pool".to_string(), Some(shown), Effect::Skip))
                        }
                    }
                    if redirect_port(pf).is_none() {
                        found.push(("port_range_shift".to_string(), None, Effect::Skip));
                    }
                }
            }
            NatKind::Outbound(out) => {
                found.extend(self.endpoint_constructs(&out.source, false, out.family));
                found.extend(self.endpoint_constructs(&out.destination, true, out.family));
                if let OutboundTranslation::Pool(name) = &out.translation {
                    if !out.no_nat {
                        found.push(("address_pool".to_string(), Some(name.clone()), Effect::Skip));
                    }
                }
            }
            NatKind::OneToOne(binat) => {
                let family = match binat.external {
                    IpAddr::V4(_) => AddressFamily::Inet,
                    IpAddr::V6(_) => AddressFamily::Inet6,
                };
                found.extend(self.endpoint_constructs(&binat.destination, false, family));
                if !crate::nft::is_host(&binat.internal) {
                    found.push((
                        "subnet_binat".to_string(),
                        Some(binat.internal.to_string()),
                        Effect::Skip,
                    ));
                }
            }
        }
        let key = (mapping.kind_name(), mapping.index);
        self.emit_found(found, &subject, &mapping.origin, || Entity::Nat(key.0, key.1));
    }

    fn emit_found(
        &mut self,
        found: Vec<(String, Option<String>, Effect)>,
        subject: &str,
        location: &SourceLocation,
        entity: impl Fn() -> Entity,
    ) {
        let mut seen = BTreeSet::new();
        for (name, value, effect) in found {
            if !seen.insert((name.clone(), value.clone())) {
                continue;
            }
            self.report(&name, value.as_deref(), subject, location, effect, Some(entity()));
        }
    }

    /// A pseudo interface needs a device pattern to be matched at all.
    fn interface_constructs(&self, name: &str) -> Vec<(String, Option<String>, Effect)> {
        let unmapped = is_pseudo(self.model, name)
            && !self
                .settings
                .pseudo_interfaces
                .contains_key(&name.to_ascii_lowercase());
        if unmapped {
            vec![("pseudo_interface".to_string(), Some(name.to_string()), Effect::Skip)]
        } else {
            Vec::new()
        }
    }

    fn endpoint_constructs(
        &self,
        endpoint: &Endpoint,
        destination: bool,
        family: AddressFamily,
    ) -> Vec<(String, Option<String>, Effect)> {
        let mut out = Vec::new();
        let mut aliases = Vec::new();
        match &endpoint.address {
            AddressSpec::Alias(name) => aliases.push(name.as_str()),
            AddressSpec::InterfaceNet(name) => {
                if is_pseudo(self.model, name) {
                    out.push(("pseudo_interface".to_string(), Some(name.clone()), Effect::Skip));
                }
                let members = match self.model.group(name) {
                    Some(group) => group.members.clone(),
                    None => vec![name.clone()],
                };
                for member in members {
                    if let Some(iface) = self.model.interface(&member) {
                        if dynamic_in(&iface.ipv4, &iface.ipv6, family) {
                            out.push(("dynamic_address".to_string(), Some(member), Effect::Ignore));
                        }
                    }
                }
            }
            AddressSpec::InterfaceAddress(name) => {
                if is_pseudo(self.model, name) {
                    out.push(("pseudo_interface".to_string(), Some(name.clone()), Effect::Skip));
                }
                let approximated = destination && self.settings.approximate_dynamic_addresses;
                if let Some(iface) = self.model.interface(name) {
                    if !approximated && dynamic_in(&iface.ipv4, &iface.ipv6, family) {
                        out.push(("dynamic_address".to_string(), Some(name.clone()), Effect::Ignore));
                    }
                }
            }
            AddressSpec::Firewall if !destination => {
                for iface in &self.model.interfaces {
                    if dynamic_in(&iface.ipv4, &iface.ipv6, family) {
                        out.push((
                            "dynamic_address".to_string(),
                            Some(iface.name.clone()),
                            Effect::Ignore,
                        ));
                    }
                }
            }
            _ => {}
        }
        if let Some(PortSpec::Alias(name)) = &endpoint.port {
            aliases.push(name.as_str());
        }
        for name in aliases {
            for alias in self.closure(name) {
                if !alias.kind.is_static() {
                    out.push((
                        format!("{}_alias", alias.kind.as_str()),
                        Some(alias.name.clone()),
                        Effect::Ignore,
                    ));
                }
                if alias.has_hostnames() {
                    out.push(("hostname_alias".to_string(), Some(alias.name.clone()), Effect::Ignore));
                }
            }
        }
        out
    }

    /// An alias and every alias nested below it.
    fn closure(&self, name: &str) -> Vec<&crate::model::Alias> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_ascii_lowercase()];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(alias) = self.model.alias(&next) {
                stack.extend(alias.nested().map(str::to_ascii_lowercase));
                out.push(alias);
            }
        }
        out
    }
}

fn dynamic_in(ipv4: &AddressMode, ipv6: &AddressMode, family: AddressFamily) -> bool {
    (family.includes_v4() && ipv4.is_dynamic()) || (family.includes_v6() && ipv6.is_dynamic())
}
