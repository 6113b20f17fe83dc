//! Referential integrity of an imported model.
//!
//! Every alias and interface name used anywhere must resolve, and nested
//! aliases must not form cycles. Problems are collected across the whole
//! model and returned together.

use std::collections::{BTreeMap, BTreeSet};

use super::PSEUDO_INTERFACES;
use crate::error::{
    Issue, ParseError, ReferenceError, ReferenceKind, UnresolvedReference,
};
use crate::location::SourceLocation;
use crate::model::{
    AddressSpec, Endpoint, NatKind, OutboundTranslation, PortSpec, RuleModel,
};

/// Check all references of `model`; empty when everything resolves.
pub fn check_references(model: &RuleModel) -> Vec<Issue> {
    let mut walk = Walk {
        model,
        unresolved: Vec::new(),
        misuse: Vec::new(),
    };

    for group in &model.groups {
        for member in &group.members {
            if model.interface(member).is_none() {
                walk.missing(ReferenceKind::Interface, member, &group.origin);
            }
        }
    }

    for alias in &model.aliases {
        for nested in alias.nested() {
            match model.alias(nested) {
                None => walk.missing(ReferenceKind::Alias, nested, &alias.origin),
                Some(inner) if inner.kind.is_port() != alias.kind.is_port() => {
                    walk.misuse.push(ParseError::new(
                        alias.origin.clone(),
                        format!(
                            "alias '{}' ({}) nests alias '{}' of kind {}",
                            alias.name, alias.kind, inner.name, inner.kind
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    for rule in &model.rules {
        for iface in &rule.interfaces {
            walk.interface_or_group(iface, &rule.origin);
        }
        walk.endpoint(&rule.source, &rule.origin);
        walk.endpoint(&rule.destination, &rule.origin);
    }

    for mapping in &model.nat {
        walk.interface(mapping.interface(), &mapping.origin);
        match &mapping.kind {
            NatKind::PortForward(rdr) => {
                walk.endpoint(&rdr.source, &mapping.origin);
                walk.endpoint(&rdr.destination, &mapping.origin);
                walk.address(&rdr.target, &mapping.origin);
            }
            NatKind::Outbound(out) => {
                walk.endpoint(&out.source, &mapping.origin);
                walk.endpoint(&out.destination, &mapping.origin);
                if let OutboundTranslation::Pool(name) = &out.translation {
                    if !name.contains('/') {
                        walk.address_alias(name, &mapping.origin);
                    }
                }
            }
            NatKind::OneToOne(binat) => walk.endpoint(&binat.destination, &mapping.origin),
        }
    }

    let cycles = alias_cycles(model);
    let mut issues: Vec<Issue> = walk.misuse.into_iter().map(Issue::Parse).collect();
    if !walk.unresolved.is_empty() || !cycles.is_empty() {
        issues.push(Issue::Reference(ReferenceError {
            unresolved: walk.unresolved,
            cycles,
        }));
    }
    issues
}

struct Walk<'a> {
    model: &'a RuleModel,
    unresolved: Vec<UnresolvedReference>,
    misuse: Vec<ParseError>,
}

impl Walk<'_> {
    fn missing(&mut self, kind: ReferenceKind, name: &str, location: &SourceLocation) {
        self.unresolved.push(UnresolvedReference {
            kind,
            name: name.to_string(),
            location: location.clone(),
        });
    }

    fn interface(&mut self, name: &str, location: &SourceLocation) {
        if self.model.interface(name).is_none() && !is_pseudo(name) {
            self.missing(ReferenceKind::Interface, name, location);
        }
    }

    fn interface_or_group(&mut self, name: &str, location: &SourceLocation) {
        if self.model.group(name).is_none() {
            self.interface(name, location);
        }
    }

    fn endpoint(&mut self, endpoint: &Endpoint, location: &SourceLocation) {
        self.address(&endpoint.address, location);
        if let Some(PortSpec::Alias(name)) = &endpoint.port {
            match self.model.alias(name) {
                None => self.missing(ReferenceKind::Alias, name, location),
                Some(alias) if !alias.kind.is_port() => self.misuse.push(ParseError::new(
                    location.clone(),
                    format!("alias '{name}' of kind {} used as a port", alias.kind),
                )),
                Some(_) => {}
            }
        }
    }

    fn address(&mut self, spec: &AddressSpec, location: &SourceLocation) {
        match spec {
            AddressSpec::Alias(name) => self.address_alias(name, location),
            AddressSpec::InterfaceNet(name) => self.interface_or_group(name, location),
            AddressSpec::InterfaceAddress(name) => self.interface(name, location),
            AddressSpec::Any
            | AddressSpec::Network(_)
            | AddressSpec::Range { .. }
            | AddressSpec::Firewall => {}
        }
    }

    fn address_alias(&mut self, name: &str, location: &SourceLocation) {
        match self.model.alias(name) {
            None => self.missing(ReferenceKind::Alias, name, location),
            Some(alias) if alias.kind.is_port() => self.misuse.push(ParseError::new(
                location.clone(),
                format!("port alias '{name}' used as an address"),
            )),
            Some(_) => {}
        }
    }
}

fn is_pseudo(name: &str) -> bool {
    PSEUDO_INTERFACES
        .iter()
        .any(|pseudo| pseudo.eq_ignore_ascii_case(name))
}

/// Each distinct alias cycle, rotated to start at its smallest name and
/// closed by repeating it.
fn alias_cycles(model: &RuleModel) -> Vec<Vec<String>> {
    let graph: BTreeMap<String, Vec<String>> = model
        .aliases
        .iter()
        .map(|alias| {
            let nested = alias
                .nested()
                .filter(|name| model.alias(name).is_some())
                .map(str::to_ascii_lowercase)
                .collect();
            (alias.name.to_ascii_lowercase(), nested)
        })
        .collect();

    let mut found = BTreeSet::new();
    for start in graph.keys() {
        let mut stack = vec![start.clone()];
        visit(&graph, &mut stack, &mut found);
    }

    let display = |lower: &str| {
        model
            .alias(lower)
            .map_or_else(|| lower.to_string(), |alias| alias.name.clone())
    };
    found
        .into_iter()
        .map(|cycle: Vec<String>| {
            let mut named: Vec<String> = cycle.iter().map(|name| display(name)).collect();
            named.push(display(&cycle[0]));
            named
        })
        .collect()
}

fn visit(
    graph: &BTreeMap<String, Vec<String>>,
    stack: &mut Vec<String>,
    found: &mut BTreeSet<Vec<String>>,
) {
    let Some(current) = stack.last().cloned() else {
        return;
    };
    for next in graph.get(&current).into_iter().flatten() {
        if let Some(pos) = stack.iter().position(|name| name == next) {
            found.insert(rotate(&stack[pos..]));
            continue;
        }
        stack.push(next.clone());
        visit(graph, stack, found);
        stack.pop();
    }
}

fn rotate(cycle: &[String]) -> Vec<String> {
    let min = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map_or(0, |(idx, _)| idx);
    cycle[min..].iter().chain(&cycle[..min]).cloned().collect()
}

#[cfg(test)]
mod tests {
    use crate::error::{ConvertError, Issue, IssueCategory, ReferenceKind};
    use crate::import::import_bytes;

    fn reference_error(xml: &[u8]) -> crate::error::ReferenceError {
        let err = import_bytes(xml).expect_err("must fail");
        assert_eq!(err.category(), IssueCategory::Reference);
        let ConvertError::Rejected(issues) = err else {
            panic!("expected rejection");
        };
        issues
            .into_iter()
            .find_map(|issue| match issue {
                Issue::Reference(err) => Some(err),
                _ => None,
            })
            .expect("reference error")
    }

    #[test]
    fn every_unresolved_alias_is_reported_at_once() {
        let err = reference_error(
            br#"<pfsense>
  <interfaces><lan><if>em1</if><ipaddr>10.0.0.1</ipaddr><subnet>24</subnet></lan></interfaces>
  <filter>
    <rule><type>pass</type><interface>lan</interface>
      <source><address>missing_a</address></source><destination><any/></destination></rule>
    <rule><type>pass</type><interface>opt9</interface><protocol>tcp</protocol>
      <source><any/></source><destination><address>missing_b</address><port>missing_ports</port></destination></rule>
  </filter>
</pfsense>"#,
        );
        assert_eq!(
            err.names(ReferenceKind::Alias),
            vec!["missing_a", "missing_b", "missing_ports"]
        );
        assert_eq!(err.names(ReferenceKind::Interface), vec!["opt9"]);
        assert!(err.cycles.is_empty());
    }

    #[test]
    fn alias_cycles_are_reported() {
        let err = reference_error(
            br#"<pfsense>
  <aliases>
    <alias><name>b_side</name><type>network</type><address>a_side</address></alias>
    <alias><name>a_side</name><type>network</type><address>b_side 10.0.0.0/8</address></alias>
    <alias><name>selfish</name><type>host</type><address>selfish</address></alias>
  </aliases>
</pfsense>"#,
        );
        assert!(err.unresolved.is_empty());
        assert_eq!(
            err.cycles,
            vec![
                vec!["a_side".to_string(), "b_side".to_string(), "a_side".to_string()],
                vec!["selfish".to_string(), "selfish".to_string()],
            ]
        );
    }

    #[test]
    fn pseudo_interfaces_and_groups_resolve() {
        let imported = import_bytes(
            br#"<pfsense>
  <interfaces><lan><if>em1</if></lan></interfaces>
  <ifgroups><ifgroupentry><ifname>INSIDE</ifname><members>lan</members></ifgroupentry></ifgroups>
  <filter>
    <rule><type>pass</type><interface>openvpn</interface><source><any/></source><destination><any/></destination></rule>
    <rule><type>pass</type><interface>inside</interface><source><network>inside</network></source><destination><any/></destination></rule>
  </filter>
</pfsense>"#,
        );
        assert!(imported.is_ok());
    }

    #[test]
    fn port_alias_as_address_is_rejected() {
        let err = import_bytes(
            br#"<pfsense>
  <interfaces><lan><if>em1</if></lan></interfaces>
  <aliases><alias><name>web</name><type>port</type><address>80</address></alias></aliases>
  <filter>
    <rule><type>pass</type><interface>lan</interface><source><address>web</address></source><destination><any/></destination></rule>
  </filter>
</pfsense>"#,
        )
        .expect_err("must fail");
        assert_eq!(err.category(), IssueCategory::Parse);
    }
}
