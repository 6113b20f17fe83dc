//! Terminal and JSON renderings of import, translation and simulation
//! results.

use colored::Colorize;
use serde::Serialize;

use crate::error::{ConvertError, Issue, IssueCategory, ParseError};
use crate::import::ImportWarning;
use crate::location::SourceLocation;
use crate::model::{
    AddressMode, Alias, Interface, NatKind, NatMapping, OutboundTranslation, Rule, RuleModel,
    RuleScope,
};
use crate::simulate::Simulation;
use crate::translate::{Note, TraceEntry, TranslationUnit};

/// Outcome of `check`, as printed with `--format json`.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<IssueCategory>,
    pub settings: String,
    pub issues: Vec<Issue>,
    pub warnings: Vec<ImportWarning>,
    pub notes: Vec<Note>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RulesetSummary>,
}

impl CheckReport {
    pub fn failed(err: &ConvertError, settings: String, warnings: Vec<ImportWarning>) -> Self {
        let issues = match err {
            ConvertError::Rejected(issues) => issues.clone(),
            ConvertError::Xml(xml) => vec![Issue::Parse(ParseError::new(
                SourceLocation::new("document", xml.line().unwrap_or(0)),
                xml.to_string(),
            ))],
            ConvertError::Script(script) => vec![Issue::Parse(ParseError::new(
                SourceLocation::new("script", script.line),
                script.message.clone(),
            ))],
        };
        Self {
            ok: false,
            category: Some(err.category()),
            settings,
            issues,
            warnings,
            notes: Vec::new(),
            summary: None,
        }
    }

    pub fn passed(unit: &TranslationUnit, settings: String, warnings: Vec<ImportWarning>) -> Self {
        Self {
            ok: true,
            category: None,
            settings,
            issues: Vec::new(),
            warnings,
            notes: unit.notes.clone(),
            summary: Some(RulesetSummary::of(unit)),
        }
    }
}

/// Size of a translated ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RulesetSummary {
    pub sets: usize,
    pub chains: usize,
    pub rules: usize,
}

impl RulesetSummary {
    pub fn of(unit: &TranslationUnit) -> Self {
        let table = &unit.ruleset.table;
        Self {
            sets: table.sets.len(),
            chains: table.chains.len(),
            rules: table.chains.iter().map(|chain| chain.rules.len()).sum(),
        }
    }
}

/// One line per issue; reference errors list every unresolved name.
pub fn render_issues(issues: &[Issue]) -> String {
    let mut out = Vec::new();
    for issue in issues {
        let tag = format!("[{}]", issue.category().as_str()).red().bold();
        match issue {
            Issue::Reference(reference) => {
                for unresolved in &reference.unresolved {
                    out.push(format!("{tag} unresolved {unresolved}"));
                }
                for cycle in &reference.cycles {
                    out.push(format!("{tag} alias cycle: {}", cycle.join(" -> ")));
                }
            }
            Issue::Conflict(conflict) => {
                out.push(format!("{tag} {}", conflict.reason));
                out.push(format!("  first:  {}", conflict.first));
                out.push(format!("  second: {}", conflict.second));
            }
            other => out.push(format!("{tag} {other}")),
        }
    }
    out.join("\n")
}

pub fn render_warnings(warnings: &[ImportWarning]) -> String {
    warnings
        .iter()
        .map(|warning| {
            format!(
                "{} {} at {}",
                "warning:".yellow().bold(),
                warning.message,
                warning.location
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_notes(notes: &[Note]) -> String {
    notes
        .iter()
        .map(|note| {
            let place = note
                .location
                .as_ref()
                .map(|location| format!(" at {location}"))
                .unwrap_or_default();
            format!("{} {}{place}: {}", "note:".cyan(), note.subject, note.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Emitted rule positions with the source entities behind them.
pub fn render_trace(trace: &[TraceEntry]) -> String {
    let mut out = Vec::new();
    out.push("trace".bold().to_string());
    for entry in trace {
        let sources = if entry.origins.is_empty() {
            "-".to_string()
        } else {
            entry
                .origins
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };
        out.push(format!("- {}[{}] {}", entry.chain, entry.position, entry.rule));
        out.push(format!("  from: {sources}"));
    }
    out.join("\n")
}

pub fn render_summary(summary: &RulesetSummary, table: &str) -> String {
    format!(
        "table inet {table}: sets={} chains={} rules={}",
        summary.sets, summary.chains, summary.rules
    )
    .cyan()
    .to_string()
}

/// Text view of the rule model for `inspect`.
pub fn render_model(model: &RuleModel) -> String {
    let mut out = Vec::new();
    let version = model
        .version
        .as_deref()
        .map(|version| format!(" version={version}"))
        .unwrap_or_default();
    out.push(format!("platform={}{version}", model.platform));

    out.push(String::new());
    out.push("interfaces".bold().to_string());
    for iface in &model.interfaces {
        out.push(render_interface(iface));
    }
    if !model.groups.is_empty() {
        out.push(String::new());
        out.push("groups".bold().to_string());
        for group in &model.groups {
            out.push(format!("- {}: {}", group.name, group.members.join(" ")));
        }
    }
    if !model.aliases.is_empty() {
        out.push(String::new());
        out.push("aliases".bold().to_string());
        for alias in &model.aliases {
            out.push(render_alias(alias));
        }
    }
    out.push(String::new());
    out.push("rules".bold().to_string());
    for rule in &model.rules {
        out.push(render_rule(rule));
    }
    out.push(String::new());
    out.push(format!("{} mode={}", "nat".bold(), model.outbound_mode.xml_value()));
    for mapping in &model.nat {
        out.push(render_mapping(mapping));
    }
    for global in &model.global_unsupported {
        out.push(String::new());
        out.push(format!(
            "{} {} at {}",
            "unsupported:".yellow(),
            global.construct,
            global.origin
        ));
    }
    out.join("\n")
}

fn address_mode(mode: &AddressMode) -> Option<String> {
    match mode {
        AddressMode::None => None,
        AddressMode::Static(net) => Some(net.to_string()),
        AddressMode::Dynamic(kind) => Some(kind.clone()),
    }
}

fn render_interface(iface: &Interface) -> String {
    let mut parts = vec![format!("- {}: {}", iface.name, iface.device)];
    parts.extend(address_mode(&iface.ipv4));
    parts.extend(address_mode(&iface.ipv6));
    if let Some(tag) = iface.vlan {
        parts.push(format!("vlan={tag}"));
    }
    if let Some(gateway) = &iface.gateway {
        parts.push(format!("gateway={gateway}"));
    }
    if !iface.enabled {
        parts.push("disabled".dimmed().to_string());
    }
    if let Some(descr) = &iface.description {
        parts.push(format!("\"{descr}\""));
    }
    parts.join(" ")
}

fn render_alias(alias: &Alias) -> String {
    let entries: Vec<String> = alias.entries.iter().map(ToString::to_string).collect();
    let mut line = format!("- {} ({}): {}", alias.name, alias.kind, entries.join(" "));
    if !alias.enabled {
        line.push_str(&format!(" {}", "disabled".dimmed()));
    }
    line
}

fn render_rule(rule: &Rule) -> String {
    let scope = match rule.scope {
        RuleScope::Automation => " automation",
        RuleScope::Floating => " floating",
        RuleScope::Interface => "",
    };
    let mut line = format!(
        "- {}: {} {}{scope} on {} {} {} from {} to {}",
        rule.label(),
        rule.action.as_str(),
        rule.direction.as_str(),
        rule.interfaces.join(","),
        rule.family.as_str(),
        rule.protocol,
        rule.source,
        rule.destination
    );
    if rule.is_floating() && !rule.quick {
        line.push_str(" no-quick");
    }
    if rule.log {
        line.push_str(" log");
    }
    for construct in &rule.unsupported {
        line.push_str(&format!(" {}", format!("[{construct}]").yellow()));
    }
    if rule.disabled {
        return line.dimmed().to_string();
    }
    line
}

fn render_mapping(mapping: &NatMapping) -> String {
    let body = match &mapping.kind {
        NatKind::PortForward(pf) => {
            let mut target = pf.target.to_string();
            if let Some(port) = &pf.local_port {
                target.push_str(&format!(":{port}"));
            }
            if pf.no_redirect {
                target = "no-rdr".to_string();
            }
            format!(
                "on {} {} from {} to {} -> {target}",
                pf.interface, pf.protocol, pf.source, pf.destination
            )
        }
        NatKind::Outbound(rule) => {
            let translation = if rule.no_nat {
                "no-nat".to_string()
            } else {
                match &rule.translation {
                    OutboundTranslation::InterfaceAddress if !rule.static_port => {
                        rule.translation.to_string()
                    }
                    other if rule.static_port => format!("{other} static-port"),
                    other => other.to_string(),
                }
            };
            format!(
                "on {} {} from {} to {} -> {translation}",
                rule.interface, rule.protocol, rule.source, rule.destination
            )
        }
        NatKind::OneToOne(binat) => format!(
            "on {} {} <-> {} to {}",
            binat.interface, binat.external, binat.internal, binat.destination
        ),
    };
    let mut line = format!("- {}: {body}", mapping.label());
    for construct in &mapping.unsupported {
        line.push_str(&format!(" {}", format!("[{construct}]").yellow()));
    }
    if mapping.disabled {
        return line.dimmed().to_string();
    }
    line
}

/// Both decisions of a simulated packet.
pub fn render_simulation(sim: &Simulation) -> String {
    let mut out = Vec::new();
    let packet = &sim.packet;
    let ports = match (packet.sport, packet.dport) {
        (None, None) => String::new(),
        (sport, dport) => format!(
            " sport={} dport={}",
            sport.map_or_else(|| "-".to_string(), |p| p.to_string()),
            dport.map_or_else(|| "-".to_string(), |p| p.to_string())
        ),
    };
    out.push(format!(
        "packet hook={} in={} out={} proto={} {} -> {}{ports}",
        packet.hook.as_str(),
        packet.in_iface.as_deref().unwrap_or("-"),
        packet.out_iface.as_deref().unwrap_or("-"),
        packet.protocol,
        packet.src,
        packet.dst
    ));

    let model_place = sim
        .model
        .location
        .as_ref()
        .map(|location| format!(" at {location}"))
        .unwrap_or_default();
    out.push(format!(
        "model:   {} by {}{model_place}",
        decision(sim.model.decision.as_str()),
        sim.model.rule
    ));
    let position = sim
        .ruleset
        .rule
        .map_or_else(|| "policy".to_string(), |rule| format!("rule {rule}"));
    let origins = if sim.ruleset.origins.is_empty() {
        String::new()
    } else {
        let labels: Vec<&str> = sim
            .ruleset
            .origins
            .iter()
            .map(|origin| origin.label.as_str())
            .collect();
        format!(" ({})", labels.join(", "))
    };
    out.push(format!(
        "ruleset: {} by {} {position}{origins}",
        decision(sim.ruleset.decision.as_str()),
        sim.ruleset.chain
    ));
    if sim.agrees() {
        out.push("agree".green().to_string());
    } else {
        out.push("DISAGREE".red().bold().to_string());
    }
    out.join("\n")
}

fn decision(name: &str) -> String {
    match name {
        "accept" => name.green().to_string(),
        _ => name.red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{render_issues, render_model, RulesetSummary};
    use crate::error::ConvertError;
    use crate::import::import_bytes;
    use crate::settings::Settings;
    use crate::translate::{translate, TranslateOptions};

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <lan><enable/><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <filter>
    <rule><type>pass</type><interface>lan</interface><protocol>tcp</protocol>
      <source><any/></source><destination><any/><port>22</port></destination><descr>SSH</descr></rule>
  </filter>
</pfsense>"#;

    #[test]
    fn model_view_lists_every_entity() {
        colored::control::set_override(false);
        let imported = import_bytes(CONFIG).expect("import");
        let text = render_model(&imported.model);
        assert!(text.contains("- lan: em1 192.168.1.1/24"));
        assert!(text.contains("- filter[0] \"SSH\": pass in on lan inet tcp from any to any:22"));
        assert!(text.contains("nat mode=automatic"));
    }

    #[test]
    fn reference_issues_name_every_alias() {
        colored::control::set_override(false);
        let raw = String::from_utf8_lossy(CONFIG)
            .replace("<source><any/></source>", "<source><address>ghost</address></source>")
            .replace("<destination><any/>", "<destination><address>phantom</address>");
        let err = import_bytes(raw.as_bytes()).expect_err("rejected");
        let ConvertError::Rejected(issues) = &err else {
            panic!("expected rejected");
        };
        let text = render_issues(issues);
        assert!(text.contains("[reference] unresolved alias 'ghost'"));
        assert!(text.contains("[reference] unresolved alias 'phantom'"));
    }

    #[test]
    fn summary_counts_rules() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let summary = RulesetSummary::of(&unit);
        assert_eq!(summary.chains, unit.ruleset.table.chains.len());
        assert!(summary.rules >= 2);
    }
}
