//! Mapping from emitted nft rules back to the source entities they stand
//! for.

use serde::Serialize;

use crate::nft::emit::render_rule;
use crate::nft::{Origin, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub chain: String,
    /// 0-based position of the rule within its chain.
    pub position: usize,
    pub rule: String,
    pub origins: Vec<Origin>,
}

/// One entry per rule of every chain, in emission order.
pub fn build(table: &Table) -> Vec<TraceEntry> {
    table
        .chains
        .iter()
        .flat_map(|chain| {
            chain
                .rules
                .iter()
                .enumerate()
                .map(move |(position, rule)| TraceEntry {
                    chain: chain.name.clone(),
                    position,
                    rule: render_rule(rule),
                    origins: rule.origins.clone(),
                })
        })
        .collect()
}

/// Entries that stem from the source entity labelled `label`
/// (`filter[3]`, `rdr[0]`), matched on the label's index part.
pub fn entries_for<'a>(trace: &'a [TraceEntry], label: &str) -> Vec<&'a TraceEntry> {
    trace
        .iter()
        .filter(|entry| {
            entry.origins.iter().any(|origin| {
                origin.label == label
                    || origin
                        .label
                        .strip_prefix(label)
                        .is_some_and(|rest| rest.starts_with(' '))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::entries_for;
    use crate::import::import_bytes;
    use crate::settings::Settings;
    use crate::translate::{translate, TranslateOptions};

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <lan><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <aliases>
    <alias><name>mixed</name><type>host</type><address>192.168.1.5 fd00::5</address></alias>
  </aliases>
  <filter>
    <rule><type>block</type><interface>lan</interface><ipprotocol>inet46</ipprotocol>
      <source><address>mixed</address></source><destination><any/></destination>
      <descr>Quarantine</descr></rule>
    <rule><type>pass</type><interface>lan</interface>
      <source><network>lan</network></source><destination><any/></destination></rule>
  </filter>
</pfsense>"#;

    #[test]
    fn every_emitted_rule_names_its_source() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");

        let quarantine = entries_for(&unit.trace, "filter[0]");
        assert_eq!(quarantine.len(), 2);
        assert!(quarantine.iter().all(|entry| entry.chain == "in_lan"));
        assert_eq!(quarantine[0].position, 0);
        assert_eq!(quarantine[1].position, 1);
        assert_eq!(
            quarantine[0].origins[0].location.as_ref().map(|loc| loc.line),
            Some(9)
        );
        assert_eq!(entries_for(&unit.trace, "filter[1]").len(), 1);
        assert!(entries_for(&unit.trace, "filter[2]").is_empty());

        for chain in &unit.ruleset.table.chains {
            let traced = unit.trace.iter().filter(|entry| entry.chain == chain.name).count();
            assert_eq!(traced, chain.rules.len());
        }
    }
}
