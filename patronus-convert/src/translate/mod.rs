//! Rule model to nftables translation.
//!
//! [`translate`] runs the whole pipeline: construct audit, NAT conflict
//! detection, alias sets, filter chains, NAT chains, the optional
//! optimization pass and the trace. It either returns a complete
//! [`TranslationUnit`] or every issue that blocks one.

mod conflict;
mod expand;
pub mod filter;
mod nat;
pub mod optimize;
mod resolve;
mod support;
pub mod trace;

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::error::ConvertError;
use crate::location::SourceLocation;
use crate::model::RuleModel;
use crate::nft::parse::parse;
use crate::nft::{Family, Match, MatchKey, Ruleset, Table};
use crate::settings::Settings;

pub use trace::TraceEntry;

use resolve::{match_value, Resolver};
use support::Skipped;

/// Longest comment nft accepts on a rule.
const MAX_COMMENT: usize = 128;

/// Something the translation did that a reviewer should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Run the equivalence-preserving optimization pass.
    pub optimize: bool,
}

/// A translated ruleset with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationUnit {
    pub ruleset: Ruleset,
    pub trace: Vec<TraceEntry>,
    pub notes: Vec<Note>,
}

/// Shared state of the chain builders.
pub(crate) struct Builder<'a> {
    pub model: &'a RuleModel,
    pub settings: &'a Settings,
    pub resolver: Resolver<'a>,
    pub skipped: &'a Skipped,
    notes: Vec<Note>,
}

impl<'a> Builder<'a> {
    fn new(model: &'a RuleModel, settings: &'a Settings, skipped: &'a Skipped) -> Self {
        Self {
            model,
            settings,
            resolver: Resolver::new(model, settings),
            skipped,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, subject: &str, location: Option<&SourceLocation>, message: &str) {
        debug!(subject, message, "translation note");
        self.notes.push(Note {
            subject: subject.to_string(),
            location: location.cloned(),
            message: message.to_string(),
        });
    }

    /// `iifname`/`oifname` match over the devices of `names`. `None`, with
    /// a note, when no device stands behind them.
    pub fn iface_match(
        &mut self,
        key: MatchKey,
        names: &[String],
        subject: &str,
        location: Option<&SourceLocation>,
    ) -> Option<Match> {
        let mut devices = Vec::new();
        for name in names {
            devices.extend(self.resolver.devices(name).unwrap_or_default());
        }
        match match_value(devices) {
            Some(value) => Some(Match::new(key, value)),
            None => {
                self.note(subject, location, "no interface device; not emitted");
                None
            }
        }
    }
}

/// Rule comment: the origin label on one line, with double quotes
/// replaced and backslashes dropped, cut to what nft accepts.
pub(crate) fn comment(label: &str) -> String {
    let mut text = String::with_capacity(label.len());
    for ch in label.chars() {
        match ch {
            '"' => text.push('\''),
            '\\' => {}
            ch if ch.is_control() => {
                if !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            ch => text.push(ch),
        }
    }
    text.truncate(text.trim_end().len());
    if text.len() > MAX_COMMENT {
        let mut end = MAX_COMMENT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

pub fn translate(
    model: &RuleModel,
    settings: &Settings,
    options: &TranslateOptions,
) -> Result<TranslationUnit, ConvertError> {
    let audit = support::audit(model, settings);
    debug!(
        issues = audit.issues.len(),
        notes = audit.notes.len(),
        "audited constructs"
    );

    let resolver = Resolver::new(model, settings);
    let conflicts = conflict::detect(&resolver, &audit.skipped);
    debug!(conflicts = conflicts.issues.len(), "checked nat mappings");

    let mut issues = audit.issues;
    issues.extend(conflicts.issues);
    if !issues.is_empty() {
        return Err(ConvertError::Rejected(issues));
    }

    let mut builder = Builder::new(model, settings, &audit.skipped);
    builder.notes.extend(audit.notes);
    builder.notes.extend(conflicts.notes);

    let sets = builder.resolver.sets();
    debug!(sets = sets.len(), "built alias sets");
    let mut chains = filter::build(&mut builder);
    chains.extend(nat::build(&mut builder));

    let mut table = Table {
        family: Family::Inet,
        name: settings.table.clone(),
        sets,
        chains,
    };
    if options.optimize {
        let stats = optimize::optimize(&mut table);
        debug!(
            merged = stats.merged,
            removed = stats.removed,
            "optimized ruleset"
        );
    }

    let trace = trace::build(&table);
    debug!(entries = trace.len(), "built trace");
    Ok(TranslationUnit {
        ruleset: Ruleset { table },
        trace,
        notes: builder.notes,
    })
}

/// Indexes of filter rules a waived construct leaves out of the ruleset.
pub(crate) fn skipped_rules(model: &RuleModel, settings: &Settings) -> BTreeSet<usize> {
    support::audit(model, settings).skipped.rule_indexes()
}

/// Translation of a script this tool emitted: the ruleset it already is.
pub fn from_script(text: &str) -> Result<TranslationUnit, ConvertError> {
    let ruleset = parse(text)?;
    let trace = trace::build(&ruleset.table);
    Ok(TranslationUnit {
        ruleset,
        trace,
        notes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::{comment, from_script, translate, TranslateOptions};
    use crate::error::{ConvertError, IssueCategory};
    use crate::import::import_bytes;
    use crate::nft::emit::emit;
    use crate::settings::Settings;

    const CONFIG: &[u8] = br#"<pfsense>
  <interfaces>
    <wan><if>em0</if><ipaddr>203.0.113.2</ipaddr><subnet>24</subnet><gateway>WANGW</gateway></wan>
    <lan><if>em1</if><ipaddr>192.168.1.1</ipaddr><subnet>24</subnet></lan>
  </interfaces>
  <aliases>
    <alias><name>admins</name><type>host</type><address>192.168.1.10 192.168.1.11</address></alias>
  </aliases>
  <filter>
    <rule><type>pass</type><interface>lan</interface>
      <source><address>admins</address></source><destination><any/></destination></rule>
  </filter>
</pfsense>"#;

    #[test]
    fn comments_lose_quotes_and_fit_nft() {
        assert_eq!(comment("filter[0] \"Allow\""), "filter[0] 'Allow'");
        let long = "é".repeat(100);
        let cut = comment(&long);
        assert!(cut.len() <= 128);
        assert_eq!(cut.chars().count(), 64);
        assert_eq!(comment("filter[2] \"a\\b\r\n\tc\""), "filter[2] 'ab c'");
    }

    #[test]
    fn multi_line_descriptions_stay_on_one_script_line() {
        let config = String::from_utf8_lossy(CONFIG).replace(
            "<destination><any/></destination></rule>",
            "<destination><any/></destination>\n      <descr><![CDATA[allow lan\nto any \\ backslash]]></descr></rule>",
        );
        let imported = import_bytes(config.as_bytes()).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let text = emit(&unit.ruleset);
        assert!(text.contains("comment \"filter[0] 'allow lan to any  backslash'\""));

        let read = from_script(&text).expect("read back");
        assert_eq!(emit(&read.ruleset), text);
    }

    #[test]
    fn translation_is_deterministic_and_reads_back_as_itself() {
        let imported = import_bytes(CONFIG).expect("import");
        let settings = Settings::embedded().expect("settings");
        let unit = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let again = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect("translate");
        let text = emit(&unit.ruleset);
        assert_eq!(text, emit(&again.ruleset));
        assert!(text.contains("set admins_v4"));

        let read = from_script(&text).expect("read back");
        assert_eq!(emit(&read.ruleset), text);
    }

    #[test]
    fn unsupported_constructs_reject_the_whole_run() {
        let raw = String::from_utf8_lossy(CONFIG).replace(
            "<type>pass</type><interface>lan</interface>",
            "<type>pass</type><interface>lan</interface><sched>night</sched><tag>x</tag>",
        );
        let imported = import_bytes(raw.as_bytes()).expect("import");
        let settings = Settings::embedded().expect("settings");
        let err = translate(&imported.model, &settings, &TranslateOptions::default())
            .expect_err("rejected");
        assert_eq!(err.category(), IssueCategory::Unsupported);
        let ConvertError::Rejected(issues) = err else {
            panic!("expected rejected");
        };
        assert_eq!(issues.len(), 2);
    }
}
