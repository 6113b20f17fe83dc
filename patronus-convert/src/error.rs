//! Error types for import and translation.
//!
//! Every stage reports in batches: a failed run carries the complete list
//! of problems it found, never just the first one.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use crate::location::SourceLocation;
use crate::nft::parse::ScriptError;

/// Process exit codes of the `patronus-convert` binary.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const PARSE: i32 = 3;
    pub const REFERENCE: i32 = 4;
    pub const CONFLICT: i32 = 5;
    pub const UNSUPPORTED: i32 = 6;
    pub const DISAGREEMENT: i32 = 7;
}

/// A construct that could not be read from the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{location}: {message}")]
pub struct ParseError {
    pub location: SourceLocation,
    pub message: String,
}

impl ParseError {
    pub fn new(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Alias,
    Interface,
}

impl Display for ReferenceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Alias => f.write_str("alias"),
            ReferenceKind::Interface => f.write_str("interface"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub kind: ReferenceKind,
    pub name: String,
    pub location: SourceLocation,
}

impl Display for UnresolvedReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' at {}", self.kind, self.name, self.location)
    }
}

/// Every unresolved name and alias cycle of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub struct ReferenceError {
    pub unresolved: Vec<UnresolvedReference>,
    /// Each cycle as the alias names along it, first name repeated last.
    pub cycles: Vec<Vec<String>>,
}

impl ReferenceError {
    /// Distinct unresolved names of `kind`, sorted.
    pub fn names(&self, kind: ReferenceKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .unresolved
            .iter()
            .filter(|reference| reference.kind == kind)
            .map(|reference| reference.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Display for ReferenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.unresolved.is_empty() {
            let listed: Vec<String> = self.unresolved.iter().map(ToString::to_string).collect();
            parts.push(format!("unresolved references: {}", listed.join("; ")));
        }
        for cycle in &self.cycles {
            parts.push(format!("alias cycle: {}", cycle.join(" -> ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub label: String,
    pub location: SourceLocation,
}

impl Display for ConflictEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.label, self.location)
    }
}

/// Two NAT mappings that claim the same traffic with different outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("conflict: {first} and {second}: {reason}")]
pub struct ConflictError {
    pub first: ConflictEntry,
    pub second: ConflictEntry,
    pub reason: String,
}

/// A source construct with no faithful nftables translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("unsupported {construct} in {subject} at {location}")]
pub struct UnsupportedFeatureError {
    /// Construct name, also the key used to waive it in settings.
    pub construct: String,
    pub subject: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Parse,
    Reference,
    Conflict,
    Unsupported,
}

impl IssueCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            IssueCategory::Parse => exit_code::PARSE,
            IssueCategory::Reference => exit_code::REFERENCE,
            IssueCategory::Conflict => exit_code::CONFLICT,
            IssueCategory::Unsupported => exit_code::UNSUPPORTED,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Parse => "parse",
            IssueCategory::Reference => "reference",
            IssueCategory::Conflict => "conflict",
            IssueCategory::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Issue {
    #[error(transparent)]
    Parse(ParseError),
    #[error(transparent)]
    Reference(ReferenceError),
    #[error(transparent)]
    Conflict(ConflictError),
    #[error(transparent)]
    Unsupported(UnsupportedFeatureError),
}

impl Issue {
    pub fn category(&self) -> IssueCategory {
        match self {
            Issue::Parse(_) => IssueCategory::Parse,
            Issue::Reference(_) => IssueCategory::Reference,
            Issue::Conflict(_) => IssueCategory::Conflict,
            Issue::Unsupported(_) => IssueCategory::Unsupported,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("malformed XML: {0}")]
    Xml(#[from] patronus_xml::ParseError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("{} issue(s) rejected the configuration", .0.len())]
    Rejected(Vec<Issue>),
}

impl ConvertError {
    /// Most fundamental category present: parse, then reference, then
    /// conflict, then unsupported.
    pub fn category(&self) -> IssueCategory {
        match self {
            ConvertError::Xml(_) | ConvertError::Script(_) => IssueCategory::Parse,
            ConvertError::Rejected(issues) => issues
                .iter()
                .map(Issue::category)
                .min()
                .unwrap_or(IssueCategory::Parse),
        }
    }

    pub fn issues(&self) -> &[Issue] {
        match self {
            ConvertError::Rejected(issues) => issues,
            _ => &[],
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConflictEntry, ConflictError, ConvertError, Issue, IssueCategory, ParseError,
        UnsupportedFeatureError,
    };
    use crate::location::SourceLocation;

    fn unsupported() -> Issue {
        Issue::Unsupported(UnsupportedFeatureError {
            construct: "sched".to_string(),
            subject: "filter[2]".to_string(),
            location: SourceLocation::new("filter.rule[2]", 30),
        })
    }

    #[test]
    fn category_prefers_most_fundamental() {
        let conflict = Issue::Conflict(ConflictError {
            first: ConflictEntry {
                label: "rdr[0]".to_string(),
                location: SourceLocation::default(),
            },
            second: ConflictEntry {
                label: "rdr[1]".to_string(),
                location: SourceLocation::default(),
            },
            reason: "same port".to_string(),
        });
        let err = ConvertError::Rejected(vec![unsupported(), conflict]);
        assert_eq!(err.category(), IssueCategory::Conflict);
        assert_eq!(err.exit_code(), 5);

        let err = ConvertError::Rejected(vec![
            unsupported(),
            Issue::Parse(ParseError::new(SourceLocation::default(), "bad")),
        ]);
        assert_eq!(err.category(), IssueCategory::Parse);
    }

    #[test]
    fn unsupported_message_names_construct_and_location() {
        assert_eq!(
            unsupported().to_string(),
            "unsupported sched in filter[2] at filter.rule[2] (line 30)"
        );
    }
}
