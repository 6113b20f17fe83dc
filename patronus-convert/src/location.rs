use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Where a construct came from in the imported document.
///
/// `path` is a dotted element path with 0-based positional indexes among
/// same-named siblings (`filter.rule[3]`), `line` the 1-based line of the
/// element's opening tag. Both are reported back to the user in every
/// error and warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourceLocation {
    pub path: String,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(path: impl Into<String>, line: usize) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }

    /// Location of a child element below this one.
    pub fn join(&self, segment: &str, line: usize) -> Self {
        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{segment}", self.path)
        };
        Self { path, line }
    }

    /// Location of the `idx`-th element named `tag` below this one.
    pub fn indexed(&self, tag: &str, idx: usize, line: usize) -> Self {
        self.join(&format!("{tag}[{idx}]"), line)
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            return write!(f, "{}", self.path);
        }
        write!(f, "{} (line {})", self.path, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::SourceLocation;

    #[test]
    fn renders_path_and_line() {
        let root = SourceLocation::new("pfsense", 2);
        let rule = root.join("filter", 40).indexed("rule", 3, 57);
        assert_eq!(rule.path, "pfsense.filter.rule[3]");
        assert_eq!(rule.to_string(), "pfsense.filter.rule[3] (line 57)");
    }
}
