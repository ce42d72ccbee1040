//! Diagnostics collected while loading classifiers or serving a request.
//!
//! Diagnostics are plain values handed back to the caller. Nothing here is global.

use serde::Serialize;
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// What produced the diagnostic (a classifier name, a query token, a graph key)
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.message)
    }
}

/// An ordered list of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning
    pub fn warn(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push(source, message, Severity::Warning);
    }

    /// Record an error
    pub fn error(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push(source, message, Severity::Error);
    }

    fn push(&mut self, source: impl Into<String>, message: impl Into<String>, severity: Severity) {
        self.entries.push(Diagnostic {
            source: source.into(),
            message: message.into(),
            severity,
        });
    }

    /// Append all entries of another list
    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if any entry has error severity
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_collect_and_merge() {
        let mut a = Diagnostics::new();
        a.warn("statsd", "no unit tag");
        assert!(!a.has_errors());

        let mut b = Diagnostics::new();
        b.error("foo(", "regex parse error");
        a.extend(b);

        assert_eq!(a.len(), 2);
        assert!(a.has_errors());
        assert_eq!(a.iter().next().unwrap().to_string(), "statsd -> no unit tag");
    }
}
