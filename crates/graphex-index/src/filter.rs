//! Index filter expressions and the pattern-to-filter translator
//!
//! The tag index stores every metric as a document with an `_id` and a `tags`
//! field holding `key=value` strings. Filters are expressed over those two fields
//! and rendered into the Elasticsearch filtered-query DSL.

use crate::error::{IndexError, Result};
use graphex_core::Diagnostics;
use graphex_query::{MatchKind, MatchSpec, PatternSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::warn;

/// Characters with a meaning in the index's regexp dialect
const RESERVED: &[char] = &[
    '.', '?', '+', '*', '|', '{', '}', '[', ']', '(', ')', '"', '\\', '#', '@', '&', '<', '>', '~',
];

/// Document field a filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "_id")]
    Id,
    #[serde(rename = "tags")]
    Tags,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::Tags => "tags",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter expression tree understood by every [`TagStore`](crate::TagStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    MatchAll,
    /// Exact match of a whole field value
    Term { field: Field, value: String },
    /// Regexp over a whole field value (implicitly anchored at both ends)
    Regexp { field: Field, pattern: String },
    Not(Box<IndexFilter>),
    And(Vec<IndexFilter>),
    Or(Vec<IndexFilter>),
}

impl IndexFilter {
    /// Filter that matches no document
    pub fn match_none() -> Self {
        IndexFilter::Not(Box::new(IndexFilter::MatchAll))
    }

    pub fn term(field: Field, value: impl Into<String>) -> Self {
        IndexFilter::Term {
            field,
            value: value.into(),
        }
    }

    pub fn regexp(field: Field, pattern: impl Into<String>) -> Self {
        IndexFilter::Regexp {
            field,
            pattern: pattern.into(),
        }
    }

    pub fn negate(self) -> Self {
        IndexFilter::Not(Box::new(self))
    }

    /// Render the full filtered query
    pub fn to_json(&self) -> Value {
        json!({
            "filtered": {
                "query": { "match_all": {} },
                "filter": self.to_filter_json(),
            }
        })
    }

    /// Render just this node of the filter tree
    pub fn to_filter_json(&self) -> Value {
        match self {
            IndexFilter::MatchAll => json!({ "match_all": {} }),
            IndexFilter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            IndexFilter::Regexp { field, pattern } => {
                json!({ "regexp": { field.as_str(): pattern } })
            }
            IndexFilter::Not(inner) => json!({ "not": inner.to_filter_json() }),
            IndexFilter::And(filters) => json!({
                "and": filters.iter().map(IndexFilter::to_filter_json).collect::<Vec<_>>()
            }),
            IndexFilter::Or(filters) => json!({
                "or": filters.iter().map(IndexFilter::to_filter_json).collect::<Vec<_>>()
            }),
        }
    }
}

/// Translates compiled match specs into index filters
pub struct IndexQueryTranslator;

impl IndexQueryTranslator {
    /// AND of all specs. An empty set matches everything.
    pub fn translate(patterns: &PatternSet) -> IndexFilter {
        Self::translate_with_diagnostics(patterns, &mut Diagnostics::new())
    }

    /// Like [`translate`](Self::translate), recording tokens the index cannot express
    pub fn translate_with_diagnostics(patterns: &PatternSet, diagnostics: &mut Diagnostics) -> IndexFilter {
        if patterns.is_empty() {
            return IndexFilter::MatchAll;
        }
        IndexFilter::And(
            patterns
                .specs()
                .map(|spec| Self::translate_spec(spec, diagnostics))
                .collect(),
        )
    }

    /// Translate a single match token, honouring its negation.
    ///
    /// Broken tokens and regexes with no index equivalent match nothing; the latter
    /// are reported in `diagnostics`.
    pub fn translate_spec(spec: &MatchSpec, diagnostics: &mut Diagnostics) -> IndexFilter {
        let filter = if spec.is_broken() {
            IndexFilter::match_none()
        } else {
            match Self::translate_kind(&spec.kind) {
                Ok(filter) => filter,
                Err(e) => {
                    warn!("Token '{}' not translated: {}", spec.raw, e);
                    diagnostics.error(&spec.raw, e.to_string());
                    IndexFilter::match_none()
                }
            }
        };
        if spec.negate {
            filter.negate()
        } else {
            filter
        }
    }

    fn translate_kind(kind: &MatchKind) -> Result<IndexFilter> {
        let filter = match kind {
            MatchKind::TagEquality { key, value } => match (key.is_empty(), value.is_empty()) {
                (true, true) => IndexFilter::MatchAll,
                (false, true) => IndexFilter::regexp(Field::Tags, format!("{}=.*", escape_literal(key))),
                (true, false) => {
                    IndexFilter::regexp(Field::Tags, format!("[^=]*={}", escape_literal(value)))
                }
                (false, false) => IndexFilter::term(Field::Tags, format!("{}={}", key, value)),
            },
            MatchKind::TagRegex { key, value, .. } => match (key.is_empty(), value.is_empty()) {
                (true, true) => IndexFilter::MatchAll,
                (false, true) => {
                    IndexFilter::regexp(Field::Tags, format!("{}=.*", index_fragment(key, "[^=]*")?))
                }
                (true, false) => {
                    IndexFilter::regexp(Field::Tags, format!("[^=]*={}", index_fragment(value, ".*")?))
                }
                (false, false) => IndexFilter::regexp(
                    Field::Tags,
                    format!("{}={}", escape_literal(key), index_fragment(value, ".*")?),
                ),
            },
            MatchKind::IdRegex { pattern, .. } => {
                let fragment = index_fragment(pattern, ".*")?;
                IndexFilter::Or(vec![
                    IndexFilter::regexp(Field::Id, fragment.clone()),
                    IndexFilter::regexp(Field::Tags, fragment),
                ])
            }
        };
        Ok(filter)
    }
}

/// Rewrite an unanchored search regex into a whole-value index regexp.
///
/// Each top-level branch is padded with `filler` on every side that is not
/// anchored with `^` or `$`, and the branches are grouped: `^rx|tx` with filler
/// `.*` becomes `(rx.*|.*tx.*)`. Perl classes (`\d`, `\w`, `\s` and their negations)
/// are expanded and non-capturing groups lose their `?:`. Anything else without an
/// index equivalent (inner anchors, `\b`, flags, nested classes) is rejected.
pub fn index_fragment(fragment: &str, filler: &str) -> Result<String> {
    let branches = split_branches(fragment)
        .into_iter()
        .map(|branch| {
            let (anchored_start, rest) = match branch.strip_prefix('^') {
                Some(rest) => (true, rest),
                None => (false, branch),
            };
            let (body, anchored_end) = match rest.strip_suffix('$') {
                Some(body) if !ends_with_escape(body) => (body, true),
                _ => (rest, false),
            };

            let mut out = String::new();
            if !anchored_start {
                out.push_str(filler);
            }
            out.push_str(&convert_body(body).map_err(|reason| {
                IndexError::InvalidFilter(format!("'{}' has no index equivalent: {}", fragment, reason))
            })?);
            if !anchored_end {
                out.push_str(filler);
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(format!("({})", branches.join("|")))
}

/// Split at `|` outside groups and character classes
fn split_branches(fragment: &str) -> Vec<&str> {
    let mut branches = Vec::new();
    let mut depth = 0usize;
    let mut in_class = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in fragment.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' => in_class = true,
            ']' => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth = depth.saturating_sub(1),
            '|' if !in_class && depth == 0 => {
                branches.push(&fragment[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    branches.push(&fragment[start..]);
    branches
}

/// True if `s` ends in an odd number of backslashes
fn ends_with_escape(s: &str) -> bool {
    s.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

const DIGIT: &str = "0-9";
const WORD: &str = "a-zA-Z0-9_";
const SPACE: &str = " \t\n\r\u{b}\u{c}";

fn convert_body(body: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(body.len() + 8);
    let mut in_class = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let escaped = chars.next().ok_or("trailing backslash")?;
            let (class, negated) = match escaped {
                'd' => (Some(DIGIT), false),
                'w' => (Some(WORD), false),
                's' => (Some(SPACE), false),
                'D' => (Some(DIGIT), true),
                'W' => (Some(WORD), true),
                'S' => (Some(SPACE), true),
                _ => (None, false),
            };
            match (class, in_class) {
                (Some(_), true) if negated => {
                    return Err(format!("negated class \\{} inside brackets", escaped))
                }
                (Some(class), true) => out.push_str(class),
                (Some(class), false) => {
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    out.push_str(class);
                    out.push(']');
                }
                (None, _) => match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    e if e.is_ascii_alphanumeric() => return Err(format!("escape \\{}", e)),
                    e => {
                        out.push('\\');
                        out.push(e);
                    }
                },
            }
            continue;
        }

        if in_class {
            match c {
                ']' => {
                    in_class = false;
                    out.push(']');
                }
                '[' => return Err("nested character class".to_string()),
                '&' if chars.peek() == Some(&'&') => return Err("class intersection".to_string()),
                '~' if chars.peek() == Some(&'~') => return Err("class difference".to_string()),
                '&' | '~' | '#' | '@' | '<' | '>' | '"' => {
                    out.push('\\');
                    out.push(c);
                }
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '[' => {
                in_class = true;
                out.push('[');
                if let Some(negation) = chars.next_if_eq(&'^') {
                    out.push(negation);
                }
                if chars.next_if_eq(&']').is_some() {
                    out.push_str("\\]");
                }
            }
            '(' => {
                if chars.next_if_eq(&'?').is_some() {
                    if chars.next_if_eq(&':').is_none() {
                        return Err("group flags".to_string());
                    }
                }
                out.push('(');
            }
            '^' | '$' => return Err(format!("'{}' anchor inside the pattern", c)),
            '#' | '@' | '&' | '<' | '>' | '~' | '"' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Escape a literal for the index's regexp dialect
pub fn escape_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compile an index regexp into an anchored [`Regex`].
///
/// Escapes are always literal in the index dialect, and `^`/`$` carry no anchor
/// meaning outside a character class.
pub fn compile_index_regexp(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("^(?:");
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if let Some(negation) = chars.next_if_eq(&'^') {
                    out.push(negation);
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            _ if in_class => out.push(c),
            '^' | '$' | '#' | '@' | '&' | '<' | '>' | '~' => {
                out.push_str(&regex::escape(&c.to_string()))
            }
            _ => out.push(c),
        }
    }
    out.push_str(")$");

    Regex::new(&out).map_err(|e| IndexError::InvalidFilter(format!("{}: {}", pattern, e)))
}
