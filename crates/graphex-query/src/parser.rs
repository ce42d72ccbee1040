//! Free-text query parser
//!
//! Grammar (informal):
//!
//! ```text
//! [graph|list] [from <ref>] [to <ref>] [GROUP BY <csv>|group by <csv>]
//! [sum by <csv>] [avg by <csv>] [limit <n>] <match tokens>
//! ```
//!
//! Clauses are cut out of the input one at a time, in a fixed order. Whatever is
//! left is split shell-style into match tokens. Parsing never fails: a clause that
//! does not match simply keeps its default.

use crate::model::{default_group_by, Query, Statement};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

static STATEMENT: Lazy<Regex> = Lazy::new(|| clause(r"^(graph|list)\s"));
static TO: Lazy<Regex> = Lazy::new(|| clause(r"\bto (\S+)"));
static FROM: Lazy<Regex> = Lazy::new(|| clause(r"\bfrom (\S+)"));
static GROUP_BY_REPLACE: Lazy<Regex> = Lazy::new(|| clause(r"\bGROUP BY (\S+)"));
static GROUP_BY_EXTEND: Lazy<Regex> = Lazy::new(|| clause(r"\bgroup by (\S+)"));
static SUM_BY: Lazy<Regex> = Lazy::new(|| clause(r"\bsum by (\S+)"));
static AVG_BY: Lazy<Regex> = Lazy::new(|| clause(r"\bavg by (\S+)"));
static LIMIT: Lazy<Regex> = Lazy::new(|| clause(r"\blimit ([0-9]+)\b"));

fn clause(pattern: &str) -> Regex {
    // patterns are literals above; a failure here is a programming error caught by the tests
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid clause regex {}: {}", pattern, e))
}

/// Parser for the free-text query language
pub struct QueryParser;

impl QueryParser {
    /// Parse a free-text query
    pub fn parse(input: &str) -> Query {
        let mut rest = input.to_string();
        let mut query = Query::default();

        if let Some(keyword) = Self::cut(&mut rest, &STATEMENT) {
            query.statement = Statement::from_keyword(&keyword).unwrap_or_default();
        }
        if let Some(to) = Self::cut(&mut rest, &TO) {
            query.to = to;
        }
        if let Some(from) = Self::cut(&mut rest, &FROM) {
            query.from = from;
        }

        let group_by_replace = Self::cut(&mut rest, &GROUP_BY_REPLACE);
        let group_by_extend = Self::cut(&mut rest, &GROUP_BY_EXTEND);
        let sum_by = Self::cut(&mut rest, &SUM_BY);
        let avg_by = Self::cut(&mut rest, &AVG_BY);

        if let Some(csv) = group_by_replace {
            query.group_by = split_csv(&csv).collect();
        } else if let Some(csv) = group_by_extend {
            // extra tags replace the bare default tags but keep the presence markers
            let mut group_by: Vec<String> = default_group_by()
                .into_iter()
                .filter(|tag| tag.ends_with('='))
                .collect();
            group_by.extend(split_csv(&csv));
            query.group_by = group_by;
        }
        if let Some(csv) = sum_by {
            query.sum_by = split_csv(&csv).collect::<BTreeSet<_>>();
        }
        if let Some(csv) = avg_by {
            query.avg_by = split_csv(&csv).collect::<BTreeSet<_>>();
        }
        query.ungroup_aggregated();

        if let Some(limit) = Self::cut_parsed(&mut rest, &LIMIT) {
            query.limit_targets = limit;
        }

        query.patterns = query
            .group_by
            .iter()
            .filter(|tag| tag.ends_with('='))
            .cloned()
            .collect();
        query.patterns.extend(split_tokens(&rest));

        debug!(?query, "Parsed query '{}'", input);
        query
    }

    /// Remove the first match of `re` from `rest`, returning its first capture group
    fn cut(rest: &mut String, re: &Regex) -> Option<String> {
        let caps = re.captures(rest)?;
        let whole = caps.get(0)?.range();
        let value = caps.get(1)?.as_str().to_string();
        rest.replace_range(whole, " ");
        Some(value)
    }

    /// Like [`Self::cut`], but only cuts when the capture parses. Otherwise the text stays in place.
    fn cut_parsed<T: FromStr>(rest: &mut String, re: &Regex) -> Option<T> {
        let caps = re.captures(rest)?;
        let whole = caps.get(0)?.range();
        let value = caps.get(1)?.as_str().parse().ok()?;
        rest.replace_range(whole, " ");
        Some(value)
    }
}

fn split_csv(csv: &str) -> impl Iterator<Item = String> + '_ {
    csv.split(',').filter(|s| !s.is_empty()).map(str::to_string)
}

/// Split on whitespace, honouring single/double quotes and backslash escapes.
/// `#` outside quotes starts a comment that runs to the end of the line.
fn split_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '#' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
                while chars.next_if(|&n| n != '\n').is_some() {}
            }
            '\'' => {
                in_token = true;
                for n in chars.by_ref() {
                    if n == '\'' {
                        break;
                    }
                    current.push(n);
                }
            }
            '"' => {
                in_token = true;
                while let Some(n) = chars.next() {
                    match n {
                        '"' => break,
                        '\\' => match chars.next_if(|&e| matches!(e, '"' | '\\')) {
                            Some(escaped) => current.push(escaped),
                            None => current.push('\\'),
                        },
                        _ => current.push(n),
                    }
                }
            }
            '\\' => {
                if let Some(n) = chars.next() {
                    if n != '\n' {
                        in_token = true;
                        current.push(n);
                    }
                }
            }
            _ => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}
