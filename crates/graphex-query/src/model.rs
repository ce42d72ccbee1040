//! Query model - Structured form of a free-text query

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default start of the time window
pub const DEFAULT_FROM: &str = "-24hours";
/// Default end of the time window
pub const DEFAULT_TO: &str = "now";
/// Default global cap on the number of targets returned
pub const DEFAULT_LIMIT_TARGETS: usize = 500;

/// Default group-by list: presence markers for `target_type` and `what`, plus `server`
pub fn default_group_by() -> Vec<String> {
    vec!["target_type=".to_string(), "what=".to_string(), "server".to_string()]
}

/// What the caller wants back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statement {
    /// Graphs grouping matched targets
    #[default]
    Graph,
    /// Flat list of matched targets
    List,
}

impl Statement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statement::Graph => "graph",
            Statement::List => "list",
        }
    }

    /// Parse a statement keyword
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "graph" => Some(Statement::Graph),
            "list" => Some(Statement::List),
            _ => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub statement: Statement,
    /// Opaque time reference understood by the time-series backend
    pub from: String,
    /// Opaque time reference understood by the time-series backend
    pub to: String,
    /// Tag names (`server`) or presence markers (`server=`) that split targets into graphs.
    /// Order matters: it orders the values making up each graph key.
    pub group_by: Vec<String>,
    /// Tags summed across series
    pub sum_by: BTreeSet<String>,
    /// Tags averaged across series
    pub avg_by: BTreeSet<String>,
    /// Global cap on targets across all graphs
    pub limit_targets: usize,
    /// Raw match tokens
    pub patterns: Vec<String>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            statement: Statement::Graph,
            from: DEFAULT_FROM.to_string(),
            to: DEFAULT_TO.to_string(),
            group_by: default_group_by(),
            sum_by: BTreeSet::new(),
            avg_by: BTreeSet::new(),
            limit_targets: DEFAULT_LIMIT_TARGETS,
            patterns: Vec::new(),
        }
    }
}

impl Query {
    /// Create a new query builder
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Validate the query.
    ///
    /// A tag cannot be summed and averaged at the same time.
    pub fn validate(&self) -> Result<()> {
        if let Some(tag) = self.sum_by.intersection(&self.avg_by).next() {
            return Err(QueryError::AmbiguousAggregation(tag.clone()));
        }
        Ok(())
    }

    /// True if targets are split into graphs by this tag
    pub fn groups_by(&self, tag: &str) -> bool {
        self.group_by
            .iter()
            .any(|g| g == tag || g.strip_suffix('=') == Some(tag))
    }

    /// True if any cross-series aggregation was requested
    pub fn has_aggregation(&self) -> bool {
        !self.sum_by.is_empty() || !self.avg_by.is_empty()
    }

    /// Drop aggregated tags from the group-by list, both as `tag` and `tag=`
    pub(crate) fn ungroup_aggregated(&mut self) {
        let aggregated: BTreeSet<&str> = self
            .sum_by
            .iter()
            .chain(self.avg_by.iter())
            .map(String::as_str)
            .collect();
        self.group_by.retain(|g| {
            let name = g.strip_suffix('=').unwrap_or(g);
            !aggregated.contains(name)
        });
    }
}

/// Query builder for fluent API
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Create a new query builder with default settings
    pub fn new() -> Self {
        Self {
            query: Query::default(),
        }
    }

    /// Set the statement
    pub fn statement(mut self, statement: Statement) -> Self {
        self.query.statement = statement;
        self
    }

    /// Set the time window
    pub fn time_range(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.query.from = from.into();
        self.query.to = to.into();
        self
    }

    /// Replace the group-by list
    pub fn group_by<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.group_by = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sum across these tags
    pub fn sum_by<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.sum_by.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Average across these tags
    pub fn avg_by<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.avg_by.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Limit the total number of targets
    pub fn limit_targets(mut self, limit: usize) -> Self {
        self.query.limit_targets = limit;
        self
    }

    /// Add a raw match token
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.query.patterns.push(pattern.into());
        self
    }

    /// Build the query
    pub fn build(self) -> Result<Query> {
        let mut query = self.query;
        query.ungroup_aggregated();
        query.validate()?;
        Ok(query)
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let query = Query::default();
        assert_eq!(query.statement, Statement::Graph);
        assert_eq!(query.from, "-24hours");
        assert_eq!(query.to, "now");
        assert_eq!(query.group_by, vec!["target_type=", "what=", "server"]);
        assert_eq!(query.limit_targets, 500);
        assert!(!query.has_aggregation());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::builder()
            .statement(Statement::List)
            .time_range("-1hour", "now")
            .group_by(["server", "what="])
            .limit_targets(10)
            .pattern("cpu")
            .build()
            .unwrap();

        assert_eq!(query.statement, Statement::List);
        assert_eq!(query.from, "-1hour");
        assert!(query.groups_by("server"));
        assert!(query.groups_by("what"));
        assert!(!query.groups_by("type"));
        assert_eq!(query.patterns, vec!["cpu"]);
    }

    #[test]
    fn test_builder_removes_aggregated_tags_from_group_by() {
        let query = Query::builder()
            .group_by(["server", "what=", "type"])
            .sum_by(["server", "what"])
            .build()
            .unwrap();

        assert_eq!(query.group_by, vec!["type"]);
        assert!(query.has_aggregation());
    }

    #[test]
    fn test_query_validation() {
        let result = Query::builder().sum_by(["server"]).avg_by(["server"]).build();
        assert!(matches!(result, Err(QueryError::AmbiguousAggregation(tag)) if tag == "server"));

        let result = Query::builder().sum_by(["server"]).avg_by(["type"]).build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_statement_serialization() {
        assert_eq!(serde_json::to_string(&Statement::List).unwrap(), "\"list\"");
        assert_eq!(Statement::from_keyword("graph"), Some(Statement::Graph));
        assert_eq!(Statement::from_keyword("GRAPH"), None);
    }
}
