//! Rule engine - per-graph configuration overlays
//!
//! A rule pairs a tag pattern with an action. The pattern is checked against a
//! graph's constants (including promoted ones); every matching rule's action is
//! applied in table order. Actions either merge static fields into the graph or
//! run a named transform.
//!
//! ```yaml
//! - match: { what: bytes, server: [web01, web02], type: /^rx/ }
//!   merge: { vtitle: "B/s", state: stacked }
//! - match: {}
//!   transform: title_from_constants
//! ```

use crate::error::{GraphError, Result};
use crate::model::Graph;
use graphex_core::{Diagnostics, Tags};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Matcher for a single tag value
#[derive(Debug, Clone)]
pub enum ValuePattern {
    Exact(String),
    AnyOf(Vec<String>),
    /// Written as `/regex/`
    Regex(Regex),
}

impl ValuePattern {
    /// Parse a single string: `/.../` is a regex, anything else an exact value
    pub fn parse(raw: &str) -> Result<Self> {
        match raw
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(body) if raw.len() >= 2 => Regex::new(body)
                .map(ValuePattern::Regex)
                .map_err(|e| GraphError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                }),
            _ => Ok(ValuePattern::Exact(raw.to_string())),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            ValuePattern::Exact(expected) => expected == value,
            ValuePattern::AnyOf(options) => options.iter().any(|o| o == value),
            ValuePattern::Regex(re) => re.is_match(value),
        }
    }
}

/// Tag name -> value pattern. Every entry must match; an empty pattern matches all graphs.
#[derive(Debug, Clone, Default)]
pub struct TagPattern {
    entries: BTreeMap<String, ValuePattern>,
}

impl TagPattern {
    /// Pattern that matches every graph
    pub fn any() -> Self {
        Self::default()
    }

    /// Require `tag` to match `pattern` (builder style)
    pub fn with(mut self, tag: impl Into<String>, pattern: ValuePattern) -> Self {
        self.entries.insert(tag.into(), pattern);
        self
    }

    /// Require `tag` to equal `value` exactly (builder style)
    pub fn with_value(self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(tag, ValuePattern::Exact(value.into()))
    }

    pub fn matches(&self, constants: &Tags) -> bool {
        self.entries.iter().all(|(tag, pattern)| {
            constants
                .get(tag)
                .is_some_and(|value| pattern.matches(value))
        })
    }
}

type TransformFn = dyn Fn(Graph) -> Result<Graph> + Send + Sync;

/// Named function from graph configuration to graph configuration
#[derive(Clone)]
pub struct GraphTransform {
    name: String,
    func: Arc<TransformFn>,
}

impl GraphTransform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Graph) -> Result<Graph> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Look up a built-in transform by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "title_from_constants" => Some(Self::new(name, title_from_constants)),
            "vtitle_from_unit" => Some(Self::new(name, vtitle_from_unit)),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, graph: Graph) -> Result<Graph> {
        (self.func)(graph)
    }
}

impl fmt::Debug for GraphTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphTransform")
            .field("name", &self.name)
            .finish()
    }
}

/// Title made of all constant values, in tag name order
fn title_from_constants(mut graph: Graph) -> Result<Graph> {
    let title = graph
        .all_constants()
        .into_values()
        .collect::<Vec<_>>()
        .join(" ");
    graph.options.insert("title".to_string(), Value::String(title));
    Ok(graph)
}

/// Vertical axis title from the `unit` constant
fn vtitle_from_unit(mut graph: Graph) -> Result<Graph> {
    let unit = graph
        .all_constants()
        .remove("unit")
        .ok_or_else(|| GraphError::Transform {
            name: "vtitle_from_unit".to_string(),
            reason: "graph has no constant unit".to_string(),
        })?;
    graph.options.insert("vtitle".to_string(), Value::String(unit));
    Ok(graph)
}

/// What a matching rule does to a graph
#[derive(Debug, Clone)]
pub enum Action {
    Merge(Map<String, Value>),
    Transform(GraphTransform),
}

impl Action {
    pub fn apply(&self, graph: Graph) -> Result<Graph> {
        match self {
            Action::Merge(fields) => graph.merge_fields(fields),
            Action::Transform(transform) => transform.apply(graph),
        }
    }

    fn describe(&self) -> String {
        match self {
            Action::Merge(fields) => {
                format!("merge {}", fields.keys().cloned().collect::<Vec<_>>().join(","))
            }
            Action::Transform(transform) => format!("transform {}", transform.name()),
        }
    }
}

/// A single rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: TagPattern,
    pub action: Action,
}

impl Rule {
    pub fn merge(pattern: TagPattern, fields: Map<String, Value>) -> Self {
        Self {
            pattern,
            action: Action::Merge(fields),
        }
    }

    pub fn transform(pattern: TagPattern, transform: GraphTransform) -> Self {
        Self {
            pattern,
            action: Action::Transform(transform),
        }
    }
}

/// Value side of a rule pattern as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValuePatternConfig {
    One(String),
    Many(Vec<String>),
}

/// A rule as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "match", default)]
    pub pattern: BTreeMap<String, ValuePatternConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl TryFrom<&RuleConfig> for Rule {
    type Error = GraphError;

    fn try_from(config: &RuleConfig) -> Result<Self> {
        let mut pattern = TagPattern::any();
        for (tag, value) in &config.pattern {
            let value = match value {
                ValuePatternConfig::One(raw) => ValuePattern::parse(raw)?,
                ValuePatternConfig::Many(options) => ValuePattern::AnyOf(options.clone()),
            };
            pattern = pattern.with(tag.clone(), value);
        }

        let action = match (&config.merge, &config.transform) {
            (Some(fields), None) => Action::Merge(fields.clone()),
            (None, Some(name)) => Action::Transform(
                GraphTransform::builtin(name)
                    .ok_or_else(|| GraphError::UnknownTransform(name.clone()))?,
            ),
            _ => {
                return Err(GraphError::InvalidRule(
                    "exactly one of 'merge' or 'transform' is required".to_string(),
                ))
            }
        };

        Ok(Rule { pattern, action })
    }
}

/// Ordered list of rules
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule (builder style)
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build from configuration. Invalid rules are skipped and reported.
    pub fn from_config(configs: &[RuleConfig]) -> (Self, Diagnostics) {
        let mut table = RuleTable::new();
        let mut diagnostics = Diagnostics::new();
        for (i, config) in configs.iter().enumerate() {
            match Rule::try_from(config) {
                Ok(rule) => table.rules.push(rule),
                Err(e) => {
                    warn!("Skipping rule #{}: {}", i, e);
                    diagnostics.error(format!("rule #{}", i), e.to_string());
                }
            }
        }
        (table, diagnostics)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Actions of every rule matching these constants, in table order
    pub fn matching<'a>(&'a self, constants: &'a Tags) -> impl Iterator<Item = &'a Action> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.pattern.matches(constants))
            .map(|rule| &rule.action)
    }

    /// Apply every matching action to `graph`.
    ///
    /// If any action fails, the graph is returned exactly as it was before the
    /// first rule ran and the failure is recorded against `key`.
    pub fn apply(&self, key: &str, graph: Graph, diagnostics: &mut Diagnostics) -> Graph {
        let constants = graph.all_constants();
        let original = graph.clone();
        let mut graph = graph;

        for action in self.matching(&constants) {
            match action.apply(graph) {
                Ok(next) => graph = next,
                Err(e) => {
                    warn!(graph = key, "Rule {} failed: {}", action.describe(), e);
                    diagnostics.error(key, format!("{} failed: {}", action.describe(), e));
                    return original;
                }
            }
        }
        debug!(graph = key, "Applied rules");
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> Graph {
        let mut graph = Graph::new("-1hour", "now");
        graph.constants.insert("server".into(), "web01".into());
        graph.constants.insert("what".into(), "bytes".into());
        graph.promoted_constants.insert("type".into(), "rx".into());
        graph
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_value_patterns() {
        assert!(ValuePattern::parse("web01").unwrap().matches("web01"));
        assert!(!ValuePattern::parse("web01").unwrap().matches("web011"));
        assert!(ValuePattern::parse("/^web/").unwrap().matches("web02"));
        assert!(!ValuePattern::parse("/^web/").unwrap().matches("db01"));
        assert!(matches!(ValuePattern::parse("/").unwrap(), ValuePattern::Exact(_)));
        assert!(ValuePattern::parse("/(/").is_err());
        assert!(ValuePattern::AnyOf(vec!["a".into(), "b".into()]).matches("b"));
    }

    #[test]
    fn test_tag_pattern_matching() {
        let constants = graph().all_constants();
        assert!(TagPattern::any().matches(&constants));
        assert!(TagPattern::any().with_value("server", "web01").matches(&constants));
        assert!(TagPattern::any().with_value("type", "rx").matches(&constants));
        assert!(!TagPattern::any().with_value("unit", "B").matches(&constants));
        assert!(!TagPattern::any()
            .with_value("server", "web01")
            .with_value("what", "cpu")
            .matches(&constants));
    }

    #[test]
    fn test_apply_in_table_order() {
        let table = RuleTable::new()
            .rule(Rule::merge(TagPattern::any(), fields(json!({ "title": "first" }))))
            .rule(Rule::merge(
                TagPattern::any().with_value("what", "bytes"),
                fields(json!({ "title": "bytes", "vtitle": "B" })),
            ))
            .rule(Rule::merge(
                TagPattern::any().with_value("what", "cpu"),
                fields(json!({ "title": "cpu" })),
            ));

        let mut diagnostics = Diagnostics::new();
        let graph = table.apply("web01__bytes", graph(), &mut diagnostics);
        assert_eq!(graph.option_str("title"), Some("bytes"));
        assert_eq!(graph.option_str("vtitle"), Some("B"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_builtin_transforms() {
        let table = RuleTable::new().rule(Rule::transform(
            TagPattern::any(),
            GraphTransform::builtin("title_from_constants").unwrap(),
        ));
        let mut diagnostics = Diagnostics::new();
        let graph = table.apply("k", graph(), &mut diagnostics);
        assert_eq!(graph.option_str("title"), Some("web01 rx bytes"));

        assert!(GraphTransform::builtin("nope").is_none());
    }

    #[test]
    fn test_failing_transform_reverts_graph() {
        let table = RuleTable::new()
            .rule(Rule::merge(TagPattern::any(), fields(json!({ "title": "set" }))))
            .rule(Rule::transform(
                TagPattern::any(),
                GraphTransform::builtin("vtitle_from_unit").unwrap(),
            ))
            .rule(Rule::merge(TagPattern::any(), fields(json!({ "state": "stacked" }))));

        let mut diagnostics = Diagnostics::new();
        let before = graph();
        let after = table.apply("web01__bytes", before.clone(), &mut diagnostics);

        assert_eq!(after, before);
        assert_eq!(diagnostics.len(), 1);
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.source, "web01__bytes");
        assert!(diagnostic.message.contains("vtitle_from_unit"));
    }

    #[test]
    fn test_custom_transform_may_reshape_graph() {
        let table = RuleTable::new().rule(Rule::transform(
            TagPattern::any(),
            GraphTransform::new("window", |mut graph: Graph| {
                graph.from = "-7days".to_string();
                Ok(graph)
            }),
        ));
        let mut diagnostics = Diagnostics::new();
        assert_eq!(table.apply("k", graph(), &mut diagnostics).from, "-7days");
    }

    #[test]
    fn test_rules_from_yaml() {
        let yaml = r#"
- match: { what: bytes, server: [web01, web02], type: /^r/ }
  merge: { vtitle: "B/s" }
- match: {}
  transform: title_from_constants
- match: { what: bytes }
  transform: does_not_exist
- match: { what: bytes }
"#;
        let configs: Vec<RuleConfig> = serde_yaml::from_str(yaml).unwrap();
        let (table, diagnostics) = RuleTable::from_config(&configs);

        assert_eq!(table.len(), 2);
        assert_eq!(diagnostics.len(), 2);

        let constants = graph().all_constants();
        assert_eq!(table.matching(&constants).count(), 2);

        let mut other = graph();
        other.constants.insert("server".into(), "db01".into());
        assert_eq!(table.matching(&other.all_constants()).count(), 1);
    }
}
