//! Graph builder
//!
//! Turns a set of matched targets into graphs:
//!
//! 1. **Partition** - split each target's tags into constants (named by the
//!    query's group-by) and variables; targets sharing constant values share a graph
//! 2. **Aggregate** - collapse candidate groups into `sumSeries`/`averageSeries`
//!    targets, sum first, then average over the post-sum set
//! 3. **Limit** - global cap on targets across all graphs, in graph key order
//! 4. **Promote** - variables on which every target of a graph agrees become
//!    promoted constants
//! 5. **Rules** - per-graph overlays from the rule table
//!
//! Building is a pure function of the targets and the query.

use crate::model::{Graph, GraphDefinition, GraphTarget};
use crate::rules::RuleTable;
use graphex_core::{Diagnostics, Tags, Target};
use graphex_query::Query;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Separator between constant values in a graph key
pub const KEY_SEPARATOR: &str = "__";

/// Backend function used to sum series
pub const SUM_FUNCTION: &str = "sumSeries";

/// Backend function used to average series
pub const AVG_FUNCTION: &str = "averageSeries";

/// Graphs keyed by graph key, plus anything worth reporting
#[derive(Debug, Clone, Default)]
pub struct GraphSet {
    pub graphs: BTreeMap<String, Graph>,
    pub diagnostics: Diagnostics,
}

impl GraphSet {
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Total number of targets across all graphs
    pub fn target_count(&self) -> usize {
        self.graphs.values().map(|g| g.targets.len()).sum()
    }
}

/// Candidate key: aggregated tags present as variables, then the remaining variables
type CandidateKey = (Vec<String>, Vec<(String, String)>);

/// Builds graphs for one query
pub struct GraphBuilder<'a> {
    query: &'a Query,
    rules: Option<&'a RuleTable>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(query: &'a Query) -> Self {
        Self { query, rules: None }
    }

    /// Apply this rule table to every built graph
    pub fn with_rules(mut self, rules: &'a RuleTable) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Run every step
    pub fn build(&self, targets: &BTreeMap<String, Target>) -> GraphSet {
        if targets.is_empty() {
            return GraphSet::default();
        }

        let mut graphs = self.partition(targets);
        if self.query.has_aggregation() {
            for graph in graphs.values_mut() {
                self.aggregate(graph);
            }
        }

        let mut graphs = limit_targets(graphs, self.query.limit_targets);
        for graph in graphs.values_mut() {
            promote_constants(graph);
        }

        let mut diagnostics = Diagnostics::new();
        if let Some(rules) = self.rules.filter(|r| !r.is_empty()) {
            graphs = graphs
                .into_iter()
                .map(|(key, graph)| {
                    let graph = rules.apply(&key, graph, &mut diagnostics);
                    (key, graph)
                })
                .collect();
        }

        debug!(
            targets = targets.len(),
            graphs = graphs.len(),
            "Built graphs from targets"
        );
        GraphSet { graphs, diagnostics }
    }

    /// Group targets into graphs by their constant tag values
    pub fn partition(&self, targets: &BTreeMap<String, Target>) -> BTreeMap<String, Graph> {
        let mut graphs: BTreeMap<String, Graph> = BTreeMap::new();

        for target in targets.values() {
            let (constants, variables): (Tags, Tags) = target
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .partition(|(k, _)| self.query.groups_by(k));

            let key = self.graph_key(&constants);
            graphs
                .entry(key)
                .or_insert_with(|| Graph {
                    constants,
                    ..Graph::new(&self.query.from, &self.query.to)
                })
                .targets
                .push(GraphTarget::from_target(target, variables));
        }

        graphs
    }

    /// Constant values in group-by order
    fn graph_key(&self, constants: &Tags) -> String {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for entry in &self.query.group_by {
            let name = entry.strip_suffix('=').unwrap_or(entry);
            if !seen.insert(name) {
                continue;
            }
            if let Some(value) = constants.get(name) {
                values.push(value.as_str());
            }
        }
        values.join(KEY_SEPARATOR)
    }

    /// Sum pass, then average pass over the result
    pub fn aggregate(&self, graph: &mut Graph) {
        let targets = std::mem::take(&mut graph.targets);
        let targets = aggregate_pass(targets, &self.query.sum_by, SUM_FUNCTION);
        graph.targets = aggregate_pass(targets, &self.query.avg_by, AVG_FUNCTION);
    }
}

/// Collapse every candidate group of two or more targets.
///
/// Targets that are not collapsed keep their order; aggregates follow in
/// candidate key order.
fn aggregate_pass(targets: Vec<GraphTarget>, by: &BTreeSet<String>, func: &str) -> Vec<GraphTarget> {
    if by.is_empty() {
        return targets;
    }

    let mut candidates: BTreeMap<CandidateKey, Vec<usize>> = BTreeMap::new();
    for (i, target) in targets.iter().enumerate() {
        let aggregated: Vec<String> = target
            .variables
            .keys()
            .filter(|k| by.contains(*k))
            .cloned()
            .collect();
        if aggregated.is_empty() {
            continue;
        }
        let rest: Vec<(String, String)> = target
            .variables
            .iter()
            .filter(|(k, _)| !by.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        candidates.entry((aggregated, rest)).or_default().push(i);
    }

    let mut slots: Vec<Option<GraphTarget>> = targets.into_iter().map(Some).collect();
    let mut aggregates = Vec::new();
    for ((aggregated, _), members) in candidates {
        if members.len() < 2 {
            continue;
        }
        let members: Vec<GraphTarget> = members
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        aggregates.push(aggregate_targets(&members, &aggregated, func));
    }

    slots.into_iter().flatten().chain(aggregates).collect()
}

/// One target standing for all `members`
fn aggregate_targets(members: &[GraphTarget], aggregated: &[String], func: &str) -> GraphTarget {
    let expression = members
        .iter()
        .map(|m| m.target.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut variables = members
        .first()
        .map(|m| m.variables.clone())
        .unwrap_or_default();
    let placeholder = format!("{} ({} values)", func, members.len());
    for tag in aggregated {
        variables.insert(tag.clone(), placeholder.clone());
    }

    GraphTarget {
        target: format!("{}({})", func, expression),
        variables,
        color: None,
        sources: members.iter().flat_map(|m| m.sources.iter().cloned()).collect(),
    }
}

/// Keep at most `limit` targets across all graphs, walking graphs in key order.
/// Graphs left without targets are dropped.
pub fn limit_targets(graphs: BTreeMap<String, Graph>, limit: usize) -> BTreeMap<String, Graph> {
    let mut remaining = limit;
    let mut limited = BTreeMap::new();

    for (key, mut graph) in graphs {
        if remaining == 0 {
            break;
        }
        graph.targets.truncate(remaining);
        remaining -= graph.targets.len();
        if !graph.targets.is_empty() {
            limited.insert(key, graph);
        }
    }

    limited
}

/// Move variables on which every target agrees into the promoted constants.
/// A tag missing from a target counts as a value of its own.
pub fn promote_constants(graph: &mut Graph) {
    let seen: BTreeSet<String> = graph
        .targets
        .iter()
        .flat_map(|t| t.variables.keys().cloned())
        .collect();

    for tag in seen {
        let first = graph
            .targets
            .first()
            .and_then(|t| t.variables.get(&tag))
            .cloned();
        let agreed = graph
            .targets
            .iter()
            .all(|t| t.variables.get(&tag) == first.as_ref());

        if let (true, Some(value)) = (agreed, first) {
            for target in &mut graph.targets {
                target.variables.remove(&tag);
            }
            graph.promoted_constants.insert(tag, value);
        }
    }
}

/// Predefined graphs for a query's time window, keyed by definition id
pub fn build_definitions<'d>(
    definitions: impl IntoIterator<Item = &'d GraphDefinition>,
    query: &Query,
) -> BTreeMap<String, Graph> {
    definitions
        .into_iter()
        .map(|def| {
            let mut graph = def.graph.clone();
            graph.from = query.from.clone();
            graph.until = query.to.clone();
            (def.id.clone(), graph)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{GraphTransform, Rule, TagPattern};
    use graphex_query::QueryParser;

    fn targets(items: Vec<Target>) -> BTreeMap<String, Target> {
        items.into_iter().map(|t| (t.id.clone(), t)).collect()
    }

    fn bytes_target(id: &str, server: &str, unit: &str) -> Target {
        Target::new(id)
            .tag("server", server)
            .tag("what", "bytes")
            .tag("unit", unit)
    }

    #[test]
    fn test_empty_targets_give_no_graphs() {
        let query = Query::default();
        let set = GraphBuilder::new(&query).build(&BTreeMap::new());
        assert!(set.is_empty());
        assert!(set.diagnostics.is_empty());
    }

    #[test]
    fn test_differing_variable_stays_variable() {
        let query = QueryParser::parse("graph server=web01 what=bytes");
        let set = GraphBuilder::new(&query).build(&targets(vec![
            bytes_target("a", "web01", "used"),
            bytes_target("b", "web01", "free"),
        ]));

        assert_eq!(set.len(), 1);
        let (key, graph) = set.graphs.iter().next().unwrap();
        assert_eq!(key, "bytes__web01");
        assert_eq!(graph.constants["server"], "web01");
        assert_eq!(graph.constants["what"], "bytes");
        assert_eq!(graph.targets.len(), 2);
        assert!(graph.promoted_constants.is_empty());
        assert_eq!(graph.targets[0].variables["unit"], "used");
        assert_eq!(graph.targets[1].variables["unit"], "free");
        assert_eq!(graph.from, "-24hours");
        assert_eq!(graph.until, "now");
    }

    #[test]
    fn test_agreeing_variable_is_promoted() {
        let query = QueryParser::parse("graph server=web01 what=bytes");
        let set = GraphBuilder::new(&query).build(&targets(vec![
            bytes_target("a", "web01", "used"),
            bytes_target("b", "web01", "used"),
        ]));

        let graph = &set.graphs["bytes__web01"];
        assert_eq!(graph.promoted_constants["unit"], "used");
        assert!(graph.targets.iter().all(|t| !t.variables.contains_key("unit")));
    }

    #[test]
    fn test_absence_blocks_promotion() {
        let query = QueryParser::parse("GROUP BY what");
        let set = GraphBuilder::new(&query).build(&targets(vec![
            Target::new("a").tag("what", "bytes").tag("type", "rx"),
            Target::new("b").tag("what", "bytes"),
        ]));
        let graph = &set.graphs["bytes"];
        assert!(graph.promoted_constants.is_empty());
        assert_eq!(graph.targets[0].variables["type"], "rx");
    }

    #[test]
    fn test_graph_key_follows_group_by_order() {
        let query = QueryParser::parse("GROUP BY what,server");
        let builder = GraphBuilder::new(&query);
        let graphs = builder.partition(&targets(vec![
            bytes_target("b", "web02", "B"),
            bytes_target("a", "web01", "B"),
            bytes_target("c", "web01", "B"),
        ]));

        assert_eq!(
            graphs.keys().collect::<Vec<_>>(),
            vec!["bytes__web01", "bytes__web02"]
        );
        let ids: Vec<&str> = graphs["bytes__web01"]
            .targets
            .iter()
            .map(|t| t.target.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_sum_by_collapses_group() {
        let query = QueryParser::parse("sum by server what=bytes");
        let builder = GraphBuilder::new(&query);
        let mut graphs = builder.partition(&targets(vec![
            Target::new("s1.rx").tag("server", "s1").tag("what", "bytes"),
            Target::new("s2.rx").tag("server", "s2").tag("what", "bytes"),
            Target::new("s3.rx").tag("server", "s3").tag("what", "bytes"),
        ]));
        assert_eq!(graphs.len(), 1);

        let graph = graphs.get_mut("bytes").unwrap();
        builder.aggregate(graph);
        assert_eq!(graph.targets.len(), 1);
        let summed = &graph.targets[0];
        assert_eq!(summed.target, "sumSeries(s1.rx,s2.rx,s3.rx)");
        assert_eq!(summed.variables["server"], "sumSeries (3 values)");
        assert_eq!(summed.sources, vec!["s1.rx", "s2.rx", "s3.rx"]);

        // a lone line in its graph gets every variable promoted
        let set = builder.build(&targets(vec![
            Target::new("s1.rx").tag("server", "s1").tag("what", "bytes"),
            Target::new("s2.rx").tag("server", "s2").tag("what", "bytes"),
        ]));
        assert_eq!(set.graphs["bytes"].promoted_constants["server"], "sumSeries (2 values)");
    }

    #[test]
    fn test_sum_keeps_distinct_variables_apart() {
        let query = QueryParser::parse("GROUP BY what sum by server");
        let builder = GraphBuilder::new(&query);
        let mut graphs = builder.partition(&targets(vec![
            Target::new("a").tag("what", "bytes").tag("server", "s1").tag("type", "rx"),
            Target::new("b").tag("what", "bytes").tag("server", "s2").tag("type", "rx"),
            Target::new("c").tag("what", "bytes").tag("server", "s1").tag("type", "tx"),
            Target::new("d").tag("what", "bytes").tag("type", "tx"),
        ]));
        let graph = graphs.get_mut("bytes").unwrap();
        builder.aggregate(graph);

        let lines: Vec<&str> = graph.targets.iter().map(|t| t.target.as_str()).collect();
        // `c` has no partner with the same remaining variables, `d` has no server
        assert_eq!(lines, vec!["c", "d", "sumSeries(a,b)"]);
        assert_eq!(graph.targets[2].variables["type"], "rx");
    }

    #[test]
    fn test_avg_runs_over_summed_targets() {
        let query = QueryParser::parse("GROUP BY what sum by core avg by server");
        let builder = GraphBuilder::new(&query);
        let mut graphs = builder.partition(&targets(vec![
            Target::new("s1.c0").tag("what", "cpu").tag("server", "s1").tag("core", "0"),
            Target::new("s1.c1").tag("what", "cpu").tag("server", "s1").tag("core", "1"),
            Target::new("s2.c0").tag("what", "cpu").tag("server", "s2").tag("core", "0"),
            Target::new("s2.c1").tag("what", "cpu").tag("server", "s2").tag("core", "1"),
        ]));
        let graph = graphs.get_mut("cpu").unwrap();
        builder.aggregate(graph);

        assert_eq!(graph.targets.len(), 1);
        let line = &graph.targets[0];
        assert_eq!(
            line.target,
            "averageSeries(sumSeries(s1.c0,s1.c1),sumSeries(s2.c0,s2.c1))"
        );
        assert_eq!(line.variables["core"], "sumSeries (2 values)");
        assert_eq!(line.variables["server"], "averageSeries (2 values)");
        assert_eq!(line.sources.len(), 4);
    }

    #[test]
    fn test_global_limit() {
        let query = QueryParser::parse("GROUP BY server limit 3");
        let all = targets(vec![
            bytes_target("a1", "a", "x"),
            bytes_target("a2", "a", "y"),
            bytes_target("b1", "b", "x"),
            bytes_target("b2", "b", "y"),
            bytes_target("c1", "c", "x"),
        ]);
        let set = GraphBuilder::new(&query).build(&all);
        assert_eq!(set.target_count(), 3);
        assert_eq!(set.graphs.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.graphs["b"].targets.len(), 1);

        let query = QueryParser::parse("GROUP BY server limit 0");
        assert!(GraphBuilder::new(&query).build(&all).is_empty());
    }

    #[test]
    fn test_definitions_take_query_window() {
        let query = QueryParser::parse("from -2days to -1days");
        let def = GraphDefinition::new("cpu", Tags::new(), Graph::new("-1hour", "now"));
        let graphs = build_definitions([&def], &query);
        assert_eq!(graphs["cpu"].from, "-2days");
        assert_eq!(graphs["cpu"].until, "-1days");
    }

    #[test]
    fn test_rules_applied_to_built_graphs() {
        let rules = RuleTable::new()
            .rule(Rule::transform(
                TagPattern::any().with_value("what", "bytes"),
                GraphTransform::builtin("title_from_constants").unwrap(),
            ))
            .rule(Rule::transform(
                TagPattern::any().with_value("server", "web02"),
                GraphTransform::builtin("vtitle_from_unit").unwrap(),
            ));
        let query = QueryParser::parse("GROUP BY what,server");
        let set = GraphBuilder::new(&query).with_rules(&rules).build(&targets(vec![
            bytes_target("a", "web01", "B"),
            bytes_target("b", "web02", "B"),
            bytes_target("c", "web02", "b"),
        ]));

        // single target, so unit is promoted and available to rules
        assert_eq!(set.graphs["bytes__web01"].option_str("title"), Some("web01 B bytes"));
        // web02 has two units, vtitle fails and the graph keeps its pre-rule shape
        assert_eq!(set.graphs["bytes__web02"].option_str("title"), None);
        assert_eq!(set.diagnostics.len(), 1);
    }
}
