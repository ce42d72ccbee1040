//! Graph explorer - the query-to-graphs pipeline behind every endpoint
//!
//! One call to [`GraphExplorer::render_graphs`] parses the query, fetches the
//! matching targets from the tag index, matches predefined graph definitions and
//! builds graphs. Nothing is cached between calls.

use crate::error::Result;
use graphex_core::{Diagnostics, Target};
use graphex_graph::{build_definitions, Graph, GraphBuilder, GraphDefinition, RuleTable};
use graphex_index::{IndexFilter, IndexQueryTranslator, TagStore, DEFAULT_SEARCH_SIZE};
use graphex_query::{CompileMode, PatternSet, Query, QueryParser, Statement};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts of what was seen versus what matched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExplorerStats {
    /// Targets in the index
    pub targets_all: usize,
    /// Predefined graph definitions
    pub graphs_all: usize,
    /// Targets matching the query
    pub targets_matching: usize,
    /// Graph definitions matching the query
    pub graphs_matching: usize,
    /// Graphs built from matching targets
    pub graphs_targets_matching: usize,
    /// All graphs returned
    pub graphs_matching_all: usize,
    /// The index returned as many targets as the search size allows, more may exist
    pub targets_truncated: bool,
}

/// Everything the presentation layer needs for one query
#[derive(Debug, Clone, Serialize)]
pub struct ExplorerResponse {
    pub query: Query,
    /// Graphs ordered by graph key
    pub graphs: Vec<(String, Graph)>,
    /// Matching targets, filled for `list` statements only
    pub targets_list: BTreeMap<String, Target>,
    /// Every tag name seen on a matching target
    pub tags: BTreeSet<String>,
    pub stats: ExplorerStats,
    pub diagnostics: Diagnostics,
}

/// Query engine bound to a tag store, graph definitions and rules
pub struct GraphExplorer {
    store: Arc<dyn TagStore>,
    definitions: BTreeMap<String, GraphDefinition>,
    rules: RuleTable,
    search_size: usize,
}

impl GraphExplorer {
    pub fn new(store: Arc<dyn TagStore>) -> Self {
        Self {
            store,
            definitions: BTreeMap::new(),
            rules: RuleTable::new(),
            search_size: DEFAULT_SEARCH_SIZE,
        }
    }

    /// Add predefined graphs (builder style). Later definitions replace earlier ones with the same id.
    pub fn with_definitions(mut self, definitions: impl IntoIterator<Item = GraphDefinition>) -> Self {
        self.definitions
            .extend(definitions.into_iter().map(|d| (d.id.clone(), d)));
        self
    }

    /// Set the rule table (builder style)
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Maximum number of targets fetched per query (builder style)
    pub fn with_search_size(mut self, size: usize) -> Self {
        self.search_size = size;
        self
    }

    pub fn store(&self) -> &Arc<dyn TagStore> {
        &self.store
    }

    pub fn definitions(&self) -> &BTreeMap<String, GraphDefinition> {
        &self.definitions
    }

    /// Run a free-text query
    pub async fn render_graphs(&self, raw: &str) -> Result<ExplorerResponse> {
        let query = QueryParser::parse(raw);
        query.validate()?;
        let mut diagnostics = Diagnostics::new();

        let patterns = PatternSet::from_query(&query, CompileMode::Targets);
        diagnostics.extend(patterns.diagnostics().clone());

        let filter = IndexQueryTranslator::translate_with_diagnostics(&patterns, &mut diagnostics);
        debug!(?filter, "Translated query '{}'", raw);
        let targets_matching = self.store.search_targets(&filter, self.search_size).await?;
        let targets_all = self.store.count().await?;

        let targets_truncated = self.search_size > 0 && targets_matching.len() >= self.search_size;
        if targets_truncated {
            warn!("Query '{}' hit the search size of {} targets", raw, self.search_size);
            diagnostics.warn(
                raw,
                format!("results truncated at {} targets, refine the query", self.search_size),
            );
        }

        let tags: BTreeSet<String> = targets_matching
            .values()
            .flat_map(|t| t.tags.keys().cloned())
            .collect();

        let graph_patterns = PatternSet::from_query(&query, CompileMode::Graphs);
        let definitions_matching = graph_patterns.filter(&self.definitions);
        let mut graphs = build_definitions(definitions_matching.values(), &query);

        let mut stats = ExplorerStats {
            targets_all,
            graphs_all: self.definitions.len(),
            targets_matching: targets_matching.len(),
            graphs_matching: graphs.len(),
            targets_truncated,
            ..Default::default()
        };

        let targets_list = match query.statement {
            Statement::Graph => {
                let built = GraphBuilder::new(&query)
                    .with_rules(&self.rules)
                    .build(&targets_matching);
                stats.graphs_targets_matching = built.len();
                diagnostics.extend(built.diagnostics);
                graphs.extend(built.graphs);
                stats.graphs_matching_all = graphs.len();
                BTreeMap::new()
            }
            Statement::List => {
                graphs.clear();
                targets_matching
            }
        };

        info!(
            statement = %query.statement,
            targets = stats.targets_matching,
            graphs = stats.graphs_matching_all,
            "Rendered query '{}'",
            raw
        );

        Ok(ExplorerResponse {
            query,
            graphs: graphs.into_iter().collect(),
            targets_list,
            tags,
            stats,
            diagnostics,
        })
    }

    /// Fetch single metrics by id. Unknown ids are left out.
    pub async fn inspect(&self, ids: &[&str]) -> Result<BTreeMap<String, Target>> {
        let mut found = BTreeMap::new();
        for id in ids {
            if let Some(hit) = self.store.get(id).await? {
                let target = hit.into_target()?;
                found.insert(target.id.clone(), target);
            }
        }
        Ok(found)
    }

    /// Every indexed metric id, sorted
    pub async fn metric_ids(&self) -> Result<Vec<String>> {
        let count = self.store.count().await?;
        let hits = self.store.search(&IndexFilter::MatchAll, count).await?;
        let mut ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        ids.sort();
        Ok(ids)
    }
}
