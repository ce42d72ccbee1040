//! Graph model

use crate::error::Result;
use graphex_core::{Matchable, Tags, Target};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line on a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTarget {
    /// Series id, or a backend aggregate expression such as `sumSeries(a,b)`
    pub target: String,
    /// Tags that distinguish this line from the others on the graph
    #[serde(default)]
    pub variables: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Series ids this line is drawn from
    #[serde(default)]
    pub sources: Vec<String>,
}

impl GraphTarget {
    /// Plain target for a single series
    pub fn from_target(target: &Target, variables: Tags) -> Self {
        Self {
            target: target.id.clone(),
            variables,
            color: target.color.clone(),
            sources: vec![target.id.clone()],
        }
    }
}

/// A rendering group of targets sharing constant tag values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Graph {
    /// Tags fixed by the query's grouping
    pub constants: Tags,
    /// Tags every target turned out to agree on
    pub promoted_constants: Tags,
    pub targets: Vec<GraphTarget>,
    pub from: String,
    pub until: String,
    /// Free-form rendering options merged in by rules
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Graph {
    /// Empty graph over a time window
    pub fn new(from: impl Into<String>, until: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            until: until.into(),
            ..Default::default()
        }
    }

    /// Constants and promoted constants in one mapping
    pub fn all_constants(&self) -> Tags {
        let mut all = self.constants.clone();
        all.extend(
            self.promoted_constants
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        all
    }

    /// Merge fields into the graph configuration.
    ///
    /// Known fields (`from`, `until`, `targets`...) are overwritten like any other
    /// key; everything else lands in `options`.
    pub fn merge_fields(self, fields: &Map<String, Value>) -> Result<Graph> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(object) = &mut value {
            for (key, field) in fields {
                object.insert(key.clone(), field.clone());
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// String option, if set
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// A predefined graph, matched against the query by its tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub graph: Graph,
}

impl GraphDefinition {
    pub fn new(id: impl Into<String>, tags: Tags, graph: Graph) -> Self {
        Self {
            id: id.into(),
            tags,
            graph,
        }
    }
}

impl Matchable for GraphDefinition {
    fn id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }
}
