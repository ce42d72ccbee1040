//! Metric classification - turns raw metric names into tag sets
//!
//! Classifiers are registered explicitly and consulted in descending priority order.
//! The first classifier that claims a metric name decides its tags.

use crate::diagnostics::Diagnostics;
use crate::error::{CoreError, Result};
use crate::types::{Tags, Target};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Capability implemented by every metric classifier
pub trait MetricClassifier: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Higher priorities are consulted first
    fn priority(&self) -> i32 {
        0
    }

    /// Return the tags for a raw metric name, or None if this classifier does not apply
    fn classify(&self, raw: &str) -> Option<Tags>;
}

/// Classifier driven by a regex with named capture groups.
///
/// Every named group that participates in the match becomes a tag. Fixed tags
/// (typically `target_type`) are added on top.
#[derive(Debug, Clone)]
pub struct RegexClassifier {
    name: String,
    priority: i32,
    regex: Regex,
    fixed: Tags,
}

impl RegexClassifier {
    /// Create a classifier from a regex pattern
    pub fn new(name: impl Into<String>, pattern: &str, priority: i32) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| CoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.into(),
            priority,
            regex,
            fixed: Tags::new(),
        })
    }

    /// Classifier for gauges (`target_type=gauge`)
    pub fn gauge(name: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self::new(name, pattern, 0)?.with_tag("target_type", "gauge"))
    }

    /// Classifier for counters (`target_type=counter`)
    pub fn counter(name: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self::new(name, pattern, 0)?.with_tag("target_type", "counter"))
    }

    /// Add a fixed tag applied to every match
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed.insert(key.into(), value.into());
        self
    }
}

impl MetricClassifier for RegexClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn classify(&self, raw: &str) -> Option<Tags> {
        let caps = self.regex.captures(raw)?;
        let mut tags = self.fixed.clone();
        for group in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(group) {
                tags.insert(group.to_string(), m.as_str().to_string());
            }
        }
        Some(tags)
    }
}

/// Classifier for statsd's own internal metrics
pub struct StatsdClassifier {
    rules: Vec<RegexClassifier>,
}

impl StatsdClassifier {
    pub const NAME: &'static str = "statsd";

    pub fn new() -> Result<Self> {
        let rules = vec![
            RegexClassifier::gauge(Self::NAME, r"^statsd\.?(?P<server>[^\.]*)\.(?P<wtt>numStats)")?,
            RegexClassifier::gauge(
                Self::NAME,
                r"^stats\.statsd\.?(?P<server>[^\.]*)\.(?P<wtt>processing_time)$",
            )?,
            RegexClassifier::counter(Self::NAME, r"^stats\.statsd\.?(?P<server>[^\.]*)\.(?P<wtt>[^\.]+)$")?,
            RegexClassifier::gauge(
                Self::NAME,
                r"^stats\.statsd\.?(?P<server>[^\.]*)\.(?P<wtt>graphiteStats\.calculationtime)$",
            )?,
            RegexClassifier::gauge(
                Self::NAME,
                r"^stats\.statsd\.?(?P<server>[^\.]*)\.(?P<wtt>graphiteStats\.flush_[^\.]+)$",
            )?,
            RegexClassifier::counter(
                Self::NAME,
                r"stats\.statsd\.?(?P<server>[^\.]*)\.(?P<wtt>graphiteStats\.last_[^\.]+)$",
            )?,
        ];
        Ok(Self { rules })
    }

    /// Replace the raw `wtt` capture with `what`/`type` tags
    fn sanitize(tags: &mut Tags) {
        let Some(wtt) = tags.remove("wtt") else {
            return;
        };
        let is_counter = tags.get("target_type").map(String::as_str) == Some("counter");

        let (what, kind) = match wtt.as_str() {
            "packets_received" => ("packets", "received"),
            "bad_lines_seen" => ("statsd_lines", "received_bad"),
            "numStats" => ("stats", "sent_to_graphite"),
            "graphiteStats.calculationtime" => ("ms", "calculationtime"),
            "graphiteStats.last_exception" if is_counter => ("timestamp", "last_exception"),
            "graphiteStats.last_exception" => ("seconds", "last_exception age"),
            "graphiteStats.last_flush" if is_counter => ("timestamp", "last_flush"),
            "graphiteStats.last_flush" => ("seconds", "last_flush age"),
            "graphiteStats.flush_length" => ("bytes", "flush_to_graphite"),
            "graphiteStats.flush_time" => ("ms", "flush_to_graphite"),
            "processing_time" => ("ms", "processing"),
            _ => return,
        };
        tags.insert("what".to_string(), what.to_string());
        tags.insert("type".to_string(), kind.to_string());
    }
}

impl MetricClassifier for StatsdClassifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        10
    }

    fn classify(&self, raw: &str) -> Option<Tags> {
        let mut tags = self.rules.iter().find_map(|rule| rule.classify(raw))?;
        Self::sanitize(&mut tags);
        Some(tags)
    }
}

/// Derive the `unit` tag from the older `what` + `target_type` pair.
pub fn derive_unit(tags: &mut Tags) {
    if tags.contains_key("unit") {
        return;
    }
    let (Some(what), Some(target_type)) = (tags.get("what"), tags.get("target_type")) else {
        return;
    };

    let unit = match what.as_str() {
        "bytes" => "B",
        "bits" => "b",
        other => other,
    };
    let unit = if target_type == "rate" {
        format!("{}/s", unit)
    } else {
        unit.to_string()
    };
    tags.insert("unit".to_string(), unit);
}

/// Builder collecting classifiers before they are sorted once
#[derive(Default)]
pub struct ClassifierRegistryBuilder {
    classifiers: Vec<Box<dyn MetricClassifier>>,
    diagnostics: Diagnostics,
}

impl ClassifierRegistryBuilder {
    /// Register a classifier
    pub fn register(mut self, classifier: impl MetricClassifier + 'static) -> Self {
        self.classifiers.push(Box::new(classifier));
        self
    }

    /// Register the outcome of a fallible classifier constructor.
    /// Failures are kept as diagnostics so the remaining classifiers still load.
    pub fn register_result<C>(mut self, name: &str, classifier: Result<C>) -> Self
    where
        C: MetricClassifier + 'static,
    {
        match classifier {
            Ok(c) => self.classifiers.push(Box::new(c)),
            Err(e) => self
                .diagnostics
                .error(name, format!("Failed to add classifier: {}", e)),
        }
        self
    }

    /// Register the built-in classifiers
    pub fn with_builtins(self) -> Self {
        self.register_result(StatsdClassifier::NAME, StatsdClassifier::new())
    }

    /// Sort by descending priority and build the registry
    pub fn build(mut self) -> ClassifierRegistry {
        // stable: equal priorities keep registration order
        self.classifiers.sort_by_key(|c| std::cmp::Reverse(c.priority()));
        ClassifierRegistry {
            classifiers: self.classifiers,
            diagnostics: self.diagnostics,
        }
    }
}

/// Ordered set of metric classifiers
pub struct ClassifierRegistry {
    classifiers: Vec<Box<dyn MetricClassifier>>,
    diagnostics: Diagnostics,
}

impl ClassifierRegistry {
    pub fn builder() -> ClassifierRegistryBuilder {
        ClassifierRegistryBuilder::default()
    }

    /// Diagnostics collected while building the registry
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Number of registered classifiers
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    /// Names in consultation order
    pub fn names(&self) -> Vec<&str> {
        self.classifiers.iter().map(|c| c.name()).collect()
    }

    /// Classify a single raw metric name
    pub fn classify(&self, raw: &str) -> Option<Target> {
        self.classifiers.iter().find_map(|c| {
            let mut tags = c.classify(raw)?;
            derive_unit(&mut tags);
            Some(Target {
                id: raw.to_string(),
                tags,
                color: None,
            })
        })
    }

    /// Classify many raw metric names.
    ///
    /// Metrics lacking both (`what`, `target_type`) and `unit` are kept but reported.
    pub fn classify_all<'a, I>(&self, metrics: I) -> (BTreeMap<String, Target>, Diagnostics)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut targets = BTreeMap::new();
        let mut diagnostics = Diagnostics::new();
        let mut unmatched = 0usize;

        for raw in metrics {
            let Some(target) = self.classify(raw) else {
                unmatched += 1;
                continue;
            };
            let tags = &target.tags;
            let has_legacy = tags.contains_key("what") && tags.contains_key("target_type");
            if !has_legacy && !tags.contains_key("unit") {
                diagnostics.warn(raw, "metric doesn't have the mandatory tags (what+target_type or unit)");
            }
            targets.insert(target.id.clone(), target);
        }

        debug!(
            "Classified {} metrics, {} unmatched",
            targets.len(),
            unmatched
        );
        (targets, diagnostics)
    }
}
