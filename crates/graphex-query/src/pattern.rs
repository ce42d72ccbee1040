//! Pattern compiler and matcher
//!
//! Every raw match token compiles into one [`MatchSpec`]:
//!
//! - `key=value`, `key=`, `=value` - tag equality
//! - `key:regex`, `key:`, `:regex` - tag regex
//! - anything else - identifier regex
//!
//! A leading `!` negates the predicate. An object matches a [`PatternSet`] when it
//! satisfies every spec. Regexes are unanchored searches.

use crate::model::Query;
use graphex_core::{Diagnostics, Matchable};
use regex::Regex;
use std::collections::BTreeMap;

/// Tags that only make sense for metric targets, skipped when matching graph definitions
const TARGET_ONLY_TAGS: [&str; 2] = ["target_type", "what"];

/// What the patterns are compiled for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileMode {
    /// Metric targets
    #[default]
    Targets,
    /// Predefined graph definitions
    Graphs,
}

/// Predicate kind
#[derive(Debug, Clone)]
pub enum MatchKind {
    TagEquality {
        key: String,
        value: String,
    },
    TagRegex {
        key: String,
        value: String,
        /// `None` when the key side is empty or failed to compile
        key_regex: Option<Regex>,
        /// `None` when the value side is empty or failed to compile
        value_regex: Option<Regex>,
    },
    IdRegex {
        pattern: String,
        /// `None` when the pattern failed to compile
        regex: Option<Regex>,
    },
}

/// One compiled match token
#[derive(Debug, Clone)]
pub struct MatchSpec {
    /// Token as typed, including any leading `!`
    pub raw: String,
    pub negate: bool,
    pub kind: MatchKind,
    /// Set when a regex in this spec failed to compile. Such a spec never matches.
    broken: bool,
}

impl MatchSpec {
    /// Compile a single token. Regex failures are recorded in `diagnostics`.
    pub fn compile(raw: &str, diagnostics: &mut Diagnostics) -> Self {
        let (negate, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let mut broken = false;

        let kind = if let Some((key, value)) = body.split_once('=') {
            MatchKind::TagEquality {
                key: key.to_string(),
                value: value.to_string(),
            }
        } else if let Some((key, value)) = body.split_once(':') {
            let mut compile_side = |side: &str| -> Option<Regex> {
                if side.is_empty() {
                    return None;
                }
                match Regex::new(side) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        diagnostics.error(raw, format!("invalid regex '{}': {}", side, e));
                        broken = true;
                        None
                    }
                }
            };
            let key_regex = compile_side(key);
            let value_regex = compile_side(value);
            MatchKind::TagRegex {
                key: key.to_string(),
                value: value.to_string(),
                key_regex,
                value_regex,
            }
        } else {
            let regex = match Regex::new(body) {
                Ok(re) => Some(re),
                Err(e) => {
                    diagnostics.error(raw, format!("invalid regex '{}': {}", body, e));
                    broken = true;
                    None
                }
            };
            MatchKind::IdRegex {
                pattern: body.to_string(),
                regex,
            }
        };

        Self {
            raw: raw.to_string(),
            negate,
            kind,
            broken,
        }
    }

    /// True if a regex in this spec failed to compile
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Evaluate the predicate itself, ignoring negation
    pub fn predicate<M: Matchable + ?Sized>(&self, object: &M) -> bool {
        if self.broken {
            return false;
        }
        let tags = object.tags();
        match &self.kind {
            MatchKind::TagEquality { key, value } => match (key.is_empty(), value.is_empty()) {
                (true, true) => true,
                (false, true) => tags.contains_key(key),
                (true, false) => tags.values().any(|v| v == value),
                (false, false) => tags.get(key).is_some_and(|v| v == value),
            },
            MatchKind::TagRegex {
                key,
                key_regex,
                value_regex,
                ..
            } => match (key_regex, value_regex) {
                (None, None) => true,
                (Some(kr), None) => tags.keys().any(|k| kr.is_match(k)),
                (None, Some(vr)) => tags.values().any(|v| vr.is_match(v)),
                (Some(_), Some(vr)) => tags.get(key).is_some_and(|v| vr.is_match(v)),
            },
            MatchKind::IdRegex { regex, .. } => {
                regex.as_ref().is_some_and(|re| re.is_match(object.id()))
            }
        }
    }

    /// Evaluate the predicate with negation applied
    pub fn matches<M: Matchable + ?Sized>(&self, object: &M) -> bool {
        self.predicate(object) != self.negate
    }

    /// True for the bare presence tokens (`what=`, `target_type:`, ...) that only
    /// make sense against metric targets. Tokens carrying a value always apply.
    fn is_target_only(&self) -> bool {
        match &self.kind {
            MatchKind::TagEquality { key, value } | MatchKind::TagRegex { key, value, .. } => {
                value.is_empty() && TARGET_ONLY_TAGS.contains(&key.as_str())
            }
            MatchKind::IdRegex { .. } => false,
        }
    }
}

/// A compiled set of match tokens, ANDed together
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    specs: BTreeMap<String, MatchSpec>,
    diagnostics: Diagnostics,
}

impl PatternSet {
    /// Compile raw tokens. Identical tokens collapse into one spec.
    pub fn compile<S: AsRef<str>>(tokens: &[S], mode: CompileMode) -> Self {
        let mut set = PatternSet::default();
        for token in tokens {
            let raw = token.as_ref();
            let spec = MatchSpec::compile(raw, &mut set.diagnostics);
            if mode == CompileMode::Graphs && spec.is_target_only() {
                continue;
            }
            set.specs.insert(raw.to_string(), spec);
        }
        set
    }

    /// Compile the patterns of a query
    pub fn from_query(query: &Query, mode: CompileMode) -> Self {
        Self::compile(&query.patterns, mode)
    }

    /// Specs keyed by raw token
    pub fn specs(&self) -> impl Iterator<Item = &MatchSpec> {
        self.specs.values()
    }

    pub fn get(&self, raw: &str) -> Option<&MatchSpec> {
        self.specs.get(raw)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Per-token compile diagnostics
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// True if the object satisfies every spec
    pub fn matches<M: Matchable + ?Sized>(&self, object: &M) -> bool {
        self.specs.values().all(|spec| spec.matches(object))
    }

    /// Matching subset of `objects`
    pub fn filter<M: Matchable + Clone>(&self, objects: &BTreeMap<String, M>) -> BTreeMap<String, M> {
        objects
            .iter()
            .filter(|(_, object)| self.matches(*object))
            .map(|(id, object)| (id.clone(), object.clone()))
            .collect()
    }
}
