//! Core data types for graphex

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag name -> tag value. Ordered so that every walk over a tag set is reproducible.
pub type Tags = BTreeMap<String, String>;

/// A tag is a key-value pair used for series identification.
/// The index stores tags in their `key=value` string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// Create a new tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Validate the tag
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(CoreError::EmptyTagKey);
        }
        Ok(())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for Tag {
    type Err = CoreError;

    /// Parse the index representation. The value may itself contain `=`.
    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidTag(s.to_string()))?;
        let tag = Tag::new(key, value);
        tag.validate()?;
        Ok(tag)
    }
}

/// Anything the pattern matcher can be evaluated against: an identifier plus a tag mapping.
pub trait Matchable {
    /// Identifier matched by free-text (id regex) predicates
    fn id(&self) -> &str;
    /// Tags matched by tag predicates
    fn tags(&self) -> &Tags;
}

/// One metric series as returned by the tag index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Backend-native series identifier (e.g. a graphite path)
    pub id: String,
    /// Tags describing the series
    pub tags: Tags,
    /// Optional rendering color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Target {
    /// Create a target without tags
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: Tags::new(),
            color: None,
        }
    }

    /// Add a tag (builder style)
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the color hint (builder style)
    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Decode a target from its index representation (`key=value` strings)
    pub fn from_tag_strings<S: AsRef<str>>(id: impl Into<String>, tags: &[S]) -> Result<Self> {
        let mut target = Target::new(id);
        for raw in tags {
            let tag: Tag = raw.as_ref().parse()?;
            target.tags.insert(tag.key, tag.value);
        }
        Ok(target)
    }

    /// Encode tags into their index representation
    pub fn tag_strings(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|(k, v)| Tag::new(k.as_str(), v.as_str()).to_string())
            .collect()
    }
}

impl Matchable for Target {
    fn id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }
}
