//! Server configuration - loaded from YAML, overridden from the command line

use graphex_core::{ClassifierRegistry, Diagnostics, RegexClassifier, Tags};
use graphex_graph::{GraphDefinition, RuleConfig, RuleTable};
use graphex_index::DEFAULT_SEARCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Complete server configuration - can be loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener settings
    pub server: ServerSettings,
    /// Tag index settings
    pub index: IndexSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
    /// Extra metric classifiers, consulted alongside the built-in ones
    pub classifiers: Vec<ClassifierConfig>,
    /// Graph rules, applied in order
    pub rules: Vec<RuleConfig>,
    /// Predefined graphs
    pub graphs: Vec<GraphDefinition>,
}

/// Server network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum number of concurrent queries
    pub max_concurrent_queries: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            max_concurrent_queries: 32,
        }
    }
}

/// Which tag store implementation serves queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// In-process index, seeded from `metrics_file`
    Memory,
    /// Remote search service over HTTP
    Http,
}

/// Tag index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Backend: "memory" or "http"
    pub backend: String,
    /// Search service URL (http backend)
    pub url: String,
    /// Index name (http backend)
    pub index_name: String,
    /// Maximum number of targets fetched per query
    pub search_size: usize,
    /// Search service request timeout in seconds
    pub timeout_secs: u64,
    /// File with one raw metric name per line, classified at startup (memory backend)
    pub metrics_file: Option<PathBuf>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            url: "http://localhost:9200".to_string(),
            index_name: "graphite_metrics".to_string(),
            search_size: DEFAULT_SEARCH_SIZE,
            timeout_secs: 10,
            metrics_file: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Include target in logs
    pub show_target: bool,
    /// Include thread IDs in logs
    pub show_thread_ids: bool,
    /// Include file and line numbers
    pub show_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_location: false,
        }
    }
}

/// Regex classifier declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Name used in diagnostics
    pub name: String,
    /// Regex with named capture groups; each group becomes a tag
    pub pattern: String,
    /// Higher priorities are consulted first
    #[serde(default)]
    pub priority: i32,
    /// Fixed tags added to every match (e.g. `target_type: gauge`)
    #[serde(default)]
    pub tags: Tags,
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Write default config to a file (for generating example config)
    pub fn write_default(path: impl AsRef<Path>) -> anyhow::Result<()> {
        let config = Self::default();
        let yaml = serde_yaml::to_string(&config)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Get log level
    pub fn log_level(&self) -> Level {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Selected index backend. Unknown names fall back to the in-process index.
    pub fn index_backend(&self) -> IndexBackend {
        match self.index.backend.to_lowercase().as_str() {
            "http" | "elasticsearch" | "es" => IndexBackend::Http,
            _ => IndexBackend::Memory,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index.timeout_secs)
    }

    /// Built-in classifiers plus the configured ones.
    /// Classifiers with a bad pattern are skipped and show up in the registry diagnostics.
    pub fn classifier_registry(&self) -> ClassifierRegistry {
        self.classifiers
            .iter()
            .fold(ClassifierRegistry::builder().with_builtins(), |builder, c| {
                let classifier = RegexClassifier::new(c.name.clone(), &c.pattern, c.priority).map(|r| {
                    c.tags
                        .iter()
                        .fold(r, |r, (key, value)| r.with_tag(key.clone(), value.clone()))
                });
                builder.register_result(&c.name, classifier)
            })
            .build()
    }

    /// Compile the configured rules
    pub fn rule_table(&self) -> (RuleTable, Diagnostics) {
        RuleTable::from_config(&self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.index_backend(), IndexBackend::Memory);
        assert_eq!(config.index.search_size, DEFAULT_SEARCH_SIZE);
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.rules.is_empty());
        assert!(config.graphs.is_empty());
    }

    #[test]
    fn test_write_default_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphex.yml");
        ServerConfig::write_default(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.host, "0.0.0.0");
        assert_eq!(loaded.index.index_name, "graphite_metrics");
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphex.yml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9090
index:
  backend: http
  url: "http://search:9200"
logging:
  level: debug
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.index_backend(), IndexBackend::Http);
        assert_eq!(config.index.url, "http://search:9200");
        assert_eq!(config.index.timeout_secs, 10);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_rules_graphs_and_classifiers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphex.yml");
        std::fs::write(
            &path,
            r#"
classifiers:
  - name: diskspace
    pattern: '^servers\.(?P<server>[^.]+)\.diskspace\.(?P<mountpoint>[^.]+)\.(?P<type>byte_[a-z]+)$'
    priority: 20
    tags:
      target_type: gauge
      what: disk_space
  - name: broken
    pattern: '(unclosed'
rules:
  - match:
      what: disk_space
    merge:
      vtitle: bytes
  - match:
      server: [web01, web02]
    transform: title_from_constants
graphs:
  - id: web_overview
    tags:
      server: web01
    graph:
      from: "-1day"
      title: Web overview
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        let registry = config.classifier_registry();
        assert_eq!(registry.names()[0], "diskspace");
        assert_eq!(registry.diagnostics().len(), 1);

        let target = registry
            .classify("servers.web01.diskspace.root.byte_used")
            .unwrap();
        assert_eq!(target.tags["server"], "web01");
        assert_eq!(target.tags["what"], "disk_space");
        assert_eq!(target.tags["target_type"], "gauge");

        let (rules, diagnostics) = config.rule_table();
        assert_eq!(rules.len(), 2);
        assert!(diagnostics.is_empty());

        assert_eq!(config.graphs.len(), 1);
        assert_eq!(config.graphs[0].id, "web_overview");
        assert_eq!(config.graphs[0].graph.from, "-1day");
    }

    #[test]
    fn test_unknown_backend_falls_back_to_memory() {
        let mut config = ServerConfig::default();
        config.index.backend = "carrier-pigeon".to_string();
        assert_eq!(config.index_backend(), IndexBackend::Memory);
        config.index.backend = "HTTP".to_string();
        assert_eq!(config.index_backend(), IndexBackend::Http);
    }
}
