//! Configuration management for symgraph

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::parser::compute_hash;

/// File name looked up at the project root when no `--config` is given
pub const PROJECT_CONFIG_FILE: &str = "symgraph.toml";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool and sink flushing
    pub pipeline: PipelineConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Project facts consumed by the enrichment plugins
    pub enrichment: EnrichmentConfig,
}

/// Pass scheduling and sink batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent file tasks; 0 picks the number of available cores
    pub worker_threads: usize,

    /// Per-file budget for one pass, in milliseconds
    pub file_timeout_ms: u64,

    /// Maximum nodes + edges per sink batch
    pub batch_size: usize,

    /// Retries after a failed sink write
    pub sink_retries: u32,

    /// Initial backoff between sink retries, doubled on each attempt
    pub sink_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            file_timeout_ms: 30_000,
            batch_size: 1000,
            sink_retries: 3,
            sink_backoff_ms: 200,
        }
    }
}

impl PipelineConfig {
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, relative to the project root
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".symgraph/graph.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Service map, route table and event listeners of the analyzed project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Map route annotations and registrations found in code
    pub route_annotations: bool,

    /// Container key (or interface name) -> implementation FQN
    pub services: BTreeMap<String, String>,

    pub routes: Vec<RouteEntry>,

    pub events: EventsConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            route_annotations: true,
            services: BTreeMap::new(),
            routes: Vec::new(),
            events: EventsConfig::default(),
        }
    }
}

impl EnrichmentConfig {
    /// Whether any entry produces config-owned edges
    pub fn has_config_edges(&self) -> bool {
        !self.routes.is_empty() || !self.events.listeners.is_empty()
    }

    /// Hash of every setting Pass 3 reads
    pub fn fingerprint(&self) -> String {
        compute_hash(&serde_json::to_string(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    /// FQN of the handling function or method
    pub handler: String,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,

    /// Event name -> listener FQNs
    pub listeners: BTreeMap<String, Vec<String>>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listeners: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config: {:?}", path))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `<root>/symgraph.toml` if present, defaults otherwise
    pub fn discover(root: &Path) -> anyhow::Result<Self> {
        let candidate = root.join(PROJECT_CONFIG_FILE);
        if candidate.is_file() {
            Self::from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Database path resolved against the project root
    pub fn database_path(&self, root: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            root.join(&self.database.path)
        }
    }
}
