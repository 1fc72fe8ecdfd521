//! Configuration types
//!
//! Each stage takes its own config struct; [`Settings`] bundles them with
//! the source selection and is what `obscura.toml` deserializes into.
//!
//! ```toml
//! [source]
//! backend = "duckdb"
//! path = "demo_data.duckdb"
//!
//! [similarity]
//! signature_size = 128
//! similarity_threshold = 0.8
//!
//! [graph]
//! exclude_columns = ["id", "*deleted*"]
//! similarity_threshold_for_inclusion = 0.7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Default file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "obscura.toml";

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var pattern"));

fn default_max_concurrency() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    30
}

/// Configuration for the cardinality profiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfilingConfig {
    /// Concurrent aggregate queries
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-column query timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            query_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProfilingConfig {
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

/// Sketch family used by the similarity estimator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SketchStrategy {
    /// Full min-hash over values read back from the source
    #[default]
    MinHash,
    /// Smallest-k fingerprints computed by the source itself
    BottomK,
}

impl std::str::FromStr for SketchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "minhash" | "min_hash" => Ok(Self::MinHash),
            "bottom_k" | "bottomk" => Ok(Self::BottomK),
            _ => Err(format!("Unknown sketch strategy: {s}")),
        }
    }
}

fn default_signature_size() -> usize {
    128
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    1
}

/// Configuration for the similarity estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimilarityConfig {
    /// Hash permutations per signature (or `k` for bottom-k)
    #[serde(default = "default_signature_size")]
    pub signature_size: usize,
    /// Minimum estimate for a pair to be kept
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub strategy: SketchStrategy,
    /// Seed for the permutation family
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            signature_size: default_signature_size(),
            similarity_threshold: default_similarity_threshold(),
            strategy: SketchStrategy::default(),
            seed: default_seed(),
            max_concurrency: default_max_concurrency(),
            query_timeout_secs: default_timeout_secs(),
        }
    }
}

impl SimilarityConfig {
    pub fn with_signature_size(mut self, size: usize) -> Self {
        self.signature_size = size.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_strategy(mut self, strategy: SketchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

fn default_exclude_columns() -> Vec<String> {
    vec!["id".to_string(), "*deleted*".to_string()]
}

fn default_min_cardinality() -> f64 {
    0.5
}

fn default_inclusion_threshold() -> f64 {
    0.7
}

/// Configuration for the relation graph builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphConfig {
    /// Glob patterns of column names that never form edges
    #[serde(default = "default_exclude_columns")]
    pub exclude_columns: Vec<String>,
    /// Both endpoints of a statistical edge need at least this cardinality
    #[serde(default = "default_min_cardinality")]
    pub min_cardinality_for_statistical_edge: f64,
    /// A similarity score must exceed this to become an edge
    #[serde(default = "default_inclusion_threshold")]
    pub similarity_threshold_for_inclusion: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            exclude_columns: default_exclude_columns(),
            min_cardinality_for_statistical_edge: default_min_cardinality(),
            similarity_threshold_for_inclusion: default_inclusion_threshold(),
        }
    }
}

impl GraphConfig {
    pub fn with_exclude_columns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_columns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_cardinality(mut self, min: f64) -> Self {
        self.min_cardinality_for_statistical_edge = min.clamp(0.0, 1.0);
        self
    }

    pub fn with_inclusion_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold_for_inclusion = threshold.clamp(0.0, 1.0);
        self
    }
}

fn default_container() -> String {
    "main".to_string()
}

fn default_cardinality_table() -> String {
    "cardinality_index".to_string()
}

fn default_similarity_table() -> String {
    "similarity_index".to_string()
}

fn default_relation_table() -> String {
    "relation_map".to_string()
}

fn default_true() -> bool {
    true
}

/// Where snapshot tables are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Dataset or schema that receives the snapshot tables
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_cardinality_table")]
    pub cardinality_table: String,
    #[serde(default = "default_similarity_table")]
    pub similarity_table: String,
    #[serde(default = "default_relation_table")]
    pub relation_table: String,
    /// Truncate snapshot tables instead of appending to them
    #[serde(default = "default_true")]
    pub replace_existing: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            cardinality_table: default_cardinality_table(),
            similarity_table: default_similarity_table(),
            relation_table: default_relation_table(),
            replace_existing: true,
        }
    }
}

impl OutputConfig {
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    /// Names of every table the pipeline writes
    pub fn table_names(&self) -> [&str; 3] {
        [
            &self.cardinality_table,
            &self.similarity_table,
            &self.relation_table,
        ]
    }
}

/// Backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SourceSettings {
    /// Embedded DuckDB file (or in-memory when `path` is absent)
    Duckdb {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Postgres-wire warehouse
    Postgres {
        connection_string: String,
        #[serde(default)]
        schema: Option<String>,
        #[serde(default = "default_max_concurrency")]
        max_connections: usize,
    },
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings::Duckdb {
            path: Some(PathBuf::from("demo_data.duckdb")),
        }
    }
}

/// Everything `obscura.toml` can set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub profiling: ProfilingConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Checkpoint file; derived from the DuckDB path when absent
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
}

impl Settings {
    /// Parse TOML text after expanding `${VAR}` references
    pub fn from_toml(text: &str) -> PipelineResult<Self> {
        let expanded = expand_env_vars(text)?;
        let settings: Settings =
            toml::from_str(&expanded).map_err(|e| PipelineError::Config(e.to_string()))?;
        settings.validate().map_err(PipelineError::Config)?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` if given, else `./obscura.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Checkpoint location, if one can be determined
    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.checkpoint {
            return Some(path.clone());
        }
        match &self.source {
            SourceSettings::Duckdb { path: Some(db) } => {
                let mut path = db.clone();
                path.set_extension("checkpoint.json");
                Some(path)
            }
            _ => None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.similarity.signature_size == 0 {
            return Err("similarity.signature_size must be at least 1".to_string());
        }
        for (name, value) in [
            (
                "similarity.similarity_threshold",
                self.similarity.similarity_threshold,
            ),
            (
                "graph.similarity_threshold_for_inclusion",
                self.graph.similarity_threshold_for_inclusion,
            ),
            (
                "graph.min_cardinality_for_statistical_edge",
                self.graph.min_cardinality_for_statistical_edge,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be between 0 and 1, got {value}"));
            }
        }
        if self.profiling.max_concurrency == 0 || self.similarity.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".to_string());
        }
        let names = self.output.table_names();
        if names.iter().any(|n| n.is_empty()) {
            return Err("output table names must not be empty".to_string());
        }
        if names[0] == names[1] || names[1] == names[2] || names[0] == names[2] {
            return Err("output table names must be distinct".to_string());
        }
        Ok(())
    }
}

/// Replace `${VAR}` with the environment value; unset variables are an error
pub fn expand_env_vars(text: &str) -> PipelineResult<String> {
    let mut missing = None;
    let expanded = ENV_VAR.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(PipelineError::Config(format!(
            "environment variable {name} is not set"
        ))),
        None => Ok(expanded.into_owned()),
    }
}
