//! Pipeline configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{GraphConfig, OutputConfig, ProfilingConfig, Settings, SimilarityConfig};

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline run
    pub name: Option<String>,
    pub profiling: ProfilingConfig,
    pub similarity: SimilarityConfig,
    pub graph: GraphConfig,
    pub output: OutputConfig,
    /// First stage to run
    pub from: PipelineStage,
    /// Last stage to run
    pub to: PipelineStage,
    /// Checkpoint file; no checkpoint is written when absent
    pub checkpoint: Option<PathBuf>,
    /// Continue after the last stage completed by a matching checkpoint
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: None,
            profiling: ProfilingConfig::default(),
            similarity: SimilarityConfig::default(),
            graph: GraphConfig::default(),
            output: OutputConfig::default(),
            from: PipelineStage::Catalog,
            to: PipelineStage::Serialize,
            checkpoint: None,
            resume: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline config
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every stage setting and the checkpoint location from `obscura.toml`
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            profiling: settings.profiling.clone(),
            similarity: settings.similarity.clone(),
            graph: settings.graph.clone(),
            output: settings.output.clone(),
            checkpoint: settings.checkpoint_path(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_profiling(mut self, profiling: ProfilingConfig) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityConfig) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn with_graph(mut self, graph: GraphConfig) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    /// Run only the stages from `from` to `to`, inclusive
    pub fn with_stage_range(mut self, from: PipelineStage, to: PipelineStage) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Stages to run, in execution order
    pub fn effective_stages(&self) -> Vec<PipelineStage> {
        PipelineStage::all()
            .into_iter()
            .filter(|stage| self.should_run_stage(*stage))
            .collect()
    }

    /// Check if a specific stage should run
    pub fn should_run_stage(&self, stage: PipelineStage) -> bool {
        self.from <= stage && stage <= self.to
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.from > self.to {
            return Err(format!(
                "Stage range is empty: {} comes after {}",
                self.from, self.to
            ));
        }
        if self.resume && self.checkpoint.is_none() {
            return Err("Resume needs a checkpoint path".to_string());
        }
        Settings {
            profiling: self.profiling.clone(),
            similarity: self.similarity.clone(),
            graph: self.graph.clone(),
            output: self.output.clone(),
            ..Settings::default()
        }
        .validate()
    }
}

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Stage 1: List every column of the source
    Catalog,
    /// Stage 2: Cardinality per column
    Profile,
    /// Stage 3: Pairwise similarity estimates
    Similarity,
    /// Stage 4: Relation map
    Relations,
    /// Stage 5: Schema text
    Serialize,
}

impl PipelineStage {
    /// Get all stages in execution order
    pub fn all() -> Vec<Self> {
        vec![
            Self::Catalog,
            Self::Profile,
            Self::Similarity,
            Self::Relations,
            Self::Serialize,
        ]
    }

    /// Get stage name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Profile => "profile",
            Self::Similarity => "similarity",
            Self::Relations => "relations",
            Self::Serialize => "serialize",
        }
    }

    /// Get stage description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Catalog => "List tables and columns of the source",
            Self::Profile => "Compute per-column cardinality",
            Self::Similarity => "Estimate value-set similarity between columns",
            Self::Relations => "Build the relation map",
            Self::Serialize => "Render the schema description",
        }
    }

    /// Get stage index (1-based)
    pub fn index(&self) -> usize {
        match self {
            Self::Catalog => 1,
            Self::Profile => 2,
            Self::Similarity => 3,
            Self::Relations => 4,
            Self::Serialize => 5,
        }
    }

    /// Whether the stage writes a snapshot table
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Profile | Self::Similarity | Self::Relations)
    }

    /// Stage after this one
    pub fn next(&self) -> Option<Self> {
        Self::all().into_iter().find(|stage| stage > self)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "catalog" | "1" => Ok(Self::Catalog),
            "profile" | "cardinality" | "2" => Ok(Self::Profile),
            "similarity" | "3" => Ok(Self::Similarity),
            "relations" | "graph" | "4" => Ok(Self::Relations),
            "serialize" | "describe" | "5" => Ok(Self::Serialize),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.effective_stages().len(), 5);
        assert!(config.checkpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_range() {
        let config = PipelineConfig::new()
            .with_stage_range(PipelineStage::Similarity, PipelineStage::Relations);
        assert_eq!(
            config.effective_stages(),
            vec![PipelineStage::Similarity, PipelineStage::Relations]
        );
        assert!(!config.should_run_stage(PipelineStage::Profile));

        let config = PipelineConfig::new()
            .with_stage_range(PipelineStage::Relations, PipelineStage::Profile);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_stage_parse() {
        assert_eq!(
            "catalog".parse::<PipelineStage>().unwrap(),
            PipelineStage::Catalog
        );
        assert_eq!("4".parse::<PipelineStage>().unwrap(), PipelineStage::Relations);
        assert_eq!(
            "Similarity".parse::<PipelineStage>().unwrap(),
            PipelineStage::Similarity
        );
        assert!("invalid".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_pipeline_stage_properties() {
        assert_eq!(PipelineStage::Catalog.index(), 1);
        assert!(!PipelineStage::Catalog.is_persisted());
        assert!(PipelineStage::Relations.is_persisted());
        assert_eq!(PipelineStage::Profile.next(), Some(PipelineStage::Similarity));
        assert_eq!(PipelineStage::Serialize.next(), None);
    }

    #[test]
    fn test_config_validation() {
        let config = PipelineConfig::default().with_resume(true);
        assert!(config.validate().is_err());

        let config = PipelineConfig::default()
            .with_resume(true)
            .with_checkpoint("run.checkpoint.json");
        assert!(config.validate().is_ok());

        let mut config = PipelineConfig::default();
        config.similarity.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.similarity.signature_size = 32;
        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.similarity.signature_size, 32);
        assert_eq!(
            config.checkpoint,
            Some(PathBuf::from("demo_data.checkpoint.json"))
        );
    }
}
