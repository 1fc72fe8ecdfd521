//! Checkpointing for pipeline resume

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::PipelineStage;
use crate::error::{PipelineError, PipelineResult};

/// Pipeline checkpoint state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique pipeline run ID
    pub run_id: String,
    /// Pipeline name
    pub name: Option<String>,
    /// Identity of the data source the run profiled
    pub source: String,
    /// When the pipeline started
    pub started_at: DateTime<Utc>,
    /// When checkpoint was last updated
    pub updated_at: DateTime<Utc>,
    /// Current status
    pub status: PipelineStatus,
    /// Completed stages
    pub completed_stages: Vec<PipelineStage>,
    /// Current stage (if running)
    pub current_stage: Option<PipelineStage>,
    /// Stage that failed or was interrupted
    pub failed_stage: Option<PipelineStage>,
    /// Stage outputs keyed by stage name
    pub stage_outputs: BTreeMap<String, StageOutput>,
    /// Error message if failed
    pub error: Option<String>,
    /// Configuration hash for validation
    pub config_hash: String,
}

impl Checkpoint {
    /// Create a new checkpoint for a pipeline run
    pub fn new(run_id: impl Into<String>, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            name: None,
            source: String::new(),
            started_at: now,
            updated_at: now,
            status: PipelineStatus::Running,
            completed_stages: Vec::new(),
            current_stage: None,
            failed_stage: None,
            stage_outputs: BTreeMap::new(),
            error: None,
            config_hash: config_hash.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Mark a stage as started
    pub fn start_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.updated_at = Utc::now();
    }

    /// Mark a stage as completed
    pub fn complete_stage(&mut self, stage: PipelineStage, output: StageOutput) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
        self.stage_outputs.insert(stage.name().to_string(), output);
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = PipelineStatus::Completed;
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    /// Mark pipeline as failed at `stage`
    pub fn fail(&mut self, stage: PipelineStage, error: impl Into<String>) {
        self.status = PipelineStatus::Failed;
        self.failed_stage = Some(stage);
        self.current_stage = None;
        self.error = Some(error.into());
        self.stage_outputs
            .insert(stage.name().to_string(), StageOutput::failed());
        self.updated_at = Utc::now();
    }

    /// Mark pipeline as cancelled; `stage` is the one that was interrupted, if any
    pub fn cancel(&mut self, stage: Option<PipelineStage>) {
        self.status = PipelineStatus::Cancelled;
        self.failed_stage = stage;
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    /// Check if a stage has been completed
    pub fn is_stage_completed(&self, stage: PipelineStage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// Get the next stage to run
    pub fn next_stage(&self, all_stages: &[PipelineStage]) -> Option<PipelineStage> {
        all_stages
            .iter()
            .copied()
            .find(|stage| !self.is_stage_completed(*stage))
    }

    /// Get output from a completed stage
    pub fn get_stage_output(&self, stage: PipelineStage) -> Option<&StageOutput> {
        self.stage_outputs.get(stage.name())
    }

    /// Calculate duration so far
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at - self.started_at
    }

    /// Save checkpoint to file
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load checkpoint from file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| PipelineError::Checkpoint(format!("{}: {e}", path.display())))
    }

    /// Get default checkpoint path for a database file
    pub fn default_path(database: &Path) -> PathBuf {
        let mut path = database.to_path_buf();
        path.set_extension("checkpoint.json");
        path
    }
}

/// Pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Pipeline is running
    Running,
    /// Pipeline completed successfully
    Completed,
    /// Pipeline failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Output from a pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Whether the stage was successful
    pub success: bool,
    /// Records, edges or bytes produced
    pub items: usize,
    /// Isolated per-item failures
    pub failures: usize,
    /// Snapshot table written, if any
    pub table: Option<String>,
    /// Stage-specific metadata
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl StageOutput {
    /// Create a successful stage output
    pub fn success(items: usize) -> Self {
        Self {
            success: true,
            items,
            failures: 0,
            table: None,
            metadata: BTreeMap::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Create a failed stage output
    pub fn failed() -> Self {
        Self {
            success: false,
            ..Self::success(0)
        }
    }

    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set duration
    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_stage_lifecycle() {
        let mut checkpoint = Checkpoint::new("run-123", "hash").with_source("memory://x");
        assert_eq!(checkpoint.status, PipelineStatus::Running);

        checkpoint.start_stage(PipelineStage::Catalog);
        assert_eq!(checkpoint.current_stage, Some(PipelineStage::Catalog));

        checkpoint.complete_stage(
            PipelineStage::Catalog,
            StageOutput::success(12).with_metadata("tables", serde_json::json!(3)),
        );
        assert!(checkpoint.is_stage_completed(PipelineStage::Catalog));
        assert!(checkpoint.current_stage.is_none());
        assert_eq!(
            checkpoint.get_stage_output(PipelineStage::Catalog).unwrap().items,
            12
        );
    }

    #[test]
    fn test_checkpoint_next_stage() {
        let mut checkpoint = Checkpoint::new("run-123", "hash");
        let stages = PipelineStage::all();
        assert_eq!(checkpoint.next_stage(&stages), Some(PipelineStage::Catalog));

        checkpoint.complete_stage(PipelineStage::Catalog, StageOutput::success(1));
        checkpoint.complete_stage(PipelineStage::Profile, StageOutput::success(1));
        assert_eq!(checkpoint.next_stage(&stages), Some(PipelineStage::Similarity));
    }

    #[test]
    fn test_checkpoint_fail_and_cancel() {
        let mut checkpoint = Checkpoint::new("run-123", "hash");
        checkpoint.fail(PipelineStage::Relations, "write refused");
        assert_eq!(checkpoint.status, PipelineStatus::Failed);
        assert_eq!(checkpoint.failed_stage, Some(PipelineStage::Relations));
        assert_eq!(checkpoint.error.as_deref(), Some("write refused"));
        assert!(!checkpoint.get_stage_output(PipelineStage::Relations).unwrap().success);

        let mut checkpoint = Checkpoint::new("run-456", "hash");
        checkpoint.cancel(None);
        assert_eq!(checkpoint.status, PipelineStatus::Cancelled);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("run.checkpoint.json");

        let mut checkpoint = Checkpoint::new("run-789", "abc").with_name("nightly");
        checkpoint.complete_stage(PipelineStage::Catalog, StageOutput::success(4).with_duration(20));
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.run_id, "run-789");
        assert_eq!(loaded.name.as_deref(), Some("nightly"));
        assert_eq!(loaded.completed_stages, vec![PipelineStage::Catalog]);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(PipelineError::Checkpoint(_))));
        assert!(matches!(
            Checkpoint::load(&temp.path().join("missing.json")),
            Err(PipelineError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_default_checkpoint_path() {
        let path = Checkpoint::default_path(Path::new("/data/shop.duckdb"));
        assert_eq!(path, PathBuf::from("/data/shop.checkpoint.json"));
    }
}
