//! Pipeline executor for running the profiling stages against one source

use std::collections::BTreeMap;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::cancel::CancelHandle;
use super::checkpoint::{Checkpoint, PipelineStatus, StageOutput};
use super::config::{PipelineConfig, PipelineStage};
use super::lock::SourceLocks;
use super::run::PipelineRun;
use crate::catalog::{InternalTables, list_columns};
use crate::error::{PipelineError, PipelineResult, StageFailure, StageResult};
use crate::graph::RelationGraphBuilder;
use crate::log::RunLog;
use crate::models::{CardinalityIndex, Catalog};
use crate::persist::SnapshotStore;
use crate::profile::CardinalityProfiler;
use crate::serialize::SchemaSerializer;
use crate::similarity::SimilarityEstimator;
use crate::source::DataSource;

/// Move a stage outcome's log into `log` and unwrap its output
fn absorb<T>(result: StageResult<T>, log: &mut RunLog) -> PipelineResult<T> {
    match result {
        Ok(outcome) => {
            log.extend(outcome.log);
            Ok(outcome.output)
        }
        Err(failure) => {
            log.extend(failure.log);
            Err(failure.error)
        }
    }
}

/// Pipeline executor that runs the selected stages in order
pub struct PipelineExecutor {
    config: PipelineConfig,
    config_hash: String,
    checkpoint: Checkpoint,
    cancel: CancelHandle,
    locks: Option<SourceLocks>,
    builder: RelationGraphBuilder,
    store: SnapshotStore,
    internal: InternalTables,
}

impl PipelineExecutor {
    /// Create a new pipeline executor
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Config)?;

        let builder = RelationGraphBuilder::new(config.graph.clone())?;
        let config_hash = Self::hash_config(&config);
        let checkpoint = Checkpoint::new(Uuid::new_v4().to_string(), &config_hash);
        let store = SnapshotStore::new(config.output.clone());
        let internal = InternalTables::from_output(&config.output);

        Ok(Self {
            config,
            config_hash,
            checkpoint,
            cancel: CancelHandle::new(),
            locks: None,
            builder,
            store,
            internal,
        })
    }

    /// Observe an externally owned cancellation handle
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Serialize runs per source identity through a shared lock registry
    pub fn with_locks(mut self, locks: SourceLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the checkpoint of the current or last run
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run the configured stages against `source`
    ///
    /// Outputs accumulate in `run`. On failure the returned log holds the
    /// whole trail of the run; outputs of stages that completed before the
    /// failure stay in `run` and in their snapshot tables.
    pub async fn run(
        &mut self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
    ) -> Result<PipelineReport, StageFailure> {
        let identity = source.identity();
        let stages = match self.prepare(&identity) {
            Ok(stages) => stages,
            Err(e) => return Err(StageFailure::new(e, run.log.clone())),
        };

        let span = info_span!(
            "pipeline_run",
            run_id = %self.checkpoint.run_id,
            source = %identity
        );
        self.run_stages(source, run, stages).instrument(span).await
    }

    /// Set up the checkpoint and decide which stages still need to run
    fn prepare(&mut self, identity: &str) -> PipelineResult<Vec<PipelineStage>> {
        let stages = self.config.effective_stages();
        let resumable = match (&self.config.checkpoint, self.config.resume) {
            (Some(path), true) if path.exists() => Some(Checkpoint::load(path)?),
            _ => None,
        };

        let Some(mut previous) = resumable else {
            let mut checkpoint = Checkpoint::new(Uuid::new_v4().to_string(), &self.config_hash)
                .with_source(identity);
            if let Some(name) = &self.config.name {
                checkpoint = checkpoint.with_name(name.clone());
            }
            self.checkpoint = checkpoint;
            return Ok(stages);
        };

        if previous.config_hash != self.config_hash {
            return Err(PipelineError::Checkpoint(
                "Configuration has changed since last run. Run without --resume to start fresh."
                    .to_string(),
            ));
        }
        if previous.source != identity {
            return Err(PipelineError::Checkpoint(format!(
                "Checkpoint belongs to {}, not {identity}",
                previous.source
            )));
        }
        if previous.status == PipelineStatus::Completed {
            return Err(PipelineError::Checkpoint(
                "Previous run already completed. Run without --resume to start fresh.".to_string(),
            ));
        }

        let remaining: Vec<_> = stages
            .into_iter()
            .skip_while(|stage| previous.is_stage_completed(*stage))
            .collect();
        info!(
            run_id = %previous.run_id,
            next = ?remaining.first().map(|s| s.name()),
            "Resuming from checkpoint"
        );
        previous.status = PipelineStatus::Running;
        previous.error = None;
        previous.failed_stage = None;
        self.checkpoint = previous;
        Ok(remaining)
    }

    async fn run_stages(
        &mut self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        stages: Vec<PipelineStage>,
    ) -> Result<PipelineReport, StageFailure> {
        let start = Instant::now();
        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(&source.identity()).await),
            None => None,
        };

        info!(
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Starting pipeline"
        );
        if let Err(e) = self.save_checkpoint() {
            return Err(StageFailure::new(e, run.log.clone()));
        }

        for stage in stages {
            if self.cancel.is_cancelled() {
                run.log.error(stage, "run cancelled before stage started");
                self.checkpoint.cancel(None);
                self.save_checkpoint_quietly();
                return Err(StageFailure::new(PipelineError::Cancelled, run.log.clone()));
            }

            info!(stage = stage.name(), "Starting stage");
            self.checkpoint.start_stage(stage);
            if let Err(e) = self.save_checkpoint() {
                return Err(StageFailure::new(e, run.log.clone()));
            }

            let stage_start = Instant::now();
            let mut log = RunLog::new();
            let result = self
                .run_stage(stage, source, run, &mut log)
                .instrument(info_span!("pipeline_stage", stage = stage.name()))
                .await;
            run.log.extend(log);

            match result {
                Ok(output) => {
                    let output = output.with_duration(stage_start.elapsed().as_millis() as u64);
                    info!(
                        stage = stage.name(),
                        items = output.items,
                        failures = output.failures,
                        duration_ms = output.duration_ms,
                        "Stage completed"
                    );
                    self.checkpoint.complete_stage(stage, output);
                    if let Err(e) = self.save_checkpoint() {
                        return Err(StageFailure::new(e, run.log.clone()));
                    }
                }
                Err(e) => {
                    run.invalidate_from(stage);
                    if matches!(e, PipelineError::Cancelled) {
                        warn!(stage = stage.name(), "Stage cancelled");
                        self.checkpoint.cancel(Some(stage));
                    } else {
                        error!(stage = stage.name(), error = %e, "Stage failed");
                        self.checkpoint.fail(stage, e.to_string());
                    }
                    self.save_checkpoint_quietly();
                    return Err(StageFailure::new(e, run.log.clone()));
                }
            }
        }

        self.checkpoint.complete();
        if let Err(e) = self.save_checkpoint() {
            return Err(StageFailure::new(e, run.log.clone()));
        }

        let duration = start.elapsed();
        info!(
            duration_ms = duration.as_millis() as u64,
            stages_completed = self.checkpoint.completed_stages.len(),
            "Pipeline completed"
        );

        Ok(PipelineReport {
            run_id: self.checkpoint.run_id.clone(),
            source: self.checkpoint.source.clone(),
            status: self.checkpoint.status,
            stages_completed: self.checkpoint.completed_stages.clone(),
            duration_ms: duration.as_millis() as u64,
            outputs: self.checkpoint.stage_outputs.clone(),
            problems: run.log.problem_count(),
        })
    }

    /// Run a single stage
    async fn run_stage(
        &self,
        stage: PipelineStage,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        match stage {
            PipelineStage::Catalog => self.run_catalog(source, run, log).await,
            PipelineStage::Profile => self.run_profile(source, run, log).await,
            PipelineStage::Similarity => self.run_similarity(source, run, log).await,
            PipelineStage::Relations => self.run_relations(source, run, log).await,
            PipelineStage::Serialize => self.run_serialize(source, run, log).await,
        }
    }

    async fn run_catalog(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        let catalog = absorb(list_columns(source, &self.internal).await, log)?;
        let output = StageOutput::success(catalog.len())
            .with_metadata("tables", serde_json::json!(catalog.table_count()));
        run.catalog = Some(catalog);
        Ok(output)
    }

    async fn run_profile(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        let stage = PipelineStage::Profile;
        let catalog = self.scanned_catalog(source, run, log, stage).await?;
        let profiler = CardinalityProfiler::new(self.config.profiling.clone())
            .with_cancel(self.cancel.clone());
        let index = absorb(profiler.profile(source, &catalog).await, log)?;

        self.check_cancelled()?;
        self.store
            .write_cardinality(source, &index)
            .await
            .inspect_err(|e| log.error(stage, e.to_string()))?;

        let output = StageOutput::success(index.len())
            .with_failures(log.problem_count())
            .with_table(self.store.cardinality_table().to_string())
            .with_metadata("undefined", serde_json::json!(index.undefined_count()));
        run.cardinality = Some(index);
        Ok(output)
    }

    async fn run_similarity(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        let stage = PipelineStage::Similarity;
        let catalog = match run.catalog.clone() {
            Some(catalog) => catalog,
            None => self
                .cardinality(source, run, log, stage)
                .await?
                .to_catalog(source.identity()),
        };
        let estimator = SimilarityEstimator::new(self.config.similarity.clone())
            .with_cancel(self.cancel.clone());
        let edges = absorb(estimator.estimate(source, &catalog).await, log)?;

        self.check_cancelled()?;
        self.store
            .write_similarity(source, &edges)
            .await
            .inspect_err(|e| log.error(stage, e.to_string()))?;

        let output = StageOutput::success(edges.len())
            .with_failures(log.problem_count())
            .with_table(self.store.similarity_table().to_string())
            .with_metadata(
                "strategy",
                serde_json::json!(format!("{:?}", self.config.similarity.strategy)),
            );
        run.similarity = Some(edges);
        Ok(output)
    }

    async fn run_relations(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        let stage = PipelineStage::Relations;
        let index = self.cardinality(source, run, log, stage).await?;
        let similarity = match &run.similarity {
            Some(edges) => edges.clone(),
            None => {
                let edges = self
                    .store
                    .load_similarity(source)
                    .await
                    .inspect_err(|e| log.error(stage, e.to_string()))?;
                log.info(
                    stage,
                    format!("loaded {} similarity edges from snapshot", edges.len()),
                );
                edges
            }
        };

        let edges = {
            let outcome = self.builder.build(&index, &similarity);
            log.extend(outcome.log);
            outcome.output
        };

        self.check_cancelled()?;
        self.store
            .write_relations(source, &edges)
            .await
            .inspect_err(|e| log.error(stage, e.to_string()))?;

        let directional = edges.iter().filter(|e| e.is_directional()).count();
        let output = StageOutput::success(edges.len())
            .with_failures(log.problem_count())
            .with_table(self.store.relation_table().to_string())
            .with_metadata("directional", serde_json::json!(directional));
        run.relations = Some(edges);
        Ok(output)
    }

    async fn run_serialize(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
    ) -> PipelineResult<StageOutput> {
        let stage = PipelineStage::Serialize;
        let catalog = self.scanned_catalog(source, run, log, stage).await?;
        let relations = match &run.relations {
            Some(edges) => edges.clone(),
            None => {
                let edges = self
                    .store
                    .load_relations(source)
                    .await
                    .inspect_err(|e| log.error(stage, e.to_string()))?;
                log.info(
                    stage,
                    format!("loaded {} relation edges from snapshot", edges.len()),
                );
                edges
            }
        };

        let text = {
            let outcome = SchemaSerializer::new(self.internal.clone()).serialize(&catalog, &relations);
            log.extend(outcome.log);
            outcome.output
        };
        let output = StageOutput::success(text.len())
            .with_metadata("lines", serde_json::json!(text.lines().count()));
        run.relations = Some(relations);
        run.schema_text = Some(text);
        Ok(output)
    }

    /// Catalog from memory, else a fresh metadata scan
    async fn scanned_catalog(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
        stage: PipelineStage,
    ) -> PipelineResult<Catalog> {
        if let Some(catalog) = &run.catalog {
            return Ok(catalog.clone());
        }
        log.info(stage, "catalog not in memory, scanning source metadata");
        let catalog = absorb(list_columns(source, &self.internal).await, log)?;
        run.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// Cardinality index from memory, else from its snapshot
    async fn cardinality(
        &self,
        source: &dyn DataSource,
        run: &mut PipelineRun,
        log: &mut RunLog,
        stage: PipelineStage,
    ) -> PipelineResult<CardinalityIndex> {
        if let Some(index) = &run.cardinality {
            return Ok(index.clone());
        }
        let index = self
            .store
            .load_cardinality(source)
            .await
            .inspect_err(|e| log.error(stage, e.to_string()))?;
        log.info(
            stage,
            format!("loaded {} cardinality records from snapshot", index.len()),
        );
        run.cardinality = Some(index.clone());
        Ok(index)
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Save checkpoint to disk, if a path is configured
    fn save_checkpoint(&self) -> PipelineResult<()> {
        match &self.config.checkpoint {
            Some(path) => self.checkpoint.save(path),
            None => Ok(()),
        }
    }

    fn save_checkpoint_quietly(&self) {
        if let Err(e) = self.save_checkpoint() {
            warn!(error = %e, "Could not save checkpoint");
        }
    }

    /// Hash the stage settings for change detection
    fn hash_config(config: &PipelineConfig) -> String {
        let mut hasher = Sha256::new();
        let settings = (
            &config.profiling,
            &config.similarity,
            &config.graph,
            &config.output,
        );
        match serde_json::to_vec(&settings) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) => debug!(error = %e, "Config not serializable, hashing defaults"),
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Report from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Run ID
    pub run_id: String,
    /// Identity of the profiled source
    pub source: String,
    /// Final status
    pub status: PipelineStatus,
    /// Completed stages
    pub stages_completed: Vec<PipelineStage>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Stage outputs keyed by stage name
    pub outputs: BTreeMap<String, StageOutput>,
    /// Warnings and errors in the run log
    pub problems: usize,
}

impl PipelineReport {
    /// Check if pipeline was successful
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Isolated per-item failures across all stages
    pub fn total_failures(&self) -> usize {
        self.outputs.values().map(|o| o.failures).sum()
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("Pipeline {} - {}", self.run_id, self.status);
        eprintln!("Source: {}", self.source);
        eprintln!("Duration: {}", self.duration_formatted());
        eprintln!("Stages completed: {}", self.stages_completed.len());

        for stage in &self.stages_completed {
            if let Some(output) = self.outputs.get(stage.name()) {
                let status = if output.success { "ok" } else { "failed" };
                eprintln!(
                    "  - {}: {} ({} items, {} failed, {}ms)",
                    stage.name(),
                    status,
                    output.items,
                    output.failures,
                    output.duration_ms
                );
            }
        }
        if self.problems > 0 {
            eprintln!("Warnings: {}", self.problems);
        }
    }
}
