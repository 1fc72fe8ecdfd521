//! Staged pipeline from raw source to schema description
//!
//! # Example
//!
//! ```rust,ignore
//! use obscura::pipeline::{PipelineConfig, PipelineExecutor, PipelineRun, PipelineStage};
//!
//! let config = PipelineConfig::new()
//!     .with_stage_range(PipelineStage::Catalog, PipelineStage::Serialize)
//!     .with_checkpoint("shop.checkpoint.json");
//!
//! let mut executor = PipelineExecutor::new(config)?;
//! let mut run = PipelineRun::new();
//! let report = executor.run(&source, &mut run).await?;
//!
//! println!("{}", run.schema_text.unwrap_or_default());
//! ```
//!
//! # Pipeline Stages
//!
//! 1. **Catalog**: List every column of the source
//! 2. **Profile**: Cardinality ratio per column, persisted
//! 3. **Similarity**: MinHash or bottom-k estimates per candidate pair, persisted
//! 4. **Relations**: Structural and statistical join edges, persisted
//! 5. **Serialize**: Plain-text schema description
//!
//! A run may start at any stage. Inputs that are not held in the
//! [`PipelineRun`] are reloaded from their snapshot tables.
//!
//! # Checkpointing
//!
//! With a checkpoint path configured, progress is saved after every stage.
//! `with_resume(true)` continues after the last completed stage as long as
//! the stage settings are unchanged.

mod cancel;
mod checkpoint;
mod config;
mod executor;
mod lock;
mod run;

pub use cancel::CancelHandle;
pub use checkpoint::{Checkpoint, PipelineStatus, StageOutput};
pub use config::{PipelineConfig, PipelineStage};
pub use executor::{PipelineExecutor, PipelineReport};
pub use lock::SourceLocks;
pub use run::PipelineRun;

use crate::error::StageFailure;
use crate::source::DataSource;

/// Run every configured stage once with a fresh run context
pub async fn run_pipeline(
    source: &dyn DataSource,
    config: PipelineConfig,
) -> Result<(PipelineReport, PipelineRun), StageFailure> {
    let mut run = PipelineRun::new();
    let mut executor = match PipelineExecutor::new(config) {
        Ok(executor) => executor,
        Err(e) => return Err(StageFailure::new(e, run.log)),
    };
    let report = executor.run(source, &mut run).await?;
    Ok((report, run))
}
