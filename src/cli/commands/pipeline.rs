//! CLI commands for pipeline operations

use std::path::PathBuf;

use anyhow::Context;
use obscura::pipeline::Checkpoint;
use obscura::{PipelineConfig, PipelineExecutor, PipelineRun, PipelineStage, Settings};

use super::{open_source, report_failure};
use crate::output;

/// Arguments for the `run` command
pub struct RunArgs {
    pub from: PipelineStage,
    pub to: PipelineStage,
    /// Where to write the schema description
    pub output: Option<PathBuf>,
    /// Resume from checkpoint
    pub resume: bool,
}

/// Handle the `run` command
pub async fn handle_run(settings: &Settings, args: &RunArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_settings(settings)
        .with_stage_range(args.from, args.to)
        .with_resume(args.resume);
    let mut executor = PipelineExecutor::new(config)?;
    let source = open_source(settings).await?;

    let mut run = PipelineRun::new();
    let report = executor
        .run(source.as_ref(), &mut run)
        .await
        .map_err(report_failure)?;

    eprintln!("Pipeline run: {}", report.run_id);
    report.print_summary();

    if let Some(text) = &run.schema_text {
        match &args.output {
            Some(path) => {
                std::fs::write(path, text)
                    .with_context(|| format!("writing {}", path.display()))?;
                eprintln!("Schema description written to {}", path.display());
            }
            None => println!("{text}"),
        }
    }
    Ok(())
}

/// Handle the `status` command
pub fn handle_status(settings: &Settings) -> anyhow::Result<()> {
    let Some(path) = settings.checkpoint_path() else {
        eprintln!("No checkpoint location configured.");
        eprintln!("Set `checkpoint` in obscura.toml to track runs against this source.");
        return Ok(());
    };

    if !path.exists() {
        eprintln!("No pipeline checkpoint found at {}", path.display());
        eprintln!("Run 'obscura run' to start a new pipeline.");
        return Ok(());
    }

    let checkpoint = Checkpoint::load(&path)?;
    eprint!("{}", output::format_checkpoint(&checkpoint));
    Ok(())
}
