//! `obscura describe` and `obscura prompt`

use obscura::serialize::plain_text;
use obscura::{PipelineConfig, PipelineExecutor, PipelineRun, PipelineStage, QueryPrompt, Settings};

use super::{open_source, report_failure};

/// Serialize the persisted relation map against a fresh catalog
async fn schema_text(settings: &Settings) -> anyhow::Result<String> {
    let mut config = PipelineConfig::from_settings(settings)
        .with_stage_range(PipelineStage::Serialize, PipelineStage::Serialize);
    // leave the checkpoint of the last full run alone
    config.checkpoint = None;

    let mut executor = PipelineExecutor::new(config)?;
    let source = open_source(settings).await?;
    let mut run = PipelineRun::new();
    executor
        .run(source.as_ref(), &mut run)
        .await
        .map_err(report_failure)?;
    Ok(run.schema_text.unwrap_or_default())
}

/// Handle the `describe` command
pub async fn handle_describe(settings: &Settings, plain: bool) -> anyhow::Result<()> {
    let text = schema_text(settings).await?;
    if plain {
        println!("{}", plain_text(&text));
    } else {
        println!("{text}");
    }
    Ok(())
}

/// Handle the `prompt` command
pub async fn handle_prompt(settings: &Settings, question: &str) -> anyhow::Result<()> {
    let text = schema_text(settings).await?;
    println!("{}", QueryPrompt::new(text, question).build());
    Ok(())
}
