//! `obscura ingest`

use std::path::Path;

use obscura::Settings;

/// Load every CSV file in `dir` into the configured DuckDB database
#[cfg(feature = "duckdb-backend")]
pub async fn handle_ingest(settings: &Settings, dir: &Path) -> anyhow::Result<()> {
    use anyhow::{Context, bail};
    use obscura::{DuckDbSource, PipelineError, SourceSettings};

    let SourceSettings::Duckdb { path: Some(path) } = &settings.source else {
        bail!("ingest needs [source] backend = \"duckdb\" with a database path");
    };
    let path_str = path
        .to_str()
        .with_context(|| format!("non UTF-8 database path: {}", path.display()))?;

    let source = DuckDbSource::open(path_str).map_err(PipelineError::from_source)?;
    let report = source
        .load_csv_directory(dir)
        .await
        .map_err(PipelineError::from_source)?;

    eprintln!("Loaded {} table(s) into {}", report.loaded.len(), path.display());
    for table in &report.loaded {
        eprintln!("  - {table}");
    }
    if !report.failed.is_empty() {
        eprintln!("Skipped {} file(s):", report.failed.len());
        for (file, reason) in &report.failed {
            eprintln!("  - {}: {reason}", file.display());
        }
    }
    if report.loaded.is_empty() {
        bail!("no CSV files loaded from {}", dir.display());
    }
    Ok(())
}

#[cfg(not(feature = "duckdb-backend"))]
pub async fn handle_ingest(_settings: &Settings, _dir: &Path) -> anyhow::Result<()> {
    anyhow::bail!("ingest needs a build with the duckdb-backend feature")
}
