//! CLI command implementations

pub mod describe;
pub mod ingest;
pub mod pipeline;

use anyhow::Context;
use obscura::{DataSource, PipelineError, Settings, SourceSettings, StageFailure};

/// Open the backend named in `[source]`
pub async fn open_source(settings: &Settings) -> anyhow::Result<Box<dyn DataSource>> {
    match &settings.source {
        #[cfg(feature = "duckdb-backend")]
        SourceSettings::Duckdb { path } => {
            let source = match path {
                Some(path) => {
                    let path_str = path
                        .to_str()
                        .with_context(|| format!("non UTF-8 database path: {}", path.display()))?;
                    obscura::DuckDbSource::open(path_str)
                }
                None => obscura::DuckDbSource::memory(),
            };
            Ok(Box::new(source.map_err(PipelineError::from_source)?))
        }
        #[cfg(feature = "postgres-backend")]
        SourceSettings::Postgres {
            connection_string,
            schema,
            max_connections,
        } => {
            let mut source = obscura::WarehouseSource::connect(connection_string, *max_connections)
                .await
                .map_err(PipelineError::from_source)?;
            if let Some(schema) = schema {
                source = source.with_schema(schema.clone());
            }
            Ok(Box::new(source))
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!(
            "this build does not include the backend for {other:?}; rebuild with the matching feature"
        ),
    }
}

/// Print the problems a failed stage logged and hand back its error
pub fn report_failure(failure: StageFailure) -> anyhow::Error {
    for entry in failure.log.problems() {
        eprintln!("  {entry}");
    }
    failure.error.into()
}
