//! Column catalog
//!
//! Enumerates every (table, column, declared type) a source exposes, minus
//! the snapshot tables the pipeline writes itself.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::OutputConfig;
use crate::error::{PipelineError, StageFailure, StageResult};
use crate::log::{RunLog, StageOutcome};
use crate::models::{Catalog, ColumnRef};
use crate::pipeline::PipelineStage;
use crate::source::{DataSource, TableName};

/// Tables written by the pipeline, never catalogued or described
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTables {
    container: String,
    names: BTreeSet<String>,
}

impl InternalTables {
    pub fn new<I, S>(container: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container: container.into(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_output(output: &OutputConfig) -> Self {
        Self::new(output.container.clone(), output.table_names())
    }

    pub fn contains(&self, container: &str, table: &str) -> bool {
        container == self.container && self.names.contains(table)
    }

    pub fn is_internal(&self, table: &TableName) -> bool {
        self.contains(&table.container, &table.table)
    }
}

impl Default for InternalTables {
    fn default() -> Self {
        Self::from_output(&OutputConfig::default())
    }
}

/// Scan the source's metadata into a [`Catalog`]
///
/// Fails fast with `SourceUnavailable` on any metadata error; no partial
/// catalog is returned.
pub async fn list_columns(source: &dyn DataSource, internal: &InternalTables) -> StageResult<Catalog> {
    let stage = PipelineStage::Catalog;
    let mut log = RunLog::new();
    let identity = source.identity();

    let tables = match source.list_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            log.error(stage, format!("cannot list tables of {identity}: {e}"));
            return Err(StageFailure::new(PipelineError::from_source(e), log));
        }
    };

    let mut columns = Vec::new();
    let mut skipped = 0usize;
    let mut scanned = 0usize;
    for table in &tables {
        if internal.is_internal(table) {
            debug!(table = %table, "Skipping internal table");
            skipped += 1;
            continue;
        }
        let defs = match source.list_columns(table).await {
            Ok(defs) => defs,
            Err(e) => {
                log.error(stage, format!("cannot list columns of {table}: {e}"));
                return Err(StageFailure::new(PipelineError::from_source(e), log));
            }
        };
        scanned += 1;
        columns.extend(
            defs.into_iter()
                .map(|def| ColumnRef::new(&table.container, &table.table, def.name, def.data_type)),
        );
    }

    let catalog = Catalog::new(identity, columns);
    log.info(
        stage,
        format!(
            "catalogued {} columns in {scanned} tables ({skipped} internal tables skipped)",
            catalog.len()
        ),
    );
    Ok(StageOutcome::new(catalog, log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, Value};

    fn source() -> MemorySource {
        MemorySource::new("memory://catalog")
            .with_table(
                "main",
                "orders",
                &[("customer_id", "INTEGER"), ("total", "DOUBLE")],
                vec![vec![Value::Int(1), Value::Float(9.5)]],
            )
            .with_table(
                "main",
                "cardinality_index",
                &[("column_id", "TEXT")],
                Vec::new(),
            )
            .with_table("archive", "relation_map", &[("x", "TEXT")], Vec::new())
    }

    #[tokio::test]
    async fn test_excludes_own_tables_only_in_output_container() {
        let outcome = list_columns(&source(), &InternalTables::default())
            .await
            .unwrap();
        let catalog = outcome.output;

        let tables: Vec<_> = catalog.iter().map(|c| c.table()).collect();
        assert_eq!(tables, vec!["relation_map", "orders", "orders"]);
        assert_eq!(catalog.columns()[1].declared_type(), "INTEGER");
        assert_eq!(catalog.source(), "memory://catalog");
        assert!(outcome.log.render().contains("1 internal tables skipped"));
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_fast() {
        let source = source();
        source.set_offline(true);
        let failure = list_columns(&source, &InternalTables::default())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::SourceUnavailable(_)));
        assert_eq!(failure.log.problem_count(), 1);
    }
}
