//! Cardinality profiler
//!
//! Computes `distinct / non_null` for every catalogued column. Columns are
//! independent, so they are profiled as an unordered bounded parallel map;
//! results are put back in catalog order before returning.

use futures::stream::{self, StreamExt};
use tracing::{Instrument, debug, info_span};

use crate::config::ProfilingConfig;
use crate::error::{ItemFailure, PipelineError, StageFailure, StageResult};
use crate::log::{RunLog, StageOutcome};
use crate::models::{Catalog, CardinalityIndex, CardinalityRecord, ColumnRef};
use crate::pipeline::{CancelHandle, PipelineStage};
use crate::source::{Aggregate, DataSource, SourceResult, TableName, with_timeout};

/// Cardinality from raw counts; undefined when there are no non-null values
pub fn cardinality_ratio(distinct: u64, non_null: u64) -> Option<f64> {
    if non_null == 0 {
        return None;
    }
    Some((distinct as f64 / non_null as f64).clamp(0.0, 1.0))
}

/// Profiles cardinality per column
#[derive(Debug, Clone, Default)]
pub struct CardinalityProfiler {
    config: ProfilingConfig,
    cancel: CancelHandle,
}

impl CardinalityProfiler {
    pub fn new(config: ProfilingConfig) -> Self {
        Self {
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Observe a run's cancellation handle
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Profile one column
    pub async fn profile_column(
        &self,
        source: &dyn DataSource,
        column: &ColumnRef,
    ) -> SourceResult<Option<f64>> {
        let request = Aggregate::ColumnCounts {
            table: TableName::new(column.container(), column.table()),
            column: column.column().to_string(),
        };
        let (distinct, non_null) = with_timeout(
            self.config.query_timeout(),
            source.execute_aggregate(&request),
        )
        .await?
        .into_counts()?;
        debug!(column = %column, distinct, non_null, "Counted column");
        Ok(cardinality_ratio(distinct, non_null))
    }

    /// Profile every column of the catalog
    ///
    /// A column whose aggregate fails is recorded with undefined cardinality
    /// and logged as `ColumnProfileFailed`; the run continues.
    pub async fn profile(&self, source: &dyn DataSource, catalog: &Catalog) -> StageResult<CardinalityIndex> {
        let stage = PipelineStage::Profile;
        let mut log = RunLog::new();
        let span = info_span!("profile", columns = catalog.len());

        let mut results: Vec<(usize, Result<Option<f64>, String>)> =
            stream::iter(catalog.iter().enumerate())
                .map(|(position, column)| async move {
                    if self.cancel.is_cancelled() {
                        return (position, Err("cancelled".to_string()));
                    }
                    let result = self
                        .profile_column(source, column)
                        .await
                        .map_err(|e| e.to_string());
                    (position, result)
                })
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect::<Vec<_>>()
                .instrument(span)
                .await;

        if self.cancel.is_cancelled() {
            log.error(stage, "profiling cancelled");
            return Err(StageFailure::new(PipelineError::Cancelled, log));
        }

        results.sort_by_key(|(position, _)| *position);

        let mut index = CardinalityIndex::new();
        let mut failed = 0usize;
        for (position, result) in results {
            let column = &catalog.columns()[position];
            let cardinality = match result {
                Ok(value) => value,
                Err(message) => {
                    failed += 1;
                    log.failure(
                        stage,
                        &ItemFailure::ColumnProfileFailed {
                            column: column.to_string(),
                            message,
                        },
                    );
                    None
                }
            };
            index.insert(CardinalityRecord::new(column.clone(), cardinality));
        }

        log.info(
            stage,
            format!(
                "profiled {} columns ({} failed, {} undefined)",
                index.len(),
                failed,
                index.undefined_count()
            ),
        );
        Ok(StageOutcome::new(index, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, Value};

    fn catalog_for(source: &MemorySource) -> Catalog {
        let mut columns = Vec::new();
        for table in source.table_names() {
            columns.push(ColumnRef::new(&table.container, &table.table, "v", "INTEGER"));
        }
        Catalog::new("memory://profile", columns)
    }

    fn ints(values: &[Option<i64>]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![Value::from(*v)]).collect()
    }

    #[test]
    fn test_cardinality_ratio() {
        assert_eq!(cardinality_ratio(10, 10), Some(1.0));
        assert_eq!(cardinality_ratio(1, 4), Some(0.25));
        assert_eq!(cardinality_ratio(0, 0), None);
    }

    #[tokio::test]
    async fn test_profile_edge_cases() {
        let source = MemorySource::new("memory://profile")
            .with_table("main", "unique", &[("v", "INTEGER")], ints(&[Some(1), Some(2), Some(3)]))
            .with_table("main", "same", &[("v", "INTEGER")], ints(&[Some(7); 100]))
            .with_table("main", "empty", &[("v", "INTEGER")], ints(&[None, None]))
            .with_table(
                "main",
                "sparse",
                &[("v", "INTEGER")],
                ints(&[Some(1), None, Some(1), Some(2)]),
            );
        let catalog = catalog_for(&source);

        let outcome = CardinalityProfiler::default()
            .profile(&source, &catalog)
            .await
            .unwrap();
        let index = outcome.output;
        let get = |table: &str| {
            index
                .cardinality(ColumnRef::new("main", table, "v", "INTEGER").id())
                .unwrap()
        };

        assert_eq!(get("unique"), Some(1.0));
        assert_eq!(get("same"), Some(0.01));
        assert_eq!(get("empty"), None);
        assert!((get("sparse").unwrap() - 2.0 / 3.0).abs() < 1e-12);
        // catalog order is preserved
        let tables: Vec<_> = index.iter().map(|r| r.column.table()).collect();
        assert_eq!(tables, vec!["empty", "same", "sparse", "unique"]);
    }

    #[tokio::test]
    async fn test_failed_column_is_isolated() {
        let source = MemorySource::new("memory://profile")
            .with_table("main", "good", &[("v", "INTEGER")], ints(&[Some(1), Some(2)]))
            .with_table("main", "bad", &[("v", "INTEGER")], ints(&[Some(1), Some(2)]));
        source.break_column("main", "bad", "v");
        let catalog = catalog_for(&source);

        let outcome = CardinalityProfiler::new(ProfilingConfig::default().with_max_concurrency(1))
            .profile(&source, &catalog)
            .await
            .unwrap();

        assert_eq!(outcome.output.len(), 2);
        assert_eq!(outcome.output.undefined_count(), 1);
        assert_eq!(outcome.log.problem_count(), 1);
        assert_eq!(outcome.log.problems().next().unwrap().key.as_deref(), Some("bad.v"));
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_failure() {
        let source = MemorySource::new("memory://profile").with_table(
            "main",
            "t",
            &[("v", "INTEGER")],
            ints(&[Some(1)]),
        );
        let cancel = CancelHandle::new();
        cancel.cancel();

        let failure = CardinalityProfiler::default()
            .with_cancel(cancel)
            .profile(&source, &catalog_for(&source))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::Cancelled));
    }
}
