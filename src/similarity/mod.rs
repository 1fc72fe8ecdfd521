//! Similarity estimator
//!
//! Estimates the Jaccard similarity of the value sets of every same-typed
//! column pair across different tables, and keeps the pairs whose estimate
//! reaches the configured threshold.
//!
//! Each involved column is sketched exactly once per run (in parallel,
//! bounded by `max_concurrency`), then every candidate pair is scored from
//! the two cached sketches. Two sketch strategies are supported:
//!
//! - [`SketchStrategy::MinHash`]: values are read back with `bulk_read` and
//!   hashed locally into a `signature_size`-slot min-hash signature.
//! - [`SketchStrategy::BottomK`]: the source computes the `signature_size`
//!   smallest fingerprints itself, so only `k` integers cross the wire.
//!
//! The two are both bounded-size approximations of the same quantity but
//! are not bit-identical; switching strategy can shift scores slightly.

mod sketch;

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tracing::{Instrument, debug, info_span};

pub use sketch::{BottomKSketch, MinHashSignature, MinHasher, fingerprint};

use crate::config::{SimilarityConfig, SketchStrategy};
use crate::error::{ItemFailure, PipelineError, StageFailure, StageResult};
use crate::log::{RunLog, StageOutcome};
use crate::models::{Catalog, ColumnId, ColumnRef, SimilarityEdge, pair_key};
use crate::pipeline::{CancelHandle, PipelineStage};
use crate::source::{Aggregate, DataSource, SourceResult, TableName, Value, with_timeout};

/// Two columns to compare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// All same-typed, cross-table column pairs of a catalog, in catalog order
///
/// Each unordered pair appears once, with the earlier column on the left.
pub fn candidate_pairs(catalog: &Catalog) -> Vec<CandidatePair> {
    let columns = catalog.columns();
    let mut pairs = Vec::new();
    for (i, left) in columns.iter().enumerate() {
        for right in &columns[i + 1..] {
            if left.declared_type() == right.declared_type() && !left.same_table(right) {
                pairs.push(CandidatePair {
                    left: left.clone(),
                    right: right.clone(),
                });
            }
        }
    }
    pairs
}

/// Sketch of one column's value set
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSketch {
    MinHash(MinHashSignature),
    BottomK(BottomKSketch),
}

impl ColumnSketch {
    /// Estimated Jaccard similarity; mismatched kinds score 0.0
    pub fn jaccard(&self, other: &ColumnSketch) -> f64 {
        match (self, other) {
            (Self::MinHash(a), Self::MinHash(b)) => a.jaccard(b),
            (Self::BottomK(a), Self::BottomK(b)) => a.jaccard(b),
            _ => 0.0,
        }
    }
}

/// Estimates pairwise similarity between catalogued columns
#[derive(Debug, Clone)]
pub struct SimilarityEstimator {
    config: SimilarityConfig,
    hasher: MinHasher,
    cancel: CancelHandle,
}

impl Default for SimilarityEstimator {
    fn default() -> Self {
        Self::new(SimilarityConfig::default())
    }
}

impl SimilarityEstimator {
    pub fn new(config: SimilarityConfig) -> Self {
        let hasher = MinHasher::new(config.signature_size, config.seed);
        Self {
            config,
            hasher,
            cancel: CancelHandle::new(),
        }
    }

    /// Observe a run's cancellation handle
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Build the sketch of one column
    pub async fn sketch_column(
        &self,
        source: &dyn DataSource,
        column: &ColumnRef,
    ) -> SourceResult<ColumnSketch> {
        let table = TableName::new(column.container(), column.table());
        let timeout = self.config.query_timeout();
        match self.config.strategy {
            SketchStrategy::MinHash => {
                let values =
                    with_timeout(timeout, source.bulk_read(&table, column.column())).await?;
                let signature = self
                    .hasher
                    .signature(values.iter().filter_map(Value::canonical));
                Ok(ColumnSketch::MinHash(signature))
            }
            SketchStrategy::BottomK => {
                let k = self.config.signature_size.max(1);
                let request = Aggregate::BottomK {
                    table,
                    column: column.column().to_string(),
                    k,
                };
                let fingerprints = with_timeout(timeout, source.execute_aggregate(&request))
                    .await?
                    .into_fingerprints()?;
                Ok(ColumnSketch::BottomK(BottomKSketch::from_fingerprints(
                    k,
                    fingerprints,
                )))
            }
        }
    }

    /// Estimate every candidate pair of the catalog
    pub async fn estimate(
        &self,
        source: &dyn DataSource,
        catalog: &Catalog,
    ) -> StageResult<Vec<SimilarityEdge>> {
        let pairs = candidate_pairs(catalog);
        self.estimate_pairs(source, &pairs).await
    }

    /// Estimate the given pairs, keeping those at or above the threshold
    ///
    /// Pairs failing the same-type/different-table rule are ignored, and a
    /// reversed duplicate of an earlier pair is collapsed into it. Output
    /// follows input order regardless of how the parallel work completed.
    pub async fn estimate_pairs(
        &self,
        source: &dyn DataSource,
        pairs: &[CandidatePair],
    ) -> StageResult<Vec<SimilarityEdge>> {
        let stage = PipelineStage::Similarity;
        let mut log = RunLog::new();

        let mut seen = HashSet::new();
        let pairs: Vec<&CandidatePair> = pairs
            .iter()
            .filter(|p| {
                p.left.declared_type() == p.right.declared_type() && !p.left.same_table(&p.right)
            })
            .filter(|p| seen.insert(pair_key(p.left.id(), p.right.id())))
            .collect();

        let mut columns: BTreeMap<ColumnId, &ColumnRef> = BTreeMap::new();
        for pair in &pairs {
            columns.insert(pair.left.id(), &pair.left);
            columns.insert(pair.right.id(), &pair.right);
        }

        let span = info_span!(
            "similarity",
            pairs = pairs.len(),
            columns = columns.len(),
            strategy = ?self.config.strategy
        );
        let sketches: HashMap<ColumnId, Result<ColumnSketch, String>> =
            stream::iter(columns.into_values())
                .map(|column| async move {
                    if self.cancel.is_cancelled() {
                        return (column.id(), Err("cancelled".to_string()));
                    }
                    let sketch = self
                        .sketch_column(source, column)
                        .await
                        .map_err(|e| format!("{column}: {e}"));
                    (column.id(), sketch)
                })
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect::<HashMap<_, _>>()
                .instrument(span)
                .await;

        if self.cancel.is_cancelled() {
            log.error(stage, "similarity estimation cancelled");
            return Err(StageFailure::new(PipelineError::Cancelled, log));
        }

        let threshold = self.config.similarity_threshold;
        let mut edges = Vec::new();
        let mut failed = 0usize;
        for pair in &pairs {
            let left = sketches.get(&pair.left.id());
            let right = sketches.get(&pair.right.id());
            let score = match (left, right) {
                (Some(Ok(a)), Some(Ok(b))) => a.jaccard(b),
                (l, r) => {
                    let message = [l, r]
                        .into_iter()
                        .filter_map(|s| match s {
                            Some(Err(e)) => Some(e.clone()),
                            None => Some("sketch missing".to_string()),
                            Some(Ok(_)) => None,
                        })
                        .collect::<Vec<_>>()
                        .join("; ");
                    failed += 1;
                    log.failure(
                        stage,
                        &ItemFailure::PairEstimateFailed {
                            left: pair.left.to_string(),
                            right: pair.right.to_string(),
                            message,
                        },
                    );
                    continue;
                }
            };
            debug!(left = %pair.left, right = %pair.right, score, "Estimated pair");
            if score >= threshold {
                edges.push(SimilarityEdge::new(
                    pair.left.clone(),
                    pair.right.clone(),
                    score,
                ));
            }
        }

        log.info(
            stage,
            format!(
                "estimated {} candidate pairs: {} retained at >= {threshold}, {failed} failed",
                pairs.len(),
                edges.len()
            ),
        );
        Ok(StageOutcome::new(edges, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn texts(values: impl IntoIterator<Item = String>) -> Vec<Vec<Value>> {
        values.into_iter().map(|v| vec![Value::Text(v)]).collect()
    }

    fn range(prefix: &str, r: std::ops::Range<u32>) -> Vec<Vec<Value>> {
        texts(r.map(|i| format!("{prefix}{i}")))
    }

    fn catalog(columns: &[(&str, &str, &str)]) -> Catalog {
        Catalog::new(
            "memory://sim",
            columns
                .iter()
                .map(|(t, c, ty)| ColumnRef::new("main", *t, *c, *ty))
                .collect(),
        )
    }

    #[test]
    fn test_candidate_pairs_rules() {
        let catalog = catalog(&[
            ("a", "x", "VARCHAR"),
            ("a", "y", "VARCHAR"),
            ("b", "x", "VARCHAR"),
            ("b", "n", "INTEGER"),
            ("c", "n", "INTEGER"),
        ]);
        let pairs: Vec<_> = candidate_pairs(&catalog)
            .into_iter()
            .map(|p| (p.left.to_string(), p.right.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a.x".to_string(), "b.x".to_string()),
                ("a.y".to_string(), "b.x".to_string()),
                ("b.n".to_string(), "c.n".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_identical_and_disjoint_sets() {
        let source = MemorySource::new("memory://sim")
            .with_table("main", "a", &[("v", "VARCHAR")], range("k", 0..300))
            .with_table("main", "b", &[("v", "VARCHAR")], range("k", 0..300))
            .with_table("main", "c", &[("v", "VARCHAR")], range("z", 0..300));
        let catalog = catalog(&[("a", "v", "VARCHAR"), ("b", "v", "VARCHAR"), ("c", "v", "VARCHAR")]);

        let estimator = SimilarityEstimator::new(SimilarityConfig::default().with_threshold(0.0));
        let edges = estimator.estimate(&source, &catalog).await.unwrap().output;

        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].score, 1.0);
        assert_eq!(edges[1].score, 0.0);
        assert_eq!(edges[2].score, 0.0);
    }

    #[tokio::test]
    async fn test_threshold_filters_and_symmetry() {
        let source = MemorySource::new("memory://sim")
            .with_table("main", "a", &[("v", "VARCHAR")], range("k", 0..1000))
            .with_table("main", "b", &[("v", "VARCHAR")], range("k", 250..1250));
        let forward = catalog(&[("a", "v", "VARCHAR"), ("b", "v", "VARCHAR")]);
        let backward = catalog(&[("b", "v", "VARCHAR"), ("a", "v", "VARCHAR")]);

        // true overlap is 750 / 1250 = 0.6
        let loose = SimilarityEstimator::new(SimilarityConfig::default().with_threshold(0.3));
        let ab = loose.estimate(&source, &forward).await.unwrap().output;
        let ba = loose.estimate(&source, &backward).await.unwrap().output;
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].score, ba[0].score);
        assert!((ab[0].score - 0.6).abs() < 0.15);

        let strict = SimilarityEstimator::new(SimilarityConfig::default().with_threshold(0.9));
        assert!(strict.estimate(&source, &forward).await.unwrap().output.is_empty());
    }

    #[tokio::test]
    async fn test_failed_column_skips_its_pairs() {
        let source = MemorySource::new("memory://sim")
            .with_table("main", "a", &[("v", "VARCHAR")], range("k", 0..50))
            .with_table("main", "b", &[("v", "VARCHAR")], range("k", 0..50))
            .with_table("main", "c", &[("v", "VARCHAR")], range("k", 0..50));
        source.break_column("main", "c", "v");
        let catalog = catalog(&[("a", "v", "VARCHAR"), ("b", "v", "VARCHAR"), ("c", "v", "VARCHAR")]);

        let outcome = SimilarityEstimator::default()
            .estimate(&source, &catalog)
            .await
            .unwrap();
        assert_eq!(outcome.output.len(), 1);
        assert_eq!(outcome.output[0].score, 1.0);
        assert_eq!(outcome.log.problem_count(), 2);
    }

    #[tokio::test]
    async fn test_reversed_duplicates_collapse() {
        let source = MemorySource::new("memory://sim")
            .with_table("main", "a", &[("v", "VARCHAR")], range("k", 0..20))
            .with_table("main", "b", &[("v", "VARCHAR")], range("k", 0..20));
        let a = ColumnRef::new("main", "a", "v", "VARCHAR");
        let b = ColumnRef::new("main", "b", "v", "VARCHAR");
        let pairs = vec![
            CandidatePair { left: a.clone(), right: b.clone() },
            CandidatePair { left: b.clone(), right: a.clone() },
            CandidatePair { left: a.clone(), right: a.clone() },
        ];

        let edges = SimilarityEstimator::default()
            .estimate_pairs(&source, &pairs)
            .await
            .unwrap()
            .output;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].left, a);
    }

    #[tokio::test]
    async fn test_bottom_k_strategy() {
        let source = MemorySource::new("memory://sim")
            .with_table("main", "a", &[("v", "INTEGER")], (0..500).map(|i| vec![Value::Int(i)]).collect())
            .with_table("main", "b", &[("v", "INTEGER")], (0..500).map(|i| vec![Value::Int(i)]).collect());
        let catalog = catalog(&[("a", "v", "INTEGER"), ("b", "v", "INTEGER")]);

        let estimator = SimilarityEstimator::new(
            SimilarityConfig::default()
                .with_strategy(SketchStrategy::BottomK)
                .with_signature_size(64),
        );
        let edges = estimator.estimate(&source, &catalog).await.unwrap().output;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].score, 1.0);
    }
}
