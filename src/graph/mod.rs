//! Relation graph builder
//!
//! Combines two passes into one edge multiset:
//!
//! 1. Structural: columns of different tables sharing name and declared
//!    type, weight 1.0, priority 0.
//! 2. Statistical: similarity edges above the inclusion threshold whose
//!    endpoints both reach the minimum cardinality, weight = score,
//!    priority 1.
//!
//! Edges from the two passes are concatenated without deduplication; use
//! [`JoinGraph`] to get a merged view.
//!
//! Orientation: when exactly one endpoint is a detected unique key it is
//! placed on the right, so a directional edge always reads "many references
//! one". Otherwise structural edges follow catalog order and statistical
//! edges keep the orientation of their similarity edge.

mod exclude;
mod join;

use std::collections::HashMap;

use tracing::debug;

pub use exclude::ExcludePatterns;
pub use join::JoinGraph;

use crate::config::GraphConfig;
use crate::error::PipelineResult;
use crate::log::{RunLog, StageOutcome};
use crate::models::{CardinalityIndex, CardinalityRecord, ColumnRef, EdgeKind, RelationEdge, SimilarityEdge};
use crate::pipeline::PipelineStage;

/// Builds the relation map from cardinality and similarity snapshots
#[derive(Debug, Clone)]
pub struct RelationGraphBuilder {
    config: GraphConfig,
    exclude: ExcludePatterns,
}

impl RelationGraphBuilder {
    /// Fails only if an exclusion pattern does not compile
    pub fn new(config: GraphConfig) -> PipelineResult<Self> {
        let exclude = ExcludePatterns::new(config.exclude_columns.iter().cloned())?;
        Ok(Self { config, exclude })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn is_excluded(&self, column: &ColumnRef) -> bool {
        self.exclude.is_excluded(column.column())
    }

    /// Rebuild the full relation map
    pub fn build(
        &self,
        index: &CardinalityIndex,
        similarities: &[SimilarityEdge],
    ) -> StageOutcome<Vec<RelationEdge>> {
        let stage = PipelineStage::Relations;
        let mut log = RunLog::new();

        let mut edges = self.structural_edges(index);
        let structural = edges.len();
        edges.extend(self.statistical_edges(index, similarities, &mut log));

        log.info(
            stage,
            format!(
                "built {} relation edges ({structural} structural, {} statistical)",
                edges.len(),
                edges.len() - structural
            ),
        );
        StageOutcome::new(edges, log)
    }

    /// Same name and declared type in different tables
    pub fn structural_edges(&self, index: &CardinalityIndex) -> Vec<RelationEdge> {
        let records = index.records();
        let mut groups: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
        for (position, record) in records.iter().enumerate() {
            let column = &record.column;
            if self.is_excluded(column) {
                continue;
            }
            groups
                .entry((column.column(), column.declared_type()))
                .or_default()
                .push(position);
        }

        let mut pairs = Vec::new();
        for positions in groups.values() {
            for (i, &a) in positions.iter().enumerate() {
                for &b in &positions[i + 1..] {
                    if !records[a].column.same_table(&records[b].column) {
                        pairs.push((a, b));
                    }
                }
            }
        }
        pairs.sort_unstable();

        pairs
            .into_iter()
            .map(|(a, b)| oriented(&records[a], &records[b], 1.0, EdgeKind::Structural))
            .collect()
    }

    /// Similarity edges that pass the inclusion and cardinality filters
    pub fn statistical_edges(
        &self,
        index: &CardinalityIndex,
        similarities: &[SimilarityEdge],
        log: &mut RunLog,
    ) -> Vec<RelationEdge> {
        let threshold = self.config.similarity_threshold_for_inclusion;
        let min_cardinality = self.config.min_cardinality_for_statistical_edge;
        let passes = |record: &CardinalityRecord| {
            record.cardinality.is_some_and(|c| c >= min_cardinality)
        };

        let mut edges = Vec::new();
        for similarity in similarities {
            if similarity.score <= threshold
                || similarity.left.same_table(&similarity.right)
                || self.is_excluded(&similarity.left)
                || self.is_excluded(&similarity.right)
            {
                continue;
            }
            let (Some(left), Some(right)) = (
                index.get(similarity.left.id()),
                index.get(similarity.right.id()),
            ) else {
                log.warn(
                    PipelineStage::Relations,
                    format!("{} ~ {}", similarity.left, similarity.right),
                    "similarity edge references a column without a cardinality record",
                );
                continue;
            };
            if !passes(left) || !passes(right) {
                debug!(left = %similarity.left, right = %similarity.right, "Below cardinality floor");
                continue;
            }
            edges.push(oriented(left, right, similarity.score, EdgeKind::Statistical));
        }
        edges
    }
}

fn oriented(
    a: &CardinalityRecord,
    b: &CardinalityRecord,
    weight: f64,
    kind: EdgeKind,
) -> RelationEdge {
    let (left, right) = if a.is_unique() && !b.is_unique() {
        (b, a)
    } else {
        (a, b)
    };
    RelationEdge {
        left: left.column.clone(),
        right: right.column.clone(),
        left_cardinality: left.cardinality,
        right_cardinality: right.cardinality,
        weight,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &str, column: &str, ty: &str, cardinality: Option<f64>) -> CardinalityRecord {
        CardinalityRecord::new(ColumnRef::new("main", table, column, ty), cardinality)
    }

    fn col(table: &str, column: &str, ty: &str) -> ColumnRef {
        ColumnRef::new("main", table, column, ty)
    }

    fn orders_and_customers() -> CardinalityIndex {
        CardinalityIndex::from_records([
            record("orders", "id", "INTEGER", Some(1.0)),
            record("orders", "customer_id", "INTEGER", Some(0.3)),
            record("orders", "total", "DOUBLE", Some(0.9)),
            record("customers", "id", "INTEGER", Some(1.0)),
            record("customers", "customer_id", "INTEGER", Some(1.0)),
            record("customers", "name", "VARCHAR", Some(0.95)),
        ])
    }

    #[test]
    fn test_structural_many_to_one() {
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        let outcome = builder.build(&orders_and_customers(), &[]);
        let edges = outcome.output;

        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.left.to_string(), "orders.customer_id");
        assert_eq!(edge.right.to_string(), "customers.customer_id");
        assert_eq!(edge.kind, EdgeKind::Structural);
        assert_eq!(edge.weight, 1.0);
        assert_eq!(edge.left_side().as_str(), "many");
        assert_eq!(edge.right_side().as_str(), "one");
    }

    #[test]
    fn test_unique_side_moves_right() {
        let index = CardinalityIndex::from_records([
            record("customers", "customer_id", "INTEGER", Some(1.0)),
            record("orders", "customer_id", "INTEGER", Some(0.3)),
        ]);
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        let edges = builder.build(&index, &[]).output;
        assert_eq!(edges[0].left.table(), "orders");
        assert_eq!(edges[0].right.table(), "customers");
    }

    #[test]
    fn test_excluded_names_never_form_edges() {
        let index = orders_and_customers();
        let similarities = vec![SimilarityEdge::new(
            col("orders", "id", "INTEGER"),
            col("customers", "id", "INTEGER"),
            1.0,
        )];
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        let edges = builder.build(&index, &similarities).output;
        assert!(edges.iter().all(|e| e.left.column() != "id" && e.right.column() != "id"));
    }

    #[test]
    fn test_same_table_pairs_rejected() {
        let index = CardinalityIndex::from_records([
            record("t", "a", "INTEGER", Some(1.0)),
            record("t", "b", "INTEGER", Some(1.0)),
        ]);
        let similarities = vec![SimilarityEdge::new(col("t", "a", "INTEGER"), col("t", "b", "INTEGER"), 1.0)];
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        assert!(builder.build(&index, &similarities).output.is_empty());
    }

    #[test]
    fn test_statistical_filters() {
        let index = CardinalityIndex::from_records([
            record("a", "x", "VARCHAR", Some(0.9)),
            record("b", "y", "VARCHAR", Some(1.0)),
            record("c", "z", "VARCHAR", Some(0.2)),
            record("d", "w", "VARCHAR", None),
        ]);
        let similarities = vec![
            SimilarityEdge::new(col("b", "y", "VARCHAR"), col("a", "x", "VARCHAR"), 0.85),
            SimilarityEdge::new(col("a", "x", "VARCHAR"), col("c", "z", "VARCHAR"), 0.95),
            SimilarityEdge::new(col("a", "x", "VARCHAR"), col("d", "w", "VARCHAR"), 0.95),
            SimilarityEdge::new(col("a", "x", "VARCHAR"), col("b", "y", "VARCHAR"), 0.7),
        ];
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        let edges = builder.build(&index, &similarities).output;

        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.kind, EdgeKind::Statistical);
        assert_eq!(edge.weight, 0.85);
        // unique endpoint ends up on the right
        assert_eq!(edge.left.to_string(), "a.x");
        assert_eq!(edge.right.to_string(), "b.y");
    }

    #[test]
    fn test_duplicate_classes_kept_separately() {
        let index = CardinalityIndex::from_records([
            record("orders", "customer_id", "INTEGER", Some(0.6)),
            record("customers", "customer_id", "INTEGER", Some(1.0)),
        ]);
        let similarities = vec![SimilarityEdge::new(
            col("orders", "customer_id", "INTEGER"),
            col("customers", "customer_id", "INTEGER"),
            0.9,
        )];
        let builder = RelationGraphBuilder::new(GraphConfig::default()).unwrap();
        let edges = builder.build(&index, &similarities).output;
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].kind, EdgeKind::Structural);
        assert_eq!(edges[1].kind, EdgeKind::Statistical);
        assert_eq!(edges[0].pair_key(), edges[1].pair_key());
    }

    #[test]
    fn test_unknown_endpoint_is_logged() {
        let similarities = vec![SimilarityEdge::new(col("a", "x", "INTEGER"), col("b", "x", "INTEGER"), 0.99)];
        let builder = RelationGraphBuilder::new(GraphConfig::default().with_exclude_columns(Vec::<String>::new())).unwrap();
        let outcome = builder.build(&CardinalityIndex::new(), &similarities);
        assert!(outcome.output.is_empty());
        assert_eq!(outcome.log.problem_count(), 1);
    }
}
