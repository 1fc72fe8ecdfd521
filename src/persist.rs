//! Snapshot persistence
//!
//! The three stage outputs are stored as plain tables in the source itself
//! so they can be inspected between runs and reloaded by a later run that
//! starts mid-pipeline. Column types are limited to `TEXT`, `FLOAT8` and
//! `BIGINT`, which every supported backend accepts.
//!
//! Encoding and decoding are pure functions over [`Row`]s; the store only
//! adds the table names and the error classification.

use tracing::info;

use crate::config::OutputConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    CardinalityIndex, CardinalityRecord, ColumnId, ColumnRef, EdgeKind, RelationEdge,
    SimilarityEdge,
};
use crate::source::{ColumnDef, DataSource, Row, TableName, Value, WriteMode};

/// Columns of the cardinality snapshot
pub fn cardinality_schema() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("column_id", "TEXT"),
        ColumnDef::new("container", "TEXT"),
        ColumnDef::new("table_name", "TEXT"),
        ColumnDef::new("column_name", "TEXT"),
        ColumnDef::new("data_type", "TEXT"),
        ColumnDef::new("cardinality", "FLOAT8"),
    ]
}

/// Columns of the similarity snapshot
pub fn similarity_schema() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("container_a", "TEXT"),
        ColumnDef::new("table_a", "TEXT"),
        ColumnDef::new("column_a", "TEXT"),
        ColumnDef::new("container_b", "TEXT"),
        ColumnDef::new("table_b", "TEXT"),
        ColumnDef::new("column_b", "TEXT"),
        ColumnDef::new("data_type", "TEXT"),
        ColumnDef::new("similarity", "FLOAT8"),
    ]
}

/// Columns of the relation map
pub fn relation_schema() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("container_left", "TEXT"),
        ColumnDef::new("table_left", "TEXT"),
        ColumnDef::new("column_left", "TEXT"),
        ColumnDef::new("type_left", "TEXT"),
        ColumnDef::new("cardinality_left", "FLOAT8"),
        ColumnDef::new("container_right", "TEXT"),
        ColumnDef::new("table_right", "TEXT"),
        ColumnDef::new("column_right", "TEXT"),
        ColumnDef::new("type_right", "TEXT"),
        ColumnDef::new("cardinality_right", "FLOAT8"),
        ColumnDef::new("weight", "FLOAT8"),
        ColumnDef::new("priority", "BIGINT"),
    ]
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn encode_cardinality(index: &CardinalityIndex) -> Vec<Row> {
    index
        .iter()
        .map(|record| {
            let column = &record.column;
            vec![
                Value::Text(column.id().to_string()),
                text(column.container()),
                text(column.table()),
                text(column.column()),
                text(column.declared_type()),
                Value::from(record.cardinality),
            ]
        })
        .collect()
}

pub fn encode_similarity(edges: &[SimilarityEdge]) -> Vec<Row> {
    edges
        .iter()
        .map(|edge| {
            vec![
                text(edge.left.container()),
                text(edge.left.table()),
                text(edge.left.column()),
                text(edge.right.container()),
                text(edge.right.table()),
                text(edge.right.column()),
                text(edge.left.declared_type()),
                Value::Float(edge.score),
            ]
        })
        .collect()
}

pub fn encode_relations(edges: &[RelationEdge]) -> Vec<Row> {
    edges
        .iter()
        .map(|edge| {
            vec![
                text(edge.left.container()),
                text(edge.left.table()),
                text(edge.left.column()),
                text(edge.left.declared_type()),
                Value::from(edge.left_cardinality),
                text(edge.right.container()),
                text(edge.right.table()),
                text(edge.right.column()),
                text(edge.right.declared_type()),
                Value::from(edge.right_cardinality),
                Value::Float(edge.weight),
                Value::Int(edge.priority()),
            ]
        })
        .collect()
}

/// Row-level decode error: `(row number, message)`
pub type DecodeError = (usize, String);

struct Cells<'a> {
    row: usize,
    cells: &'a [Value],
}

impl<'a> Cells<'a> {
    fn new(row: usize, cells: &'a [Value], width: usize) -> Result<Self, DecodeError> {
        if cells.len() != width {
            return Err((row, format!("expected {width} cells, found {}", cells.len())));
        }
        Ok(Self { row, cells })
    }

    fn text(&self, i: usize) -> Result<&'a str, DecodeError> {
        self.cells[i]
            .as_str()
            .ok_or_else(|| (self.row, format!("cell {i} is not text: {:?}", self.cells[i])))
    }

    fn ratio(&self, i: usize) -> Result<Option<f64>, DecodeError> {
        let cell = &self.cells[i];
        if cell.is_null() {
            return Ok(None);
        }
        match cell.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(Some(v)),
            _ => Err((self.row, format!("cell {i} is not a ratio: {cell:?}"))),
        }
    }

    fn required_ratio(&self, i: usize) -> Result<f64, DecodeError> {
        self.ratio(i)?
            .ok_or_else(|| (self.row, format!("cell {i} is null")))
    }

    fn int(&self, i: usize) -> Result<i64, DecodeError> {
        self.cells[i]
            .as_i64()
            .ok_or_else(|| (self.row, format!("cell {i} is not an integer: {:?}", self.cells[i])))
    }
}

pub fn decode_cardinality(rows: &[Row]) -> Result<CardinalityIndex, DecodeError> {
    let mut index = CardinalityIndex::new();
    for (n, row) in rows.iter().enumerate() {
        let cells = Cells::new(n, row, 6)?;
        let column = ColumnRef::new(cells.text(1)?, cells.text(2)?, cells.text(3)?, cells.text(4)?);
        let stored = cells.text(0)?;
        if ColumnId::parse(stored) != Some(column.id()) {
            return Err((n, format!("column_id {stored} does not match {column}")));
        }
        index.insert(CardinalityRecord::new(column, cells.ratio(5)?));
    }
    Ok(index)
}

pub fn decode_similarity(rows: &[Row]) -> Result<Vec<SimilarityEdge>, DecodeError> {
    rows.iter()
        .enumerate()
        .map(|(n, row)| {
            let cells = Cells::new(n, row, 8)?;
            let data_type = cells.text(6)?;
            Ok(SimilarityEdge::new(
                ColumnRef::new(cells.text(0)?, cells.text(1)?, cells.text(2)?, data_type),
                ColumnRef::new(cells.text(3)?, cells.text(4)?, cells.text(5)?, data_type),
                cells.required_ratio(7)?,
            ))
        })
        .collect()
}

pub fn decode_relations(rows: &[Row]) -> Result<Vec<RelationEdge>, DecodeError> {
    rows.iter()
        .enumerate()
        .map(|(n, row)| {
            let cells = Cells::new(n, row, 12)?;
            let priority = cells.int(11)?;
            let kind = EdgeKind::from_priority(priority)
                .ok_or_else(|| (n, format!("unknown priority {priority}")))?;
            Ok(RelationEdge {
                left: ColumnRef::new(cells.text(0)?, cells.text(1)?, cells.text(2)?, cells.text(3)?),
                right: ColumnRef::new(cells.text(5)?, cells.text(6)?, cells.text(7)?, cells.text(8)?),
                left_cardinality: cells.ratio(4)?,
                right_cardinality: cells.ratio(9)?,
                weight: cells.required_ratio(10)?,
                kind,
            })
        })
        .collect()
}

/// Which snapshot a table holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Snapshot {
    Cardinality,
    Similarity,
    Relations,
}

/// Reads and writes the snapshot tables named by an [`OutputConfig`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    output: OutputConfig,
}

impl SnapshotStore {
    pub fn new(output: OutputConfig) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &OutputConfig {
        &self.output
    }

    fn table(&self, snapshot: Snapshot) -> TableName {
        let name = match snapshot {
            Snapshot::Cardinality => &self.output.cardinality_table,
            Snapshot::Similarity => &self.output.similarity_table,
            Snapshot::Relations => &self.output.relation_table,
        };
        TableName::new(self.output.container.clone(), name.clone())
    }

    pub fn cardinality_table(&self) -> TableName {
        self.table(Snapshot::Cardinality)
    }

    pub fn similarity_table(&self) -> TableName {
        self.table(Snapshot::Similarity)
    }

    pub fn relation_table(&self) -> TableName {
        self.table(Snapshot::Relations)
    }

    async fn write(
        &self,
        source: &dyn DataSource,
        snapshot: Snapshot,
        schema: Vec<ColumnDef>,
        rows: Vec<Row>,
    ) -> PipelineResult<u64> {
        let table = self.table(snapshot);
        let mode = WriteMode::from_replace_existing(self.output.replace_existing);
        let expected = rows.len() as u64;
        match source.create_or_replace_table(&table, &schema, rows, mode).await {
            Ok(written) => {
                info!(table = %table, rows = written, ?mode, "Wrote snapshot");
                if written != expected {
                    return Err(write_error(
                        snapshot,
                        &table,
                        format!("wrote {written} of {expected} rows"),
                    ));
                }
                Ok(written)
            }
            Err(e) => Err(write_error(snapshot, &table, e.to_string())),
        }
    }

    async fn read(&self, source: &dyn DataSource, snapshot: Snapshot) -> PipelineResult<Vec<Row>> {
        let table = self.table(snapshot);
        match source.read_table(&table).await {
            Ok(Some(rows)) => Ok(rows),
            Ok(None) => Err(PipelineError::SnapshotMissing(table.to_string())),
            Err(e) => Err(PipelineError::from_source(e)),
        }
    }

    pub async fn write_cardinality(
        &self,
        source: &dyn DataSource,
        index: &CardinalityIndex,
    ) -> PipelineResult<u64> {
        self.write(
            source,
            Snapshot::Cardinality,
            cardinality_schema(),
            encode_cardinality(index),
        )
        .await
    }

    pub async fn write_similarity(
        &self,
        source: &dyn DataSource,
        edges: &[SimilarityEdge],
    ) -> PipelineResult<u64> {
        self.write(
            source,
            Snapshot::Similarity,
            similarity_schema(),
            encode_similarity(edges),
        )
        .await
    }

    /// Persist the relation map; failures surface as `GraphWriteFailed`
    pub async fn write_relations(
        &self,
        source: &dyn DataSource,
        edges: &[RelationEdge],
    ) -> PipelineResult<u64> {
        self.write(
            source,
            Snapshot::Relations,
            relation_schema(),
            encode_relations(edges),
        )
        .await
    }

    pub async fn load_cardinality(&self, source: &dyn DataSource) -> PipelineResult<CardinalityIndex> {
        let rows = self.read(source, Snapshot::Cardinality).await?;
        decode_cardinality(&rows).map_err(|e| self.corrupt(Snapshot::Cardinality, e))
    }

    pub async fn load_similarity(&self, source: &dyn DataSource) -> PipelineResult<Vec<SimilarityEdge>> {
        let rows = self.read(source, Snapshot::Similarity).await?;
        decode_similarity(&rows).map_err(|e| self.corrupt(Snapshot::Similarity, e))
    }

    pub async fn load_relations(&self, source: &dyn DataSource) -> PipelineResult<Vec<RelationEdge>> {
        let rows = self.read(source, Snapshot::Relations).await?;
        decode_relations(&rows).map_err(|e| self.corrupt(Snapshot::Relations, e))
    }

    fn corrupt(&self, snapshot: Snapshot, (row, message): DecodeError) -> PipelineError {
        PipelineError::SnapshotCorrupt {
            table: self.table(snapshot).to_string(),
            row,
            message,
        }
    }
}

fn write_error(snapshot: Snapshot, table: &TableName, message: String) -> PipelineError {
    let table = table.to_string();
    match snapshot {
        Snapshot::Relations => PipelineError::GraphWriteFailed { table, message },
        _ => PipelineError::SnapshotWriteFailed { table, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn col(table: &str, column: &str) -> ColumnRef {
        ColumnRef::new("main", table, column, "INTEGER")
    }

    fn relation() -> RelationEdge {
        RelationEdge {
            left: col("orders", "customer_id"),
            right: col("customers", "customer_id"),
            left_cardinality: None,
            right_cardinality: Some(1.0),
            weight: 0.75,
            kind: EdgeKind::Statistical,
        }
    }

    #[tokio::test]
    async fn test_store_reloads_what_it_wrote() {
        let source = MemorySource::new("memory://persist");
        let store = SnapshotStore::default();
        let index = CardinalityIndex::from_records([
            CardinalityRecord::new(col("orders", "customer_id"), Some(0.3)),
            CardinalityRecord::new(col("orders", "note"), None),
        ]);
        let similarity = vec![SimilarityEdge::new(col("orders", "customer_id"), col("customers", "customer_id"), 0.9)];

        store.write_cardinality(&source, &index).await.unwrap();
        store.write_similarity(&source, &similarity).await.unwrap();
        store.write_relations(&source, &[relation()]).await.unwrap();

        let loaded = store.load_cardinality(&source).await.unwrap();
        assert_eq!(loaded.records(), index.records());
        assert_eq!(store.load_similarity(&source).await.unwrap(), similarity);
        assert_eq!(store.load_relations(&source).await.unwrap(), vec![relation()]);
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let source = MemorySource::new("memory://persist");
        let err = SnapshotStore::default().load_relations(&source).await.unwrap_err();
        assert!(matches!(err, PipelineError::SnapshotMissing(ref t) if t == "main.relation_map"));
    }

    #[tokio::test]
    async fn test_relation_write_failure_is_graph_write_failed() {
        let source = MemorySource::new("memory://persist");
        source.reject_writes("main", "relation_map");
        let store = SnapshotStore::default();

        let err = store.write_relations(&source, &[relation()]).await.unwrap_err();
        assert!(matches!(err, PipelineError::GraphWriteFailed { .. }));

        source.reject_writes("main", "cardinality_index");
        let err = store
            .write_cardinality(&source, &CardinalityIndex::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SnapshotWriteFailed { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_rows() {
        let mut rows = encode_relations(&[relation()]);
        rows[0][11] = Value::Int(5);
        assert_eq!(decode_relations(&rows).unwrap_err().0, 0);

        let mut rows = encode_cardinality(&CardinalityIndex::from_records([CardinalityRecord::new(
            col("a", "x"),
            Some(0.5),
        )]));
        rows[0][0] = Value::Text(col("a", "y").id().to_string());
        assert!(decode_cardinality(&rows).unwrap_err().1.contains("does not match"));

        let rows = vec![vec![Value::Null; 3]];
        assert!(decode_similarity(&rows).is_err());
    }

    #[tokio::test]
    async fn test_append_mode_accumulates() {
        let source = MemorySource::new("memory://persist");
        let store = SnapshotStore::new(OutputConfig::default().with_replace_existing(false));
        store.write_relations(&source, &[relation()]).await.unwrap();
        store.write_relations(&source, &[relation()]).await.unwrap();
        assert_eq!(store.load_relations(&source).await.unwrap().len(), 2);
    }
}
