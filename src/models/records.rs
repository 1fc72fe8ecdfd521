//! Stage outputs: cardinality records, similarity edges and relation edges

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::column::{Catalog, ColumnId, ColumnRef};

/// Uniqueness ratio of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityRecord {
    pub column: ColumnRef,
    /// `distinct / non_null`, `None` when the column has no non-null values
    /// or its profile query failed
    pub cardinality: Option<f64>,
}

impl CardinalityRecord {
    pub fn new(column: ColumnRef, cardinality: Option<f64>) -> Self {
        Self {
            column,
            cardinality,
        }
    }

    /// Exactly 1.0, i.e. a detected unique key
    pub fn is_unique(&self) -> bool {
        self.cardinality == Some(1.0)
    }
}

/// All cardinality records of one profiling run, keyed by column id
///
/// Inserting a record for a column that is already present replaces it in
/// place; the index never keeps history.
#[derive(Debug, Clone, Default)]
pub struct CardinalityIndex {
    records: Vec<CardinalityRecord>,
    by_id: HashMap<ColumnId, usize>,
}

impl CardinalityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = CardinalityRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&mut self, record: CardinalityRecord) {
        match self.by_id.get(&record.column.id()) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.by_id.insert(record.column.id(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, id: ColumnId) -> Option<&CardinalityRecord> {
        self.by_id.get(&id).map(|&slot| &self.records[slot])
    }

    /// `None` if the column is unknown, `Some(None)` if its cardinality is undefined
    pub fn cardinality(&self, id: ColumnId) -> Option<Option<f64>> {
        self.get(id).map(|record| record.cardinality)
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn records(&self) -> &[CardinalityRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardinalityRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of columns whose cardinality is undefined
    pub fn undefined_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.cardinality.is_none())
            .count()
    }

    /// Rebuild the catalog this index was profiled from, in record order
    pub fn to_catalog(&self, source: impl Into<String>) -> Catalog {
        Catalog::new(
            source,
            self.records.iter().map(|r| r.column.clone()).collect(),
        )
    }
}

/// Estimated Jaccard similarity between two same-typed columns of different tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub score: f64,
}

impl SimilarityEdge {
    pub fn new(left: ColumnRef, right: ColumnRef, score: f64) -> Self {
        Self { left, right, score }
    }

    /// Order-independent key, so (A, B) and (B, A) collapse together
    pub fn pair_key(&self) -> (ColumnId, ColumnId) {
        pair_key(self.left.id(), self.right.id())
    }
}

/// Normalize an unordered column pair
pub fn pair_key(a: ColumnId, b: ColumnId) -> (ColumnId, ColumnId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Provenance of a relation edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Same column name and declared type in two tables
    Structural,
    /// Value-set overlap above the inclusion threshold
    Statistical,
}

impl EdgeKind {
    /// Persisted priority value
    pub fn priority(&self) -> i64 {
        match self {
            Self::Structural => 0,
            Self::Statistical => 1,
        }
    }

    pub fn from_priority(priority: i64) -> Option<Self> {
        match priority {
            0 => Some(Self::Structural),
            1 => Some(Self::Statistical),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => write!(f, "structural"),
            Self::Statistical => write!(f, "statistical"),
        }
    }
}

/// Join multiplicity of one edge endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinSide {
    One,
    Many,
}

impl JoinSide {
    /// Exactly 1.0 is "one"; anything else, undefined included, is "many"
    pub fn from_cardinality(cardinality: Option<f64>) -> Self {
        if cardinality == Some(1.0) {
            Self::One
        } else {
            Self::Many
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Many => "many",
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inferred join between two columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub left_cardinality: Option<f64>,
    pub right_cardinality: Option<f64>,
    pub weight: f64,
    pub kind: EdgeKind,
}

impl RelationEdge {
    pub fn priority(&self) -> i64 {
        self.kind.priority()
    }

    pub fn left_side(&self) -> JoinSide {
        JoinSide::from_cardinality(self.left_cardinality)
    }

    pub fn right_side(&self) -> JoinSide {
        JoinSide::from_cardinality(self.right_cardinality)
    }

    /// At least one endpoint is a detected unique key
    pub fn is_directional(&self) -> bool {
        self.left_cardinality == Some(1.0) || self.right_cardinality == Some(1.0)
    }

    pub fn pair_key(&self) -> (ColumnId, ColumnId) {
        pair_key(self.left.id(), self.right.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(table: &str, column: &str) -> ColumnRef {
        ColumnRef::new("main", table, column, "INTEGER")
    }

    #[test]
    fn test_index_overwrites_in_place() {
        let mut index = CardinalityIndex::from_records([
            CardinalityRecord::new(col("a", "x"), Some(0.5)),
            CardinalityRecord::new(col("b", "y"), None),
        ]);
        index.insert(CardinalityRecord::new(col("a", "x"), Some(1.0)));

        assert_eq!(index.len(), 2);
        assert_eq!(index.records()[0].cardinality, Some(1.0));
        assert_eq!(index.cardinality(col("b", "y").id()), Some(None));
        assert_eq!(index.cardinality(col("c", "z").id()), None);
        assert_eq!(index.undefined_count(), 1);
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        let forward = SimilarityEdge::new(col("a", "x"), col("b", "x"), 0.9);
        let backward = SimilarityEdge::new(col("b", "x"), col("a", "x"), 0.9);
        assert_eq!(forward.pair_key(), backward.pair_key());
    }

    #[test]
    fn test_join_side_labels() {
        assert_eq!(JoinSide::from_cardinality(Some(1.0)), JoinSide::One);
        assert_eq!(JoinSide::from_cardinality(Some(0.999)), JoinSide::Many);
        assert_eq!(JoinSide::from_cardinality(None), JoinSide::Many);
        assert_eq!(EdgeKind::from_priority(1), Some(EdgeKind::Statistical));
        assert_eq!(EdgeKind::from_priority(7), None);
    }
}
