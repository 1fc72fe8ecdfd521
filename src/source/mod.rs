//! Data source abstraction
//!
//! Every stage reaches its backing store through the [`DataSource`] trait.
//! Requests are typed ([`Aggregate`], [`WriteMode`]) so that dialect
//! differences stay inside the adapters:
//! - [`MemorySource`]: in-process tables, always available
//! - `DuckDbSource`: embedded single-file analytical engine (`duckdb-backend`)
//! - `WarehouseSource`: remote Postgres-wire warehouse (`postgres-backend`)

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod error;
pub mod memory;
mod value;

#[cfg(feature = "duckdb-backend")]
pub mod embedded;

#[cfg(feature = "postgres-backend")]
pub mod warehouse;

pub use error::{SourceError, SourceResult};
pub use memory::MemorySource;
pub use value::{Row, Value};

#[cfg(feature = "duckdb-backend")]
pub use embedded::{CsvLoadReport, DuckDbSource};

#[cfg(feature = "postgres-backend")]
pub use warehouse::WarehouseSource;

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    /// Dataset or schema
    pub container: String,
    pub table: String,
}

impl TableName {
    pub fn new(container: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.container, self.table)
    }
}

/// Column name and declared type as reported by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Aggregate requests an adapter must answer in its own dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Distinct and total counts of the non-null values of a column
    ColumnCounts { table: TableName, column: String },
    /// The `k` smallest distinct 64-bit fingerprints of the non-null values,
    /// ascending
    BottomK {
        table: TableName,
        column: String,
        k: usize,
    },
}

impl Aggregate {
    pub fn column(&self) -> &str {
        match self {
            Self::ColumnCounts { column, .. } | Self::BottomK { column, .. } => column,
        }
    }
}

/// Result of an [`Aggregate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateValue {
    Counts { distinct: u64, non_null: u64 },
    Fingerprints(Vec<u64>),
}

impl AggregateValue {
    pub fn into_counts(self) -> SourceResult<(u64, u64)> {
        match self {
            Self::Counts { distinct, non_null } => Ok((distinct, non_null)),
            other => Err(SourceError::Query(format!(
                "expected counts, got {other:?}"
            ))),
        }
    }

    pub fn into_fingerprints(self) -> SourceResult<Vec<u64>> {
        match self {
            Self::Fingerprints(values) => Ok(values),
            other => Err(SourceError::Query(format!(
                "expected fingerprints, got {other:?}"
            ))),
        }
    }
}

/// How a table write treats an existing table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Drop and recreate
    Replace,
    /// Create if missing, then insert
    Append,
}

impl WriteMode {
    pub fn from_replace_existing(replace_existing: bool) -> Self {
        if replace_existing {
            Self::Replace
        } else {
            Self::Append
        }
    }
}

/// Capability interface over a relational backing store
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable identity of the backing store, used for run locks and checkpoints
    fn identity(&self) -> String;

    /// Every base table the source exposes
    async fn list_tables(&self) -> SourceResult<Vec<TableName>>;

    /// Columns of one table in ordinal order
    async fn list_columns(&self, table: &TableName) -> SourceResult<Vec<ColumnDef>>;

    /// Run a typed aggregate
    async fn execute_aggregate(&self, request: &Aggregate) -> SourceResult<AggregateValue>;

    /// Every value of one column, nulls included
    async fn bulk_read(&self, table: &TableName, column: &str) -> SourceResult<Vec<Value>>;

    /// Write rows into a table, returning the number of rows written
    async fn create_or_replace_table(
        &self,
        name: &TableName,
        schema: &[ColumnDef],
        rows: Vec<Row>,
        mode: WriteMode,
    ) -> SourceResult<u64>;

    /// Read a whole table back, `None` if it does not exist
    async fn read_table(&self, name: &TableName) -> SourceResult<Option<Vec<Row>>>;
}

/// Await `fut`, failing with [`SourceError::Timeout`] once `limit` passes
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> SourceResult<T>
where
    F: Future<Output = SourceResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}

/// Quote an identifier for double-quote dialects
#[cfg(any(feature = "duckdb-backend", feature = "postgres-backend"))]
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(any(feature = "duckdb-backend", feature = "postgres-backend"))]
pub(crate) fn qualified(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_ident(&table.container),
        quote_ident(&table.table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: SourceResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(SourceError::Timeout(Duration::from_millis(10))));
    }

    #[test]
    fn test_aggregate_value_conversions() {
        let counts = AggregateValue::Counts {
            distinct: 3,
            non_null: 10,
        };
        assert_eq!(counts.clone().into_counts(), Ok((3, 10)));
        assert!(counts.into_fingerprints().is_err());
        assert_eq!(WriteMode::from_replace_existing(false), WriteMode::Append);
    }

    #[cfg(any(feature = "duckdb-backend", feature = "postgres-backend"))]
    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified(&TableName::new("main", "orders")), "\"main\".\"orders\"");
    }
}
