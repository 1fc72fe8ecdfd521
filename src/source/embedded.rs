//! Embedded DuckDB data source
//!
//! DuckDB's connection is synchronous; every call runs on the blocking pool
//! behind a mutex so the async trait surface never stalls the runtime.

#![allow(unexpected_cfgs)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use tracing::{debug, info, warn};

use super::{
    Aggregate, AggregateValue, ColumnDef, DataSource, Row, SourceError, SourceResult, TableName,
    Value, WriteMode, qualified, quote_ident,
};

/// Default schema DuckDB creates tables in
pub const DEFAULT_CONTAINER: &str = "main";

/// DuckDB database, file-backed or in-memory
#[derive(Clone)]
pub struct DuckDbSource {
    conn: Arc<Mutex<duckdb::Connection>>,
    path: Option<String>,
}

/// Outcome of loading a directory of CSV files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvLoadReport {
    /// Tables created, one per file
    pub loaded: Vec<String>,
    /// Files that failed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl DuckDbSource {
    /// Open or create a database file
    pub fn open(path: &str) -> SourceResult<Self> {
        let conn = duckdb::Connection::open(path)
            .map_err(|e| SourceError::Unavailable(format!("{path}: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn memory() -> SourceResult<Self> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Get the database path (if not in-memory)
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Run raw SQL; intended for fixtures and ingestion, not for the pipeline
    pub async fn execute_batch(&self, sql: &str) -> SourceResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    /// Load every `*.csv` file in `dir` as `main.<file stem>`
    ///
    /// A file that fails to load is reported and skipped.
    pub async fn load_csv_directory(&self, dir: &Path) -> SourceResult<CsvLoadReport> {
        let dir = dir.to_path_buf();
        self.with_conn(move |conn| {
            let entries = std::fs::read_dir(&dir)
                .map_err(|e| SourceError::NotFound(format!("{}: {e}", dir.display())))?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
                })
                .collect();
            files.sort();

            let mut report = CsvLoadReport::default();
            for file in files {
                let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                    report
                        .failed
                        .push((file.clone(), "file name is not valid UTF-8".to_string()));
                    continue;
                };
                let table = TableName::new(DEFAULT_CONTAINER, stem);
                let sql = format!(
                    "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto('{}')",
                    qualified(&table),
                    file.display().to_string().replace('\'', "''")
                );
                match conn.execute_batch(&sql) {
                    Ok(()) => {
                        info!(file = %file.display(), table = stem, "Loaded CSV file");
                        report.loaded.push(stem.to_string());
                    }
                    Err(e) => {
                        warn!(file = %file.display(), error = %e, "Failed to load CSV file");
                        report.failed.push((file.clone(), e.to_string()));
                    }
                }
            }
            Ok(report)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> SourceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut duckdb::Connection) -> SourceResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SourceError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| SourceError::Query(format!("blocking task failed: {e}")))?
    }
}

fn table_exists(conn: &duckdb::Connection, table: &TableName) -> SourceResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ?1 AND table_name = ?2",
        duckdb::params![table.container, table.table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn from_duck(value: DuckValue, text: Option<String>) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::Int(n as i64),
        DuckValue::SmallInt(n) => Value::Int(n as i64),
        DuckValue::Int(n) => Value::Int(n as i64),
        DuckValue::BigInt(n) => Value::Int(n),
        DuckValue::UTinyInt(n) => Value::Int(n as i64),
        DuckValue::USmallInt(n) => Value::Int(n as i64),
        DuckValue::UInt(n) => Value::Int(n as i64),
        DuckValue::Float(f) => Value::Float(f as f64),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Text(s) => Value::Text(s),
        // Dates, decimals, nested types: fall back to DuckDB's own rendering
        other => text
            .map(Value::Text)
            .unwrap_or_else(|| Value::Text(format!("{other:?}"))),
    }
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Text(s) => DuckValue::Text(s.clone()),
    }
}

fn fingerprint_from_duck(value: DuckValue) -> SourceResult<u64> {
    match value {
        DuckValue::UBigInt(h) => Ok(h),
        DuckValue::BigInt(h) => Ok(h as u64),
        other => Err(SourceError::type_mismatch(
            "hash",
            format!("unexpected fingerprint value {other:?}"),
        )),
    }
}

#[async_trait]
impl DataSource for DuckDbSource {
    fn identity(&self) -> String {
        match &self.path {
            Some(path) => format!("duckdb:{path}"),
            None => format!("duckdb:memory:{:p}", Arc::as_ptr(&self.conn)),
        }
    }

    async fn list_tables(&self) -> SourceResult<Vec<TableName>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT table_schema, table_name FROM information_schema.tables
                     WHERE table_type = 'BASE TABLE'
                     ORDER BY table_schema, table_name",
                )
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            let rows = stmt.query_map([], |row| {
                Ok(TableName::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?;
            let mut tables = Vec::new();
            for row in rows {
                tables.push(row?);
            }
            Ok(tables)
        })
        .await
    }

    async fn list_columns(&self, table: &TableName) -> SourceResult<Vec<ColumnDef>> {
        let table = table.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type FROM information_schema.columns
                 WHERE table_schema = ?1 AND table_name = ?2
                 ORDER BY ordinal_position",
            )?;
            let rows = stmt.query_map(duckdb::params![table.container, table.table], |row| {
                Ok(ColumnDef::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?;
            let mut columns = Vec::new();
            for row in rows {
                columns.push(row?);
            }
            if columns.is_empty() {
                return Err(SourceError::NotFound(table.to_string()));
            }
            Ok(columns)
        })
        .await
    }

    async fn execute_aggregate(&self, request: &Aggregate) -> SourceResult<AggregateValue> {
        let request = request.clone();
        self.with_conn(move |conn| match request {
            Aggregate::ColumnCounts { table, column } => {
                let col = quote_ident(&column);
                let sql = format!(
                    "SELECT COUNT(DISTINCT {col}), COUNT({col}) FROM {}",
                    qualified(&table)
                );
                debug!(table = %table, column = %column, "Counting distinct values");
                let (distinct, non_null): (i64, i64) =
                    conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
                Ok(AggregateValue::Counts {
                    distinct: distinct.max(0) as u64,
                    non_null: non_null.max(0) as u64,
                })
            }
            Aggregate::BottomK { table, column, k } => {
                let col = quote_ident(&column);
                let sql = format!(
                    "SELECT DISTINCT hash(CAST({col} AS VARCHAR)) AS h FROM {}
                     WHERE {col} IS NOT NULL ORDER BY h LIMIT {k}",
                    qualified(&table)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| row.get::<_, DuckValue>(0))?;
                let mut hashes = Vec::new();
                for row in rows {
                    hashes.push(fingerprint_from_duck(row?)?);
                }
                Ok(AggregateValue::Fingerprints(hashes))
            }
        })
        .await
    }

    async fn bulk_read(&self, table: &TableName, column: &str) -> SourceResult<Vec<Value>> {
        let table = table.clone();
        let column = column.to_string();
        self.with_conn(move |conn| {
            let col = quote_ident(&column);
            let sql = format!(
                "SELECT {col}, CAST({col} AS VARCHAR) FROM {}",
                qualified(&table)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(from_duck(
                    row.get::<_, DuckValue>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            })?;
            let mut values = Vec::new();
            for row in rows {
                values.push(row?);
            }
            Ok(values)
        })
        .await
    }

    async fn create_or_replace_table(
        &self,
        name: &TableName,
        schema: &[ColumnDef],
        rows: Vec<Row>,
        mode: WriteMode,
    ) -> SourceResult<u64> {
        let name = name.clone();
        let schema = schema.to_vec();
        self.with_conn(move |conn| {
            let columns = schema
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            let create = match mode {
                WriteMode::Replace => "CREATE OR REPLACE TABLE",
                WriteMode::Append => "CREATE TABLE IF NOT EXISTS",
            };
            let placeholders = (1..=schema.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");

            let tx = conn
                .transaction()
                .map_err(|e| SourceError::Write(e.to_string()))?;
            tx.execute_batch(&format!("{create} {} ({columns})", qualified(&name)))
                .map_err(|e| SourceError::Write(e.to_string()))?;
            let mut written = 0u64;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT INTO {} VALUES ({placeholders})",
                        qualified(&name)
                    ))
                    .map_err(|e| SourceError::Write(e.to_string()))?;
                for row in &rows {
                    stmt.execute(duckdb::params_from_iter(row.iter().map(to_duck)))
                        .map_err(|e| SourceError::Write(format!("{name}: {e}")))?;
                    written += 1;
                }
            }
            tx.commit().map_err(|e| SourceError::Write(e.to_string()))?;
            debug!(table = %name, rows = written, mode = ?mode, "Wrote table");
            Ok(written)
        })
        .await
    }

    async fn read_table(&self, name: &TableName) -> SourceResult<Option<Vec<Row>>> {
        let name = name.clone();
        self.with_conn(move |conn| {
            if !table_exists(conn, &name)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare(&format!("SELECT * FROM {}", qualified(&name)))?;
            let mut rows = stmt.query([])?;
            let column_count = rows.as_ref().map(|r| r.column_count()).unwrap_or(0);

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    cells.push(from_duck(row.get::<_, DuckValue>(i)?, None));
                }
                out.push(cells);
            }
            Ok(Some(out))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> DuckDbSource {
        let source = DuckDbSource::memory().unwrap();
        source
            .execute_batch(
                "CREATE TABLE customers (customer_id INTEGER, name VARCHAR);
                 INSERT INTO customers VALUES (1, 'ada'), (2, 'bob'), (3, NULL);",
            )
            .await
            .unwrap();
        source
    }

    #[tokio::test]
    async fn test_metadata_listing() {
        let source = fixture().await;
        let tables = source.list_tables().await.unwrap();
        assert_eq!(tables, vec![TableName::new("main", "customers")]);

        let columns = source.list_columns(&tables[0]).await.unwrap();
        assert_eq!(columns[0], ColumnDef::new("customer_id", "INTEGER"));
        assert_eq!(columns[1].name, "name");
    }

    #[tokio::test]
    async fn test_counts_and_bulk_read() {
        let source = fixture().await;
        let table = TableName::new("main", "customers");
        let counts = source
            .execute_aggregate(&Aggregate::ColumnCounts {
                table: table.clone(),
                column: "name".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(counts.into_counts().unwrap(), (2, 2));

        let values = source.bulk_read(&table, "customer_id").await.unwrap();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let source = DuckDbSource::memory().unwrap();
        let name = TableName::new("main", "scores");
        let schema = vec![ColumnDef::new("label", "TEXT"), ColumnDef::new("score", "FLOAT8")];

        source
            .create_or_replace_table(
                &name,
                &schema,
                vec![vec![Value::from("a"), Value::Float(0.5)]],
                WriteMode::Replace,
            )
            .await
            .unwrap();
        source
            .create_or_replace_table(
                &name,
                &schema,
                vec![vec![Value::from("b"), Value::Null]],
                WriteMode::Append,
            )
            .await
            .unwrap();

        let rows = source.read_table(&name).await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Value::from("b"), Value::Null]);
        assert!(
            source
                .read_table(&TableName::new("main", "nope"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
