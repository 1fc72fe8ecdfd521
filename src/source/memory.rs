//! In-process data source
//!
//! Holds tables in memory behind a lock. Used for synthetic catalogs in
//! tests and by callers that already have their data loaded.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{
    Aggregate, AggregateValue, ColumnDef, DataSource, Row, SourceError, SourceResult, TableName,
    Value, WriteMode,
};
use crate::similarity::fingerprint;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column_index(&self, table: &TableName, column: &str) -> SourceResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| SourceError::NotFound(format!("{table}.{column}")))
    }

    fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows
            .iter()
            .map(move |row| row.get(index).unwrap_or(&NULL))
    }
}

/// Tables held in process memory
#[derive(Debug)]
pub struct MemorySource {
    identity: String,
    tables: RwLock<BTreeMap<TableName, MemoryTable>>,
    broken_columns: RwLock<HashSet<(TableName, String)>>,
    read_only: RwLock<BTreeSet<TableName>>,
    offline: RwLock<bool>,
}

impl MemorySource {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            tables: RwLock::new(BTreeMap::new()),
            broken_columns: RwLock::new(HashSet::new()),
            read_only: RwLock::new(BTreeSet::new()),
            offline: RwLock::new(false),
        }
    }

    /// Builder form of [`insert_table`](Self::insert_table)
    pub fn with_table(
        self,
        container: &str,
        table: &str,
        columns: &[(&str, &str)],
        rows: Vec<Row>,
    ) -> Self {
        self.insert_table(container, table, columns, rows);
        self
    }

    /// Add or replace a table; `columns` is `(name, declared_type)`
    pub fn insert_table(
        &self,
        container: &str,
        table: &str,
        columns: &[(&str, &str)],
        rows: Vec<Row>,
    ) {
        let table_value = MemoryTable {
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnDef::new(*name, *data_type))
                .collect(),
            rows,
        };
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TableName::new(container, table), table_value);
    }

    /// Make every query touching this column fail
    pub fn break_column(&self, container: &str, table: &str, column: &str) {
        self.broken_columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((TableName::new(container, table), column.to_string()));
    }

    /// Make writes to this table fail
    pub fn reject_writes(&self, container: &str, table: &str) {
        self.read_only
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TableName::new(container, table));
    }

    /// Simulate the source going away
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write().unwrap_or_else(PoisonError::into_inner) = offline;
    }

    /// Names of all tables, in sorted order
    pub fn table_names(&self) -> Vec<TableName> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn ensure_online(&self) -> SourceResult<()> {
        let offline = self
            .offline
            .read()
            .map_err(|_| SourceError::Unavailable("state lock poisoned".to_string()))?;
        if *offline {
            return Err(SourceError::Unavailable(format!(
                "{} is offline",
                self.identity
            )));
        }
        Ok(())
    }

    fn ensure_readable(&self, table: &TableName, column: &str) -> SourceResult<()> {
        self.ensure_online()?;
        let broken = self
            .broken_columns
            .read()
            .map_err(|_| SourceError::Unavailable("state lock poisoned".to_string()))?;
        if broken.contains(&(table.clone(), column.to_string())) {
            return Err(SourceError::type_mismatch(
                format!("{table}.{column}"),
                "cannot coerce stored values",
            ));
        }
        Ok(())
    }

    fn with_table_ref<T>(
        &self,
        table: &TableName,
        f: impl FnOnce(&MemoryTable) -> SourceResult<T>,
    ) -> SourceResult<T> {
        let tables = self
            .tables
            .read()
            .map_err(|_| SourceError::Unavailable("table lock poisoned".to_string()))?;
        let found = tables
            .get(table)
            .ok_or_else(|| SourceError::NotFound(table.to_string()))?;
        f(found)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn list_tables(&self) -> SourceResult<Vec<TableName>> {
        self.ensure_online()?;
        Ok(self.table_names())
    }

    async fn list_columns(&self, table: &TableName) -> SourceResult<Vec<ColumnDef>> {
        self.ensure_online()?;
        self.with_table_ref(table, |t| Ok(t.columns.clone()))
    }

    async fn execute_aggregate(&self, request: &Aggregate) -> SourceResult<AggregateValue> {
        match request {
            Aggregate::ColumnCounts { table, column } => {
                self.ensure_readable(table, column)?;
                self.with_table_ref(table, |t| {
                    let index = t.column_index(table, column)?;
                    let mut distinct = HashSet::new();
                    let mut non_null = 0u64;
                    for value in t.column_values(index) {
                        if let Some(canonical) = value.canonical() {
                            non_null += 1;
                            distinct.insert(canonical);
                        }
                    }
                    Ok(AggregateValue::Counts {
                        distinct: distinct.len() as u64,
                        non_null,
                    })
                })
            }
            Aggregate::BottomK { table, column, k } => {
                self.ensure_readable(table, column)?;
                self.with_table_ref(table, |t| {
                    let index = t.column_index(table, column)?;
                    let hashes: BTreeSet<u64> = t
                        .column_values(index)
                        .filter_map(Value::canonical)
                        .map(|canonical| fingerprint(&canonical))
                        .collect();
                    Ok(AggregateValue::Fingerprints(
                        hashes.into_iter().take(*k).collect(),
                    ))
                })
            }
        }
    }

    async fn bulk_read(&self, table: &TableName, column: &str) -> SourceResult<Vec<Value>> {
        self.ensure_readable(table, column)?;
        self.with_table_ref(table, |t| {
            let index = t.column_index(table, column)?;
            Ok(t.column_values(index).cloned().collect())
        })
    }

    async fn create_or_replace_table(
        &self,
        name: &TableName,
        schema: &[ColumnDef],
        rows: Vec<Row>,
        mode: WriteMode,
    ) -> SourceResult<u64> {
        self.ensure_online()?;
        let rejected = self
            .read_only
            .read()
            .map(|read_only| read_only.contains(name))
            .unwrap_or(false);
        if rejected {
            return Err(SourceError::Write(format!("{name} is read-only")));
        }
        if let Some(row) = rows.iter().find(|row| row.len() != schema.len()) {
            return Err(SourceError::Write(format!(
                "{name}: row has {} cells, schema has {} columns",
                row.len(),
                schema.len()
            )));
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| SourceError::Unavailable("table lock poisoned".to_string()))?;
        let written = rows.len() as u64;
        match (mode, tables.get_mut(name)) {
            (WriteMode::Append, Some(existing)) => {
                if existing.columns != schema {
                    return Err(SourceError::Write(format!(
                        "{name}: cannot append, schema differs from existing table"
                    )));
                }
                existing.rows.extend(rows);
            }
            _ => {
                tables.insert(
                    name.clone(),
                    MemoryTable {
                        columns: schema.to_vec(),
                        rows,
                    },
                );
            }
        }
        Ok(written)
    }

    async fn read_table(&self, name: &TableName) -> SourceResult<Option<Vec<Row>>> {
        self.ensure_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| SourceError::Unavailable("table lock poisoned".to_string()))?;
        Ok(tables.get(name).map(|t| t.rows.clone()))
    }
}
