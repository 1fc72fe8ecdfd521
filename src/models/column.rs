//! Column references and the per-run column catalog

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a column
///
/// Derived as a UUID v5 (DNS namespace) over the length-prefixed parts
/// `"{len}:{container}{len}:{table}{len}:{column}"`, so the same column always
/// maps to the same id across runs and backends. Names may contain any
/// separator character; the byte lengths keep the split points unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(Uuid);

impl ColumnId {
    /// Derive the id for a fully qualified column
    pub fn derive(container: &str, table: &str, column: &str) -> Self {
        let key = format!(
            "{}:{container}{}:{table}{}:{column}",
            container.len(),
            table.len(),
            column.len()
        );
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, key.as_bytes()))
    }

    /// Parse a previously rendered id
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one column of one table in a data source
///
/// Immutable once built. Equality and hashing go through the derived
/// [`ColumnId`], never through the name strings.
///
/// # Example
///
/// ```rust
/// use obscura::models::ColumnRef;
///
/// let column = ColumnRef::new("main", "orders", "customer_id", "INTEGER");
/// assert_eq!(column.to_string(), "orders.customer_id");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    id: ColumnId,
    container: String,
    table: String,
    column: String,
    declared_type: String,
}

impl ColumnRef {
    pub fn new(
        container: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        let container = container.into();
        let table = table.into();
        let column = column.into();
        let id = ColumnId::derive(&container, &table, &column);
        Self {
            id,
            container,
            table,
            column,
            declared_type: declared_type.into(),
        }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    /// Dataset or schema holding the table
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Type as reported by the source's own metadata
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Whether both columns live in the same table of the same container
    pub fn same_table(&self, other: &ColumnRef) -> bool {
        self.container == other.container && self.table == other.table
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ColumnRef {}

impl Hash for ColumnRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Container -> table -> columns in ordinal order
pub type CatalogTree<'a> = BTreeMap<&'a str, BTreeMap<&'a str, Vec<&'a ColumnRef>>>;

/// Snapshot of every column a source exposed during one scan
///
/// Produced once per run and handed by reference to every later stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    source: String,
    columns: Vec<ColumnRef>,
    #[serde(skip)]
    positions: HashMap<ColumnId, usize>,
}

impl Catalog {
    /// Build a catalog; a repeated column keeps its first position
    pub fn new(source: impl Into<String>, columns: Vec<ColumnRef>) -> Self {
        let mut positions = HashMap::with_capacity(columns.len());
        let mut unique = Vec::with_capacity(columns.len());
        for column in columns {
            if positions.contains_key(&column.id()) {
                continue;
            }
            positions.insert(column.id(), unique.len());
            unique.push(column);
        }
        Self {
            source: source.into(),
            columns: unique,
            positions,
        }
    }

    /// Identity of the source the catalog was read from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnRef> {
        self.columns.iter()
    }

    pub fn get(&self, id: ColumnId) -> Option<&ColumnRef> {
        self.position(id).map(|index| &self.columns[index])
    }

    /// Scan position of a column, used as the stable ordering key
    pub fn position(&self, id: ColumnId) -> Option<usize> {
        if self.positions.len() == self.columns.len() {
            return self.positions.get(&id).copied();
        }
        // Deserialized catalogs carry no position map.
        self.columns.iter().position(|c| c.id() == id)
    }

    /// Number of distinct tables
    pub fn table_count(&self) -> usize {
        self.tree().values().map(BTreeMap::len).sum()
    }

    /// Columns grouped by declared type, each group in scan order
    pub fn by_type(&self) -> BTreeMap<&str, Vec<&ColumnRef>> {
        let mut groups: BTreeMap<&str, Vec<&ColumnRef>> = BTreeMap::new();
        for column in &self.columns {
            groups.entry(column.declared_type()).or_default().push(column);
        }
        groups
    }

    /// Sorted container/table tree with columns in ordinal order
    pub fn tree(&self) -> CatalogTree<'_> {
        let mut tree: CatalogTree<'_> = BTreeMap::new();
        for column in &self.columns {
            tree.entry(column.container())
                .or_default()
                .entry(column.table())
                .or_default()
                .push(column);
        }
        tree
    }
}
