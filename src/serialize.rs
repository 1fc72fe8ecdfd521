//! Schema serializer
//!
//! Renders a catalog and its relation map as a deterministic text document,
//! used as context for natural-language query generation.

use crate::catalog::InternalTables;
use crate::log::{RunLog, StageOutcome};
use crate::models::{Catalog, RelationEdge};
use crate::pipeline::PipelineStage;

/// Document header
pub const SCHEMA_HEADER: &str = "Database Schema Description:";

/// Serializes catalogs and relation maps
#[derive(Debug, Clone, Default)]
pub struct SchemaSerializer {
    internal: InternalTables,
}

impl SchemaSerializer {
    pub fn new(internal: InternalTables) -> Self {
        Self { internal }
    }

    /// Render the schema listing followed by the directional relations
    ///
    /// Containers and tables are sorted by name, columns keep catalog order,
    /// and relations keep edge order. Edges without a unique endpoint are
    /// left out of the text.
    pub fn serialize(&self, catalog: &Catalog, edges: &[RelationEdge]) -> StageOutcome<String> {
        let stage = PipelineStage::Serialize;
        let mut log = RunLog::new();
        let mut lines: Vec<String> = Vec::new();

        lines.push(SCHEMA_HEADER.to_string());
        lines.push(format!("Source: {}", catalog.source()));
        let mut tables = 0usize;
        for (container, container_tables) in catalog.tree() {
            let visible: Vec<_> = container_tables
                .into_iter()
                .filter(|(table, _)| !self.internal.contains(container, table))
                .collect();
            if visible.is_empty() {
                continue;
            }
            lines.push(format!("Container: {container}"));
            for (table, columns) in visible {
                tables += 1;
                lines.push(format!("  Table: {table}"));
                lines.push("    Columns:".to_string());
                for column in columns {
                    lines.push(format!("      {} ({})", column.column(), column.declared_type()));
                }
            }
        }

        lines.push("Relations:".to_string());
        let mut described = 0usize;
        for edge in edges {
            if !edge.is_directional()
                || self.internal.contains(edge.left.container(), edge.left.table())
                || self.internal.contains(edge.right.container(), edge.right.table())
            {
                continue;
            }
            described += 1;
            lines.push(format!("  {}", relation_sentence(edge)));
        }

        log.info(
            stage,
            format!(
                "described {tables} tables and {described} of {} relations",
                edges.len()
            ),
        );
        let mut out = lines.join("\n");
        out.push('\n');
        StageOutcome::new(out, log)
    }
}

/// One-line description of a directional edge
pub fn relation_sentence(edge: &RelationEdge) -> String {
    format!(
        "{}.{} references {}.{}, forming a {}-to-{} relationship.",
        edge.left.table(),
        edge.left.column(),
        edge.right.table(),
        edge.right.column(),
        edge.left_side(),
        edge.right_side()
    )
}

/// Strip markdown emphasis characters for export
pub fn plain_text(document: &str) -> String {
    document.chars().filter(|c| !matches!(c, '#' | '*')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnRef, EdgeKind};

    fn catalog() -> Catalog {
        Catalog::new(
            "memory://shop",
            vec![
                ColumnRef::new("main", "orders", "customer_id", "INTEGER"),
                ColumnRef::new("main", "orders", "total", "DOUBLE"),
                ColumnRef::new("main", "customers", "customer_id", "INTEGER"),
                ColumnRef::new("main", "customers", "name", "VARCHAR"),
                ColumnRef::new("main", "relation_map", "weight", "DOUBLE"),
            ],
        )
    }

    fn edge(left_card: Option<f64>, right_card: Option<f64>) -> RelationEdge {
        RelationEdge {
            left: ColumnRef::new("main", "orders", "customer_id", "INTEGER"),
            right: ColumnRef::new("main", "customers", "customer_id", "INTEGER"),
            left_cardinality: left_card,
            right_cardinality: right_card,
            weight: 1.0,
            kind: EdgeKind::Structural,
        }
    }

    #[test]
    fn test_document_layout() {
        let text = SchemaSerializer::default()
            .serialize(&catalog(), &[edge(Some(0.3), Some(1.0))])
            .output;
        let expected = "\
Database Schema Description:
Source: memory://shop
Container: main
  Table: customers
    Columns:
      customer_id (INTEGER)
      name (VARCHAR)
  Table: orders
    Columns:
      customer_id (INTEGER)
      total (DOUBLE)
Relations:
  orders.customer_id references customers.customer_id, forming a many-to-one relationship.
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_ambiguous_edges_omitted() {
        let edges = vec![edge(Some(0.3), Some(0.99)), edge(None, Some(0.5))];
        let outcome = SchemaSerializer::default().serialize(&catalog(), &edges);
        assert!(outcome.output.ends_with("Relations:\n"));
        assert!(outcome.log.render().contains("0 of 2 relations"));
    }

    #[test]
    fn test_one_to_one_label() {
        assert_eq!(
            relation_sentence(&edge(Some(1.0), Some(1.0))),
            "orders.customer_id references customers.customer_id, forming a one-to-one relationship."
        );
    }

    #[test]
    fn test_output_is_deterministic() {
        let serializer = SchemaSerializer::default();
        let edges = vec![edge(Some(0.3), Some(1.0)), edge(Some(1.0), Some(1.0))];
        let first = serializer.serialize(&catalog(), &edges).output;
        let second = serializer.serialize(&catalog(), &edges).output;
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(plain_text("## **Relations**\n"), " Relations\n");
    }
}
