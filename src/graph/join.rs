//! Table-level join graph over the relation map

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Undirected;
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::models::{ColumnId, ColumnRef, RelationEdge, pair_key};
use crate::source::TableName;

/// Undirected graph of tables joined by merged relation edges
///
/// Structural and statistical edges over the same column pair collapse into
/// one join carrying the lowest priority and the highest weight. The input
/// edge set is not modified.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    graph: Graph<TableName, usize, Undirected>,
    nodes: HashMap<TableName, NodeIndex>,
    joins: Vec<RelationEdge>,
}

fn table_of(column: &ColumnRef) -> TableName {
    TableName::new(column.container(), column.table())
}

impl JoinGraph {
    pub fn from_edges(edges: &[RelationEdge]) -> Self {
        let mut joins: Vec<RelationEdge> = Vec::new();
        let mut by_pair: HashMap<(ColumnId, ColumnId), usize> = HashMap::new();
        for edge in edges {
            match by_pair.get(&edge.pair_key()) {
                Some(&slot) => {
                    let merged = &mut joins[slot];
                    merged.kind = merged.kind.min(edge.kind);
                    merged.weight = merged.weight.max(edge.weight);
                }
                None => {
                    by_pair.insert(pair_key(edge.left.id(), edge.right.id()), joins.len());
                    joins.push(edge.clone());
                }
            }
        }

        let mut graph = Graph::new_undirected();
        let mut nodes = HashMap::new();
        for (slot, join) in joins.iter().enumerate() {
            let left = *nodes
                .entry(table_of(&join.left))
                .or_insert_with_key(|t: &TableName| graph.add_node(t.clone()));
            let right = *nodes
                .entry(table_of(&join.right))
                .or_insert_with_key(|t: &TableName| graph.add_node(t.clone()));
            graph.add_edge(left, right, slot);
        }

        Self {
            graph,
            nodes,
            joins,
        }
    }

    /// Merged joins, in first-seen order
    pub fn joins(&self) -> &[RelationEdge] {
        &self.joins
    }

    pub fn table_count(&self) -> usize {
        self.nodes.len()
    }

    /// Merged joins touching a table
    pub fn joins_for(&self, table: &TableName) -> Vec<&RelationEdge> {
        self.joins
            .iter()
            .filter(|j| &table_of(&j.left) == table || &table_of(&j.right) == table)
            .collect()
    }

    /// Shortest chain of joins between two tables
    ///
    /// Breadth-first; among equally short paths the one using earlier joins
    /// wins. `Some(vec![])` when `from == to`, `None` when not connected.
    pub fn join_path(&self, from: &TableName, to: &TableName) -> Option<Vec<&RelationEdge>> {
        let (&start, &goal) = (self.nodes.get(from)?, self.nodes.get(to)?);

        let mut visited = HashSet::from([start]);
        let mut parent: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if node == goal {
                let mut path = Vec::new();
                let mut current = goal;
                while let Some(&(previous, edge)) = parent.get(&current) {
                    path.push(&self.joins[self.graph[edge]]);
                    current = previous;
                }
                path.reverse();
                return Some(path);
            }

            let mut next: Vec<_> = self
                .graph
                .edges(node)
                .map(|e| {
                    let other = if e.source() == node { e.target() } else { e.source() };
                    (e.id(), other)
                })
                .collect();
            next.sort_by_key(|(edge, _)| edge.index());
            for (edge, neighbor) in next {
                if visited.insert(neighbor) {
                    parent.insert(neighbor, (node, edge));
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EdgeKind;

    fn edge(l: (&str, &str), r: (&str, &str), weight: f64, kind: EdgeKind) -> RelationEdge {
        RelationEdge {
            left: ColumnRef::new("main", l.0, l.1, "INTEGER"),
            right: ColumnRef::new("main", r.0, r.1, "INTEGER"),
            left_cardinality: Some(0.4),
            right_cardinality: Some(1.0),
            weight,
            kind,
        }
    }

    fn table(name: &str) -> TableName {
        TableName::new("main", name)
    }

    #[test]
    fn test_parallel_edges_merge() {
        let edges = vec![
            edge(("orders", "customer_id"), ("customers", "customer_id"), 0.9, EdgeKind::Statistical),
            edge(("orders", "customer_id"), ("customers", "customer_id"), 1.0, EdgeKind::Structural),
            edge(("customers", "customer_id"), ("orders", "customer_id"), 0.95, EdgeKind::Statistical),
        ];
        let graph = JoinGraph::from_edges(&edges);
        assert_eq!(graph.joins().len(), 1);
        assert_eq!(graph.joins()[0].kind, EdgeKind::Structural);
        assert_eq!(graph.joins()[0].weight, 1.0);
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn test_join_path() {
        let edges = vec![
            edge(("order_items", "order_id"), ("orders", "order_id"), 1.0, EdgeKind::Structural),
            edge(("orders", "customer_id"), ("customers", "customer_id"), 1.0, EdgeKind::Structural),
            edge(("order_items", "sku"), ("products", "sku"), 1.0, EdgeKind::Structural),
            edge(("audit", "x"), ("audit_archive", "x"), 1.0, EdgeKind::Structural),
        ];
        let graph = JoinGraph::from_edges(&edges);

        let path = graph.join_path(&table("order_items"), &table("customers")).unwrap();
        let hops: Vec<_> = path.iter().map(|j| j.left.to_string()).collect();
        assert_eq!(hops, vec!["order_items.order_id", "orders.customer_id"]);

        assert_eq!(graph.join_path(&table("orders"), &table("orders")).unwrap().len(), 0);
        assert!(graph.join_path(&table("orders"), &table("audit")).is_none());
        assert!(graph.join_path(&table("orders"), &table("missing")).is_none());
        assert_eq!(graph.joins_for(&table("order_items")).len(), 2);
        assert_eq!(graph.table_count(), 6);
    }

    #[test]
    fn test_ties_prefer_earlier_join() {
        let edges = vec![
            edge(("a", "x"), ("b", "x"), 1.0, EdgeKind::Structural),
            edge(("a", "y"), ("b", "y"), 0.8, EdgeKind::Statistical),
        ];
        let graph = JoinGraph::from_edges(&edges);
        let path = graph.join_path(&table("a"), &table("b")).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].left.column(), "x");
    }
}
