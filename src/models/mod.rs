//! Value types passed between pipeline stages

pub mod column;
pub mod records;

pub use column::{Catalog, CatalogTree, ColumnId, ColumnRef};
pub use records::{
    CardinalityIndex, CardinalityRecord, EdgeKind, JoinSide, RelationEdge, SimilarityEdge,
    pair_key,
};
