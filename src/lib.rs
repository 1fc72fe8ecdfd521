//! Obscura - join-graph inference for undocumented relational datasets
//!
//! Provides:
//! - Column catalogs over embedded and warehouse data sources
//! - Cardinality profiling and MinHash / bottom-k similarity estimates
//! - Relation map construction with persisted snapshots
//! - Plain-text schema descriptions for downstream query generation

pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod log;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod profile;
pub mod prompt;
pub mod serialize;
pub mod similarity;
pub mod source;

// Re-export commonly used types
pub use catalog::{InternalTables, list_columns};
pub use config::{
    GraphConfig, OutputConfig, ProfilingConfig, Settings, SimilarityConfig, SketchStrategy,
    SourceSettings,
};
pub use error::{ItemFailure, PipelineError, PipelineResult, StageFailure, StageResult};
pub use graph::{JoinGraph, RelationGraphBuilder};
pub use log::{LogEntry, LogLevel, RunLog, StageOutcome};
pub use persist::SnapshotStore;
pub use profile::CardinalityProfiler;
pub use prompt::QueryPrompt;
pub use serialize::SchemaSerializer;
pub use similarity::SimilarityEstimator;

// Re-export models
pub use models::{
    CardinalityIndex, CardinalityRecord, Catalog, ColumnId, ColumnRef, EdgeKind, JoinSide,
    RelationEdge, SimilarityEdge,
};

// Re-export pipeline types
pub use pipeline::{
    CancelHandle, PipelineConfig, PipelineExecutor, PipelineReport, PipelineRun, PipelineStage,
    run_pipeline,
};

// Re-export source types
#[cfg(feature = "duckdb-backend")]
pub use source::DuckDbSource;
#[cfg(feature = "postgres-backend")]
pub use source::WarehouseSource;
pub use source::{DataSource, MemorySource, SourceError, TableName};
