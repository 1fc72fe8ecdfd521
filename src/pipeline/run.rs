//! Caller-owned run context

use crate::graph::JoinGraph;
use crate::log::RunLog;
use crate::models::{CardinalityIndex, Catalog, RelationEdge, SimilarityEdge};

use super::config::PipelineStage;

/// Snapshots produced so far by one or more pipeline runs
///
/// Nothing here is global: a caller that wants to keep intermediate results
/// between interactive reruns holds on to its own `PipelineRun`.
#[derive(Debug, Clone, Default)]
pub struct PipelineRun {
    pub catalog: Option<Catalog>,
    pub cardinality: Option<CardinalityIndex>,
    pub similarity: Option<Vec<SimilarityEdge>>,
    pub relations: Option<Vec<RelationEdge>>,
    pub schema_text: Option<String>,
    pub log: RunLog,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known catalog, e.g. a synthetic one in tests
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::default()
        }
    }

    /// Drop the output of `stage` and everything derived from it
    pub fn invalidate_from(&mut self, stage: PipelineStage) {
        if stage <= PipelineStage::Catalog {
            self.catalog = None;
        }
        if stage <= PipelineStage::Profile {
            self.cardinality = None;
        }
        if stage <= PipelineStage::Similarity {
            self.similarity = None;
        }
        if stage <= PipelineStage::Relations {
            self.relations = None;
        }
        self.schema_text = None;
    }

    /// Whether the output of `stage` is held in memory
    pub fn has_output(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Catalog => self.catalog.is_some(),
            PipelineStage::Profile => self.cardinality.is_some(),
            PipelineStage::Similarity => self.similarity.is_some(),
            PipelineStage::Relations => self.relations.is_some(),
            PipelineStage::Serialize => self.schema_text.is_some(),
        }
    }

    /// Merged join view over the current relation map
    pub fn join_graph(&self) -> Option<JoinGraph> {
        self.relations.as_deref().map(JoinGraph::from_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_drops_downstream_only() {
        let mut run = PipelineRun::with_catalog(Catalog::new("memory://run", Vec::new()));
        run.cardinality = Some(CardinalityIndex::new());
        run.similarity = Some(Vec::new());
        run.relations = Some(Vec::new());
        run.schema_text = Some("Database Schema Description:\n".to_string());

        run.invalidate_from(PipelineStage::Similarity);
        assert!(run.has_output(PipelineStage::Catalog));
        assert!(run.has_output(PipelineStage::Profile));
        assert!(!run.has_output(PipelineStage::Similarity));
        assert!(!run.has_output(PipelineStage::Relations));
        assert!(!run.has_output(PipelineStage::Serialize));
        assert!(run.join_graph().is_none());
    }
}
