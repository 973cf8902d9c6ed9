//! Core pipeline orchestration for CorpusBuilder.
//!
//! This crate ties together source enumeration, fetching, normalization, and
//! the corpus writer into one ingestion run ([`pipeline::Pipeline`]), reports
//! what happened ([`summary::RunSummary`]), and plans downstream re-indexing
//! from content hashes ([`reindex`]).

pub mod pipeline;
pub mod reindex;
pub mod summary;

pub use pipeline::{Pipeline, PipelineConfig, ProgressReporter, SilentProgress};
pub use reindex::{CorpusIndex, IndexLookup, ReindexPlan, plan_reindex};
pub use summary::{
    DroppedDocument, FailedSource, RunAbort, RunSummary, SkippedDocument, SourceReport,
    SourceState,
};
