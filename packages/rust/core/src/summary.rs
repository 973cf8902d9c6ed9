//! Run summary: what an ingestion run wrote, skipped, dropped, and failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use corpusbuilder_shared::{CorpusBuilderError, ErrorKind, SourceSpec};

/// Lifecycle of one source within a run.
///
/// `Pending → Enumerating → Fetching → Writing → Done`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    Enumerating,
    Fetching,
    Writing,
    Done,
    Failed,
}

impl SourceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Enumerating => "enumerating",
            Self::Fetching => "fetching",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A document that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub source: String,
    pub path: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// A document that normalized to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedDocument {
    pub source: String,
    pub path: String,
}

/// A source that failed as a whole (enumeration or writing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSource {
    pub source: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailedSource {
    pub fn new(source: &SourceSpec, err: &CorpusBuilderError) -> Self {
        Self {
            source: source.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Why a run stopped before every source finished on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAbort {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunAbort {
    pub fn new(err: &CorpusBuilderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-source counters and final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: SourceSpec,
    pub state: SourceState,
    /// Documents found by enumeration.
    pub listed: usize,
    pub written: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub duplicates: usize,
}

impl SourceReport {
    pub fn new(source: SourceSpec) -> Self {
        Self {
            source,
            state: SourceState::Pending,
            listed: 0,
            written: 0,
            skipped: 0,
            dropped: 0,
            duplicates: 0,
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    /// Set when a corpus write failure stopped the run. The counters still
    /// describe everything that happened up to that point.
    #[serde(default)]
    pub aborted: Option<RunAbort>,
    pub written: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub skipped_documents: Vec<SkippedDocument>,
    pub dropped_documents: Vec<DroppedDocument>,
    pub failed_sources: Vec<FailedSource>,
    pub sources: Vec<SourceReport>,
}

impl RunSummary {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at,
            elapsed_ms: 0,
            cancelled: false,
            aborted: None,
            written: 0,
            skipped: 0,
            dropped: 0,
            duplicates: 0,
            skipped_documents: Vec::new(),
            dropped_documents: Vec::new(),
            failed_sources: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Every source reached `Done` and nothing was skipped.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && !self.is_aborted() && self.failed_sources.is_empty() && self.skipped == 0
    }

    pub fn report_for(&self, source: &SourceSpec) -> Option<&SourceReport> {
        self.sources.iter().find(|r| &r.source == source)
    }

    /// Fold one source's report into the run totals.
    pub(crate) fn absorb(&mut self, report: SourceReport) {
        self.written += report.written;
        self.skipped += report.skipped;
        self.dropped += report.dropped;
        self.duplicates += report.duplicates;
        self.sources.push(report);
    }
}
