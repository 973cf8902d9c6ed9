//! End-to-end ingestion run: sources → enumerate → fetch → normalize → corpus.
//!
//! Every source moves through its own [`SourceState`] machine on a separate
//! task, so a failing source never holds up the others. Fetches across all
//! sources share one semaphore of `fetch_concurrency` permits. All writes go
//! through a single writer task that owns the [`CorpusWriter`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use corpusbuilder_corpus::{CorpusWriter, WriteMode, WriteOutcome};
use corpusbuilder_fetcher::{EnumerateFilter, RetryPolicy, enumerate_markdown, fetch_document};
use corpusbuilder_markdown::normalize_document;
use corpusbuilder_shared::{AppConfig, CorpusBuilderError, NewDocument, Result, SourceSpec};
use corpusbuilder_sources::SourceHost;

use crate::summary::{
    DroppedDocument, FailedSource, RunAbort, RunSummary, SkippedDocument, SourceReport,
    SourceState,
};

/// Pending writes buffered between source tasks and the writer task.
const WRITE_QUEUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Configuration & progress
// ---------------------------------------------------------------------------

/// Everything one run needs; built once from [`AppConfig`] by the caller.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub corpus_path: PathBuf,
    pub write_mode: WriteMode,
    /// Run-wide cap on in-flight fetches.
    pub fetch_concurrency: usize,
    pub retry: RetryPolicy,
    pub filter: EnumerateFilter,
    pub sources: Vec<SourceSpec>,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            corpus_path: PathBuf::from(&config.corpus_path),
            write_mode: WriteMode::Truncate,
            fetch_concurrency: config.fetch_concurrency.max(1) as usize,
            retry: RetryPolicy::from(config),
            filter: EnumerateFilter::from(&config.filters),
            sources: config.sources.clone(),
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called whenever a source changes state.
    fn source_state(&self, source: &SourceSpec, state: SourceState);
    /// Called when a document finished fetching (successfully or not).
    fn document_fetched(&self, source: &SourceSpec, path: &str, current: usize, total: usize);
    /// Called once the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn source_state(&self, _source: &SourceSpec, _state: SourceState) {}
    fn document_fetched(&self, _source: &SourceSpec, _path: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ingestion pipeline bound to one source host.
pub struct Pipeline {
    config: PipelineConfig,
    host: Arc<dyn SourceHost>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, host: Arc<dyn SourceHost>) -> Self {
        Self { config, host }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every configured source to completion.
    ///
    /// Per-document and per-source failures are recorded in the returned
    /// [`RunSummary`]. A corpus write failure aborts the run: once in-flight
    /// work has drained, the partial summary comes back with
    /// [`RunSummary::aborted`] set. Only a corpus that cannot be opened at
    /// all is returned as an error. Cancelling `cancel` stops new fetches;
    /// documents already fetched are still written.
    #[instrument(skip_all, fields(
        sources = self.config.sources.len(),
        corpus = %self.config.corpus_path.display(),
        host = self.host.name(),
    ))]
    pub async fn run(
        &self,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new(Utc::now());

        info!(
            run_id = %summary.run_id,
            mode = ?self.config.write_mode,
            concurrency = self.config.fetch_concurrency,
            "starting ingestion run"
        );

        // Write failures cancel this child token without touching the caller's.
        let run_token = cancel.child_token();

        let writer = CorpusWriter::open(&self.config.corpus_path, self.config.write_mode)?;
        let (writes, writer_task) = spawn_writer(writer, run_token.clone());

        let ctx = SourceContext {
            host: self.host.clone(),
            filter: Arc::new(self.config.filter.clone()),
            retry: self.config.retry,
            permits: Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1))),
            writes,
            corpus_path: self.config.corpus_path.clone(),
            cancel: run_token.clone(),
            progress: progress.clone(),
        };

        let mut handles: Vec<(SourceSpec, JoinHandle<SourceOutcome>)> = Vec::new();
        for spec in &self.config.sources {
            progress.source_state(spec, SourceState::Pending);
            let ctx = ctx.clone();
            let task_spec = spec.clone();
            handles.push((
                spec.clone(),
                tokio::spawn(async move { ingest_source(ctx, task_spec).await }),
            ));
        }
        // The writer stops once every sender is gone.
        drop(ctx);

        for (spec, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(source = %spec, error = %e, "source task aborted");
                    let err = CorpusBuilderError::validation(format!("source task aborted: {e}"));
                    let mut outcome = SourceOutcome::new(spec);
                    outcome.report.state = SourceState::Failed;
                    outcome.failure = Some(FailedSource::new(&outcome.report.source, &err));
                    outcome
                }
            };

            summary.skipped_documents.extend(outcome.skipped);
            summary.dropped_documents.extend(outcome.dropped);
            summary.failed_sources.extend(outcome.failure);
            summary.absorb(outcome.report);
        }

        let writer_result = match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(CorpusBuilderError::write_failed(&self.config.corpus_path, e)),
        };

        summary.cancelled = cancel.is_cancelled();
        summary.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = &writer_result {
            error!(error = %err, "run aborted by corpus write failure");
            summary.aborted = Some(RunAbort::new(err));
        }

        info!(
            run_id = %summary.run_id,
            written = summary.written,
            skipped = summary.skipped,
            dropped = summary.dropped,
            duplicates = summary.duplicates,
            failed_sources = summary.failed_sources.len(),
            cancelled = summary.cancelled,
            aborted = summary.is_aborted(),
            elapsed_ms = summary.elapsed_ms,
            "ingestion run finished"
        );

        progress.done(&summary);
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

struct WriteRequest {
    doc: NewDocument,
    ack: oneshot::Sender<Result<WriteOutcome>>,
}

/// Move `writer` onto a blocking task fed by a channel.
///
/// After the first `WriteFailed` the token is cancelled and every later
/// request is refused with `Cancelled`; the task then returns that failure.
fn spawn_writer(
    mut writer: CorpusWriter,
    cancel: CancellationToken,
) -> (mpsc::Sender<WriteRequest>, JoinHandle<Result<usize>>) {
    let (tx, mut rx) = mpsc::channel::<WriteRequest>(WRITE_QUEUE_DEPTH);

    let handle = tokio::task::spawn_blocking(move || {
        let mut failure: Option<(PathBuf, String)> = None;

        while let Some(request) = rx.blocking_recv() {
            let result = if failure.is_some() {
                Err(CorpusBuilderError::Cancelled)
            } else {
                match writer.write(request.doc) {
                    Err(CorpusBuilderError::WriteFailed { path, reason }) => {
                        error!(path = %path.display(), %reason, "corpus write failed");
                        cancel.cancel();
                        failure = Some((path.clone(), reason.clone()));
                        Err(CorpusBuilderError::WriteFailed { path, reason })
                    }
                    other => other,
                }
            };
            // The source task may have gone away; the write stands regardless.
            let _ = request.ack.send(result);
        }

        let finished = writer.finish();
        match failure {
            Some((path, reason)) => Err(CorpusBuilderError::WriteFailed { path, reason }),
            None => finished,
        }
    });

    (tx, handle)
}

// ---------------------------------------------------------------------------
// Per-source processing
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct SourceContext {
    host: Arc<dyn SourceHost>,
    filter: Arc<EnumerateFilter>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    writes: mpsc::Sender<WriteRequest>,
    corpus_path: PathBuf,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
}

struct SourceOutcome {
    report: SourceReport,
    skipped: Vec<SkippedDocument>,
    dropped: Vec<DroppedDocument>,
    failure: Option<FailedSource>,
}

impl SourceOutcome {
    fn new(spec: SourceSpec) -> Self {
        Self {
            report: SourceReport::new(spec),
            skipped: Vec::new(),
            dropped: Vec::new(),
            failure: None,
        }
    }

    fn transition(&mut self, ctx: &SourceContext, state: SourceState) {
        debug!(source = %self.report.source, from = %self.report.state, to = %state, "source state");
        self.report.state = state;
        ctx.progress.source_state(&self.report.source, state);
    }

    fn fail(&mut self, ctx: &SourceContext, err: &CorpusBuilderError) {
        self.failure = Some(FailedSource::new(&self.report.source, err));
        self.transition(ctx, SourceState::Failed);
    }

    fn skip(&mut self, path: String, err: &CorpusBuilderError) {
        warn!(source = %self.report.source, path, error = %err, "skipping document");
        self.report.skipped += 1;
        self.skipped.push(SkippedDocument {
            source: self.report.source.to_string(),
            path,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    fn drop_document(&mut self, path: String) {
        warn!(source = %self.report.source, path, "dropping document, empty after normalization");
        self.report.dropped += 1;
        self.dropped.push(DroppedDocument {
            source: self.report.source.to_string(),
            path,
        });
    }
}

enum FileResult {
    Ready(NewDocument),
    Skipped(CorpusBuilderError),
    Dropped,
}

/// Drive one source from `Pending` to `Done` or `Failed`.
#[instrument(skip_all, fields(source = %spec))]
async fn ingest_source(ctx: SourceContext, spec: SourceSpec) -> SourceOutcome {
    let mut outcome = SourceOutcome::new(spec.clone());

    // --- Enumerating ---
    outcome.transition(&ctx, SourceState::Enumerating);
    let paths = match enumerate_markdown(
        ctx.host.as_ref(),
        &spec,
        &ctx.filter,
        &ctx.retry,
        &ctx.cancel,
    )
    .await
    {
        Ok(paths) => paths,
        Err(err) => {
            warn!(error = %err, "source failed during enumeration");
            outcome.fail(&ctx, &err);
            return outcome;
        }
    };
    outcome.report.listed = paths.len();

    // --- Fetching ---
    outcome.transition(&ctx, SourceState::Fetching);
    let total = paths.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(total);

    for path in paths {
        let ctx = ctx.clone();
        let spec = spec.clone();
        let completed = completed.clone();
        let task_path = path.clone();
        handles.push((
            path,
            tokio::spawn(async move {
                let result = fetch_and_normalize(&ctx, &spec, &task_path).await;
                let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                ctx.progress.document_fetched(&spec, &task_path, current, total);
                result
            }),
        ));
    }

    let mut ready = Vec::new();
    for (path, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            FileResult::Skipped(CorpusBuilderError::validation(format!(
                "fetch task aborted: {e}"
            )))
        });
        match result {
            FileResult::Ready(doc) => ready.push(doc),
            FileResult::Skipped(err) => outcome.skip(path, &err),
            FileResult::Dropped => outcome.drop_document(path),
        }
    }

    // --- Writing ---
    outcome.transition(&ctx, SourceState::Writing);
    for doc in ready {
        let path = doc.path.clone();
        match commit(&ctx, doc).await {
            Ok(WriteOutcome::Written(id)) => {
                debug!(path, %id, "written");
                outcome.report.written += 1;
            }
            Ok(WriteOutcome::Duplicate(id)) => {
                debug!(path, %id, "already in corpus");
                outcome.report.duplicates += 1;
            }
            Err(CorpusBuilderError::NormalizationEmpty { .. }) => outcome.drop_document(path),
            Err(err) => {
                outcome.fail(&ctx, &err);
                return outcome;
            }
        }
    }

    outcome.transition(&ctx, SourceState::Done);
    info!(
        listed = outcome.report.listed,
        written = outcome.report.written,
        skipped = outcome.report.skipped,
        dropped = outcome.report.dropped,
        duplicates = outcome.report.duplicates,
        "source complete"
    );
    outcome
}

/// Fetch one document under a run-wide permit, then normalize it.
async fn fetch_and_normalize(ctx: &SourceContext, spec: &SourceSpec, path: &str) -> FileResult {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return FileResult::Skipped(CorpusBuilderError::Cancelled),
        permit = ctx.permits.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return FileResult::Skipped(CorpusBuilderError::Cancelled),
        },
    };

    let fetched = fetch_document(ctx.host.as_ref(), spec, path, &ctx.retry, &ctx.cancel).await;
    drop(permit);

    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(err) => return FileResult::Skipped(err),
    };

    match normalize_document(path, &fetched.bytes) {
        Ok(text) => FileResult::Ready(NewDocument {
            source: spec.clone(),
            path: path.to_string(),
            raw_bytes_hash: fetched.raw_bytes_hash,
            text,
            fetched_at: fetched.fetched_at,
        }),
        Err(_) => FileResult::Dropped,
    }
}

/// Hand `doc` to the writer task and wait for its verdict.
async fn commit(ctx: &SourceContext, doc: NewDocument) -> Result<WriteOutcome> {
    let (ack, verdict) = oneshot::channel();
    ctx.writes
        .send(WriteRequest { doc, ack })
        .await
        .map_err(|_| CorpusBuilderError::write_failed(&ctx.corpus_path, "writer task stopped"))?;
    verdict
        .await
        .map_err(|_| CorpusBuilderError::write_failed(&ctx.corpus_path, "writer task stopped"))?
}
