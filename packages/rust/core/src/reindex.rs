//! Re-index planning for downstream embedding stores.
//!
//! A corpus record needs re-embedding when its id is unknown to the index or
//! its `raw_bytes_hash` differs from the hash the index recorded. The
//! decision lives here, outside the ingestion run, so the pipeline never
//! needs to know what an index contains.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{info, instrument};

use corpusbuilder_corpus::read_corpus;
use corpusbuilder_shared::{DocumentRecord, Result};

/// What a downstream index knows about a document.
pub trait IndexLookup {
    /// The `raw_bytes_hash` the index holds for `id`, if any.
    fn lookup(&self, id: &str) -> Option<String>;
}

impl IndexLookup for HashMap<String, String> {
    fn lookup(&self, id: &str) -> Option<String> {
        self.get(id).cloned()
    }
}

/// An [`IndexLookup`] built from an earlier corpus file.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    hashes: HashMap<String, String>,
}

impl CorpusIndex {
    pub fn from_records(records: &[DocumentRecord]) -> Self {
        Self {
            hashes: records
                .iter()
                .map(|r| (r.id.clone(), r.raw_bytes_hash.clone()))
                .collect(),
        }
    }

    /// Load from a corpus file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_records(&read_corpus(path)?))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }

    /// Full plan against `records`, including ids no longer present.
    #[instrument(skip_all, fields(indexed = self.len(), records = records.len()))]
    pub fn plan(&self, records: &[DocumentRecord], force: bool) -> ReindexPlan {
        let mut plan = plan_reindex(records, self, force);
        plan.removed = removed_ids(self.ids(), records);

        info!(
            new = plan.new.len(),
            changed = plan.changed.len(),
            unchanged = plan.unchanged.len(),
            removed = plan.removed.len(),
            "re-index plan ready"
        );
        plan
    }
}

impl IndexLookup for CorpusIndex {
    fn lookup(&self, id: &str) -> Option<String> {
        self.hashes.get(id).cloned()
    }
}

/// Ids grouped by what a downstream index must do with them. Each list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexPlan {
    /// Not in the index yet.
    pub new: Vec<String>,
    /// In the index with a different content hash.
    pub changed: Vec<String>,
    /// In the index with the same content hash.
    pub unchanged: Vec<String>,
    /// In the index but no longer in the corpus.
    pub removed: Vec<String>,
}

impl ReindexPlan {
    /// Ids that need (re-)embedding.
    pub fn to_embed(&self) -> impl Iterator<Item = &str> {
        self.new.iter().chain(&self.changed).map(String::as_str)
    }

    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Classify `records` against `lookup`. `force` treats every known id as changed.
///
/// `removed` is left empty: a lookup cannot enumerate its ids. Use
/// [`removed_ids`] or [`CorpusIndex::plan`] when the previous id set is known.
pub fn plan_reindex(
    records: &[DocumentRecord],
    lookup: &dyn IndexLookup,
    force: bool,
) -> ReindexPlan {
    let mut plan = ReindexPlan::default();

    for record in records {
        match lookup.lookup(&record.id) {
            Some(hash) if !force && hash == record.raw_bytes_hash => {
                plan.unchanged.push(record.id.clone());
            }
            Some(_) => plan.changed.push(record.id.clone()),
            None => plan.new.push(record.id.clone()),
        }
    }

    plan.new.sort();
    plan.changed.sort();
    plan.unchanged.sort();
    plan
}

/// Ids from `previous` that do not appear in `records`, sorted.
pub fn removed_ids<'a>(
    previous: impl IntoIterator<Item = &'a str>,
    records: &[DocumentRecord],
) -> Vec<String> {
    let current: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let mut removed: Vec<String> = previous
        .into_iter()
        .filter(|id| !current.contains(id))
        .map(str::to_string)
        .collect();
    removed.sort();
    removed
}
