//! Line-delimited corpus file storage.
//!
//! The [`CorpusWriter`] is the only component that assigns document ids and the
//! only writer of a corpus file. Each [`DocumentRecord`] is serialized as one
//! JSON object on one line and written with a single `write_all`, so a reader
//! never observes interleaved partial records from this process.
//!
//! **Access rules:**
//! - Pipeline: sole writer via [`CorpusWriter::open`]
//! - Downstream consumers: read-only via [`read_corpus`] / [`load_ids`]

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use corpusbuilder_shared::{CorpusBuilderError, DocumentRecord, NewDocument, Result, SourceSpec};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable document id: hex SHA-256 over `owner \0 repo \0 path \0 ref`.
///
/// The NUL separator keeps field boundaries unambiguous.
pub fn record_id(owner: &str, repo: &str, path: &str, git_ref: &str) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in [owner, repo, path, git_ref].into_iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// [`record_id`] for a file of `spec`.
pub fn record_id_for(spec: &SourceSpec, path: &str) -> String {
    record_id(&spec.owner, &spec.repo, path, &spec.git_ref)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// How to treat an existing corpus file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start from an empty file.
    Truncate,
    /// Keep existing records and skip ids already present.
    Append,
}

/// Result of committing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new line was appended.
    Written(String),
    /// The id was already in the corpus; nothing was written.
    Duplicate(String),
}

/// Append-only writer over a corpus file.
pub struct CorpusWriter {
    path: PathBuf,
    file: File,
    seen: HashSet<String>,
    written: usize,
}

impl CorpusWriter {
    /// Open (creating parent directories) the corpus at `path`.
    pub fn open(path: &Path, mode: WriteMode) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CorpusBuilderError::io(parent, e))?;
        }

        let seen = match mode {
            WriteMode::Append if path.exists() => load_ids(path)?,
            _ => HashSet::new(),
        };

        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.read(true).append(true),
        };
        let mut file = options
            .open(path)
            .map_err(|e| CorpusBuilderError::write_failed(path, e))?;

        if mode == WriteMode::Append {
            terminate_partial_line(&mut file).map_err(|e| CorpusBuilderError::write_failed(path, e))?;
        }

        info!(path = %path.display(), ?mode, existing = seen.len(), "opened corpus");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            seen,
            written: 0,
        })
    }

    /// Path of the corpus file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `id` is already present in the corpus.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of records written by this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Assign an id to `doc` and append it unless the id is already present.
    ///
    /// Empty text is refused with [`CorpusBuilderError::NormalizationEmpty`];
    /// any persistence failure is [`CorpusBuilderError::WriteFailed`].
    pub fn write(&mut self, doc: NewDocument) -> Result<WriteOutcome> {
        if doc.text.trim().is_empty() {
            return Err(CorpusBuilderError::NormalizationEmpty { path: doc.path });
        }

        let id = record_id_for(&doc.source, &doc.path);
        if self.seen.contains(&id) {
            debug!(%id, path = %doc.path, "already in corpus, skipping");
            return Ok(WriteOutcome::Duplicate(id));
        }

        let record = DocumentRecord::from_new(id.clone(), doc);
        let mut line = serde_json::to_string(&record)
            .map_err(|e| CorpusBuilderError::write_failed(&self.path, e))?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .map_err(|e| CorpusBuilderError::write_failed(&self.path, e))?;

        self.seen.insert(id.clone());
        self.written += 1;
        Ok(WriteOutcome::Written(id))
    }

    /// Flush buffered data to the operating system.
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| CorpusBuilderError::write_failed(&self.path, e))
    }

    /// Flush and sync the file; returns how many records this writer added.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        self.file
            .sync_all()
            .map_err(|e| CorpusBuilderError::write_failed(&self.path, e))?;
        info!(path = %self.path.display(), written = self.written, "corpus closed");
        Ok(self.written)
    }
}

/// If the file ends mid-line (an interrupted earlier run), end that line so
/// new records start on a fresh one.
fn terminate_partial_line(file: &mut File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read every record of a corpus file. Malformed lines are an error.
pub fn read_corpus(path: &Path) -> Result<Vec<DocumentRecord>> {
    let file = File::open(path).map_err(|e| CorpusBuilderError::io(path, e))?;
    let mut records = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CorpusBuilderError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(&line).map_err(|e| {
            CorpusBuilderError::validation(format!(
                "{}:{}: malformed record: {e}",
                path.display(),
                index + 1
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Collect the ids present in a corpus file, skipping malformed lines.
pub fn load_ids(path: &Path) -> Result<HashSet<String>> {
    #[derive(serde::Deserialize)]
    struct IdOnly {
        id: String,
    }

    let file = File::open(path).map_err(|e| CorpusBuilderError::io(path, e))?;
    let mut ids = HashSet::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CorpusBuilderError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IdOnly>(&line) {
            Ok(rec) => {
                ids.insert(rec.id);
            }
            Err(e) => warn!(path = %path.display(), line = index + 1, error = %e, "skipping malformed corpus line"),
        }
    }

    Ok(ids)
}

/// Integrity report for a corpus file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub records: usize,
    pub unique_ids: usize,
    /// Ids that occur more than once.
    pub duplicate_ids: Vec<String>,
    /// Ids whose text is empty or whitespace only.
    pub empty_text: Vec<String>,
}

impl CorpusStats {
    pub fn is_valid(&self) -> bool {
        self.duplicate_ids.is_empty() && self.empty_text.is_empty()
    }
}

/// Check id uniqueness and text non-emptiness across a corpus file.
pub fn verify_corpus(path: &Path) -> Result<CorpusStats> {
    let records = read_corpus(path)?;
    let mut seen = HashSet::new();
    let mut stats = CorpusStats {
        records: records.len(),
        ..CorpusStats::default()
    };

    for record in &records {
        if !seen.insert(record.id.as_str()) && !stats.duplicate_ids.contains(&record.id) {
            stats.duplicate_ids.push(record.id.clone());
        }
        if record.text.trim().is_empty() {
            stats.empty_text.push(record.id.clone());
        }
    }
    stats.unique_ids = seen.len();

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn tmp_corpus() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("cb-corpus-test-{}", Uuid::now_v7()));
        let path = dir.join("nested").join("corpus.jsonl");
        (dir, path)
    }

    fn doc(repo: &str, path: &str, text: &str) -> NewDocument {
        NewDocument {
            source: SourceSpec::new("acme", repo, "docs", "main"),
            path: path.into(),
            raw_bytes_hash: "00".into(),
            text: text.into(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_id_stable_and_distinct() {
        let a = record_id("acme", "handbook", "docs/a.md", "main");
        assert_eq!(a, record_id("acme", "handbook", "docs/a.md", "main"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, record_id("acme", "handbook", "docs/a.md", "v2"));
        // Field boundaries matter.
        assert_ne!(
            record_id("ab", "c", "p", "r"),
            record_id("a", "bc", "p", "r")
        );
    }

    #[test]
    fn test_write_one_line_per_record() {
        let (dir, path) = tmp_corpus();
        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();

        let outcome = writer.write(doc("handbook", "docs/a.md", "# A\n\nline two")).unwrap();
        assert!(matches!(outcome, WriteOutcome::Written(_)));
        writer.write(doc("handbook", "docs/b.md", "# B")).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));

        let records = read_corpus(&path).unwrap();
        assert_eq!(records[0].text, "# A\n\nline two");
        assert_eq!(records[0].id, record_id("acme", "handbook", "docs/a.md", "main"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_duplicate_in_same_run_skipped() {
        let (dir, path) = tmp_corpus();
        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();

        writer.write(doc("handbook", "docs/a.md", "first")).unwrap();
        let second = writer.write(doc("handbook", "docs/a.md", "second")).unwrap();
        assert!(matches!(second, WriteOutcome::Duplicate(_)));
        writer.finish().unwrap();

        assert_eq!(read_corpus(&path).unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_append_mode_skips_existing_ids() {
        let (dir, path) = tmp_corpus();

        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();
        writer.write(doc("handbook", "docs/a.md", "A")).unwrap();
        writer.finish().unwrap();

        let mut writer = CorpusWriter::open(&path, WriteMode::Append).unwrap();
        assert!(writer.contains(&record_id("acme", "handbook", "docs/a.md", "main")));
        let again = writer.write(doc("handbook", "docs/a.md", "A")).unwrap();
        assert!(matches!(again, WriteOutcome::Duplicate(_)));
        writer.write(doc("cookbook", "docs/c.md", "C")).unwrap();
        writer.finish().unwrap();

        let stats = verify_corpus(&path).unwrap();
        assert_eq!(stats.records, 2);
        assert!(stats.is_valid());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_truncate_mode_discards_previous() {
        let (dir, path) = tmp_corpus();

        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();
        writer.write(doc("handbook", "docs/a.md", "A")).unwrap();
        writer.finish().unwrap();

        let writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();
        assert!(!writer.contains(&record_id("acme", "handbook", "docs/a.md", "main")));
        writer.finish().unwrap();
        assert!(read_corpus(&path).unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_append_after_partial_line() {
        let (dir, path) = tmp_corpus();

        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();
        writer.write(doc("handbook", "docs/a.md", "A")).unwrap();
        writer.finish().unwrap();
        // Simulate an interrupted write.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"id\":\"trunc").unwrap();
        drop(f);

        let mut writer = CorpusWriter::open(&path, WriteMode::Append).unwrap();
        writer.write(doc("handbook", "docs/b.md", "B")).unwrap();
        writer.finish().unwrap();

        let ids = load_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(read_corpus(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_text_refused() {
        let (dir, path) = tmp_corpus();
        let mut writer = CorpusWriter::open(&path, WriteMode::Truncate).unwrap();

        let err = writer.write(doc("handbook", "docs/a.md", "  \n")).unwrap_err();
        assert!(matches!(err, CorpusBuilderError::NormalizationEmpty { .. }));
        assert_eq!(writer.written(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_verify_reports_duplicates() {
        let (dir, path) = tmp_corpus();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let record = DocumentRecord::from_new("same".into(), doc("handbook", "docs/a.md", "A"));
        let line = serde_json::to_string(&record).unwrap();
        std::fs::write(&path, format!("{line}\n{line}\n")).unwrap();

        let stats = verify_corpus(&path).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.unique_ids, 1);
        assert_eq!(stats.duplicate_ids, vec!["same".to_string()]);
        assert!(!stats.is_valid());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
