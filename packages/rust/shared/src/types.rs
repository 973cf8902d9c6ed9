//! Core domain types for CorpusBuilder corpora.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SourceSpec
// ---------------------------------------------------------------------------

/// One remote documentation tree to ingest: a subpath of a repository at a ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Subpath root inside the repository; empty means the repository root.
    #[serde(default)]
    pub path: String,
    /// Branch, tag, or commit.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl SourceSpec {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        path: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            path: path.into(),
            git_ref: git_ref.into(),
        }
    }

    /// The subpath with surrounding slashes removed.
    pub fn root(&self) -> &str {
        self.path.trim_matches('/')
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}@{}",
            self.owner,
            self.repo,
            self.root(),
            self.git_ref
        )
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A normalized document ready to be committed. The corpus writer assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    /// The originating source.
    pub source: SourceSpec,
    /// Path of the file within the repository tree.
    pub path: String,
    /// SHA-256 (hex) of the unmodified fetched bytes.
    pub raw_bytes_hash: String,
    /// Normalized text content.
    pub text: String,
    /// When the file was retrieved.
    pub fetched_at: DateTime<Utc>,
}

/// One line of the corpus file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable identifier derived from (owner, repo, path, ref).
    pub id: String,
    /// The originating source.
    pub source: SourceSpec,
    /// Path of the file within the repository tree.
    pub path: String,
    /// SHA-256 (hex) of the unmodified fetched bytes.
    pub raw_bytes_hash: String,
    /// Normalized text content.
    pub text: String,
    /// When the file was retrieved.
    pub fetched_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Attach an id to a new document.
    pub fn from_new(id: String, doc: NewDocument) -> Self {
        Self {
            id,
            source: doc.source,
            path: doc.path,
            raw_bytes_hash: doc.raw_bytes_hash,
            text: doc.text,
            fetched_at: doc.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_spec_display() {
        let spec = SourceSpec::new("hwchase17", "langchain", "/docs/", "master");
        assert_eq!(spec.to_string(), "hwchase17/langchain:docs@master");
        assert_eq!(spec.root(), "docs");
    }

    #[test]
    fn source_spec_uses_ref_key() {
        let spec = SourceSpec::new("rust-lang", "book", "src", "main");
        let json = serde_json::to_string(&spec).expect("serialize");
        assert!(json.contains("\"ref\":\"main\""));

        let parsed: SourceSpec =
            serde_json::from_str(r#"{"owner":"a","repo":"b","ref":"v1"}"#).expect("deserialize");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.git_ref, "v1");
    }

    #[test]
    fn record_serializes_all_fields() {
        let record = DocumentRecord::from_new(
            "abc123".into(),
            NewDocument {
                source: SourceSpec::new("a", "b", "docs", "main"),
                path: "docs/intro.md".into(),
                raw_bytes_hash: "ff".into(),
                text: "# Intro".into(),
                fetched_at: Utc::now(),
            },
        );

        let value = serde_json::to_value(&record).expect("serialize");
        for key in ["id", "source", "path", "raw_bytes_hash", "text", "fetched_at"] {
            assert!(value.get(key).is_some(), "missing field {key}");
        }
        let parsed: DocumentRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, record);
    }
}
