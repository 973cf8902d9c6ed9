//! Markdown normalization for corpus ingestion.
//!
//! Turns fetched file bytes into retrieval-ready text. Normalization is a pure
//! function of its input: no randomness, no clock, no I/O, so unchanged
//! upstream bytes always produce byte-identical text.
//!
//! Passes, in order:
//! 1. Lossy UTF-8 decode (invalid sequences become U+FFFD)
//! 2. Leading front-matter removal (`---` YAML or `+++` TOML)
//! 3. Markup stripping outside fenced and inline code
//! 4. Blank-line collapsing outside fenced code

mod cleanup;

use tracing::{debug, instrument};

use corpusbuilder_shared::{CorpusBuilderError, Result};

/// Source dialect, which decides a few dialect-specific stripping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Markdown,
    /// MDX: markdown plus JSX and ES module statements.
    Mdx,
}

impl DocumentKind {
    /// Classify by file extension; anything that is not `.mdx` is plain markdown.
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((_, ext)) if ext.eq_ignore_ascii_case("mdx") => Self::Mdx,
            _ => Self::Markdown,
        }
    }
}

/// Normalize raw bytes. Returns `None` when nothing but whitespace remains.
pub fn normalize(bytes: &[u8], kind: DocumentKind) -> Option<String> {
    let text = cleanup::run_pipeline(bytes, kind);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Normalize the document at `path`, failing with
/// [`CorpusBuilderError::NormalizationEmpty`] if it normalizes to nothing.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn normalize_document(path: &str, bytes: &[u8]) -> Result<String> {
    let kind = DocumentKind::from_path(path);
    let text = normalize(bytes, kind).ok_or_else(|| CorpusBuilderError::NormalizationEmpty {
        path: path.to_string(),
    })?;

    debug!(?kind, normalized_len = text.len(), "normalized");
    Ok(text)
}
