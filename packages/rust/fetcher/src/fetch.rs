//! Raw content retrieval for a single enumerated path.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use corpusbuilder_shared::{CorpusBuilderError, Result, SourceSpec};
use corpusbuilder_sources::SourceHost;

use crate::retry::{RetryFailure, RetryPolicy, with_retry};

/// Unmodified bytes of one upstream file.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    /// SHA-256 (hex) of `bytes`.
    pub raw_bytes_hash: String,
    pub fetched_at: DateTime<Utc>,
    /// Attempts it took, first try included.
    pub attempts: u32,
}

/// Fetch `path` from `spec`, retrying transient failures per `policy`.
///
/// Exhausted or permanent failures become [`CorpusBuilderError::FetchFailed`]
/// carrying the path; cancellation surfaces as [`CorpusBuilderError::Cancelled`].
pub async fn fetch_document(
    host: &dyn SourceHost,
    spec: &SourceSpec,
    path: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<FetchedFile> {
    let outcome = with_retry(policy, cancel, path, || host.fetch_file(spec, path)).await;

    match outcome {
        Ok((bytes, attempts)) => {
            debug!(path, attempts, len = bytes.len(), "fetched");
            Ok(FetchedFile {
                raw_bytes_hash: content_hash(&bytes),
                fetched_at: Utc::now(),
                bytes,
                attempts,
            })
        }
        Err(RetryFailure {
            last_error: CorpusBuilderError::Cancelled,
            ..
        }) => Err(CorpusBuilderError::Cancelled),
        Err(RetryFailure {
            last_error,
            attempts,
        }) => Err(CorpusBuilderError::FetchFailed {
            path: path.to_string(),
            attempts,
            reason: last_error.to_string(),
        }),
    }
}

/// Compute the SHA-256 hash of raw content as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHost;
    use std::time::Duration;

    fn spec() -> SourceSpec {
        SourceSpec::new("acme", "handbook", "docs", "main")
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash(b"hello world");
        assert_eq!(hash.len(), 64); // SHA-256 = 64 hex chars
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let host = ScriptedHost::with_files(&[("docs/a.md", "# A")]).fail_first("docs/a.md", 2);

        let file = fetch_document(&host, &spec(), "docs/a.md", &fast(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(file.bytes, b"# A");
        assert_eq!(file.attempts, 3);
        assert_eq!(file.raw_bytes_hash, content_hash(b"# A"));
        assert_eq!(host.calls_for("docs/a.md"), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_path() {
        let host = ScriptedHost::with_files(&[("docs/a.md", "# A")]).fail_first("docs/a.md", 5);

        let err = fetch_document(&host, &spec(), "docs/a.md", &fast(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CorpusBuilderError::FetchFailed { path, attempts, .. } => {
                assert_eq!(path, "docs/a.md");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_retry() {
        let host = ScriptedHost::with_files(&[]);

        let err = fetch_document(&host, &spec(), "docs/gone.md", &fast(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CorpusBuilderError::FetchFailed { attempts: 1, .. }));
        assert_eq!(host.calls_for("docs/gone.md"), 1);
    }
}
