//! Local directory host: serves `<root>/<owner>/<repo>/<path>` trees.
//!
//! The `ref` of a [`SourceSpec`] is ignored; whatever is checked out on disk is
//! what gets ingested. Useful for offline runs against pre-cloned mirrors.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use corpusbuilder_shared::{CorpusBuilderError, Result, SourceSpec};

use crate::SourceHost;

/// Source host reading from a local mirror directory.
pub struct LocalHost {
    root: PathBuf,
}

impl LocalHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo_dir(&self, spec: &SourceSpec) -> PathBuf {
        self.root.join(&spec.owner).join(&spec.repo)
    }
}

/// Reject absolute paths and `..` so a listing can never escape the repo directory.
fn checked_relative(path: &str) -> Result<&Path> {
    let rel = Path::new(path);
    let safe = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(CorpusBuilderError::validation(format!(
            "path '{path}' escapes the repository root"
        )));
    }
    Ok(rel)
}

#[async_trait]
impl SourceHost for LocalHost {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_files(&self, spec: &SourceSpec) -> Result<Vec<String>> {
        let repo_dir = self.repo_dir(spec);
        let start = repo_dir.join(checked_relative(spec.root())?);
        let label = spec.to_string();

        tokio::task::spawn_blocking(move || {
            if !start.exists() {
                return Err(CorpusBuilderError::source_unavailable(
                    label,
                    format!("{} does not exist", start.display()),
                ));
            }

            let mut files = Vec::new();
            for entry in WalkDir::new(&start).follow_links(false) {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| start.clone());
                    CorpusBuilderError::io(path, std::io::Error::other(e.to_string()))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = entry.path().strip_prefix(&repo_dir).unwrap_or(entry.path());
                let rel_str = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(rel_str);
            }

            debug!(count = files.len(), "listed local tree");
            Ok(files)
        })
        .await
        .map_err(|e| CorpusBuilderError::validation(format!("listing task failed: {e}")))?
    }

    async fn fetch_file(&self, spec: &SourceSpec, path: &str) -> Result<Vec<u8>> {
        let full = self.repo_dir(spec).join(checked_relative(path)?);
        tokio::fs::read(&full)
            .await
            .map_err(|e| CorpusBuilderError::io(full, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mirror() -> PathBuf {
        let root = std::env::temp_dir().join(format!("cb-local-host-{}", Uuid::now_v7()));
        let docs = root.join("acme").join("handbook").join("docs");
        std::fs::create_dir_all(docs.join("guide")).unwrap();
        std::fs::write(docs.join("index.md"), "# Index\n").unwrap();
        std::fs::write(docs.join("guide").join("setup.md"), "# Setup\n").unwrap();
        root
    }

    #[tokio::test]
    async fn test_lists_and_fetches_relative_paths() {
        let root = mirror();
        let host = LocalHost::new(&root);
        let spec = SourceSpec::new("acme", "handbook", "docs", "main");

        let mut files = host.list_files(&spec).await.unwrap();
        files.sort();
        assert_eq!(files, vec!["docs/guide/setup.md", "docs/index.md"]);

        let bytes = host.fetch_file(&spec, "docs/index.md").await.unwrap();
        assert_eq!(bytes, b"# Index\n");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_missing_repo_is_source_unavailable() {
        let root = mirror();
        let host = LocalHost::new(&root);
        let spec = SourceSpec::new("acme", "nope", "docs", "main");

        let err = host.list_files(&spec).await.unwrap_err();
        assert!(matches!(err, CorpusBuilderError::SourceUnavailable { .. }));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let host = LocalHost::new("/tmp");
        let spec = SourceSpec::new("acme", "handbook", "", "main");
        let err = host.fetch_file(&spec, "../../etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }
}
