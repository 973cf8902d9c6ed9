//! Markdown file enumeration for one source.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use corpusbuilder_shared::{FiltersConfig, Result, SourceSpec};
use corpusbuilder_sources::SourceHost;

use crate::retry::{RetryPolicy, with_retry};

/// Decides which listed paths are ingestible documents.
#[derive(Debug, Clone)]
pub struct EnumerateFilter {
    /// Lowercased extensions without the leading dot.
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl EnumerateFilter {
    pub fn new(extensions: &[String], exclude_dirs: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude_dirs: exclude_dirs.to_vec(),
        }
    }

    /// Whether `path` has a markdown extension and no excluded directory component.
    pub fn accepts(&self, path: &str) -> bool {
        let mut components: Vec<&str> = path.split('/').collect();
        let Some(file_name) = components.pop() else {
            return false;
        };

        if components
            .iter()
            .any(|dir| self.exclude_dirs.iter().any(|ex| ex == dir))
        {
            return false;
        }

        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

impl Default for EnumerateFilter {
    fn default() -> Self {
        Self::from(&FiltersConfig::default())
    }
}

impl From<&FiltersConfig> for EnumerateFilter {
    fn from(config: &FiltersConfig) -> Self {
        Self::new(&config.extensions, &config.exclude_dirs)
    }
}

/// Whether `path` lies under the source's subpath root.
fn under_root(path: &str, root: &str) -> bool {
    root.is_empty()
        || path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// List the markdown documents of `spec`, sorted and de-duplicated.
///
/// The listing is retried as a whole on rate limiting; exhausting the policy
/// returns the last host error (`RateLimited`, `SourceUnavailable`, ...).
/// Calling this again re-lists from the host.
#[instrument(skip_all, fields(source = %spec, host = host.name()))]
pub async fn enumerate_markdown(
    host: &dyn SourceHost,
    spec: &SourceSpec,
    filter: &EnumerateFilter,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let label = spec.to_string();
    let (listed, attempts) = with_retry(policy, cancel, &label, || host.list_files(spec))
        .await
        .map_err(|failure| failure.last_error)?;

    let root = spec.root();
    let total = listed.len();
    let mut paths: Vec<String> = listed
        .into_iter()
        .map(|p| p.trim_start_matches('/').to_string())
        .filter(|p| under_root(p, root) && filter.accepts(p))
        .collect();
    paths.sort();
    paths.dedup();

    debug!(total, attempts, "listing complete");
    info!(documents = paths.len(), "enumerated source");

    Ok(paths)
}
