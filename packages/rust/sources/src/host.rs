//! The source hosting capability.

use std::sync::Arc;

use async_trait::async_trait;

use corpusbuilder_shared::{AppConfig, ProviderKind, Result, SourceSpec};

use crate::{GitHubHost, LocalHost};

/// A pluggable documentation host.
///
/// Implementations map failures onto the shared error taxonomy:
/// a missing repository, ref, or subpath is `SourceUnavailable`, throttling is
/// `RateLimited`, and transient transport problems are `Network`.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// List every file path under `spec`'s subpath, recursively.
    ///
    /// Paths are relative to the repository root and use `/` separators.
    async fn list_files(&self, spec: &SourceSpec) -> Result<Vec<String>>;

    /// Fetch the raw bytes of one file.
    async fn fetch_file(&self, spec: &SourceSpec, path: &str) -> Result<Vec<u8>>;
}

/// Build the host selected by the `[provider]` config section.
pub fn build_host(config: &AppConfig) -> Result<Arc<dyn SourceHost>> {
    match config.provider.kind {
        ProviderKind::Github => {
            let token = config.provider_token();
            if token.is_none() {
                tracing::warn!(
                    env = %config.provider.token_env,
                    "no GitHub token set, requests are unauthenticated and heavily rate limited"
                );
            }
            let host = GitHubHost::new(&config.provider.api_base, token)?
                .with_excluded_dirs(config.filters.exclude_dirs.clone());
            Ok(Arc::new(host))
        }
        ProviderKind::Local => Ok(Arc::new(LocalHost::new(&config.provider.local_root))),
    }
}
