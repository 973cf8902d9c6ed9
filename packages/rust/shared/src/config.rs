//! Application configuration for CorpusBuilder.
//!
//! Config is read from `--config <path>`, then `./corpusbuilder.toml`, then
//! `~/.corpusbuilder/corpusbuilder.toml`. CLI flags override config file values,
//! which override defaults. Nothing here is global: the loaded [`AppConfig`] is
//! passed explicitly to whoever needs it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CorpusBuilderError, Result};
use crate::types::SourceSpec;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "corpusbuilder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".corpusbuilder";

// ---------------------------------------------------------------------------
// Config structs (matching corpusbuilder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output location for the corpus file.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    /// Maximum parallel in-flight fetches for the whole run.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: u32,

    /// Total attempts per upstream request (first try included).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff in milliseconds, doubled after each failed attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Source hosting provider.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Enumeration filters.
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Documentation sources, processed independently.
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            fetch_concurrency: default_fetch_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            provider: ProviderConfig::default(),
            filters: FiltersConfig::default(),
            sources: Vec::new(),
        }
    }
}

fn default_corpus_path() -> String {
    "data/docs_en.jsonl".into()
}
fn default_fetch_concurrency() -> u32 {
    4
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

/// Which [`SourceSpec`] host implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// GitHub REST API.
    #[default]
    Github,
    /// A local directory laid out as `<root>/<owner>/<repo>/...`.
    Local,
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// GitHub REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Name of the env var holding the GitHub token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Root directory for the `local` provider.
    #[serde(default = "default_local_root")]
    pub local_root: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_base: default_api_base(),
            token_env: default_token_env(),
            local_root: default_local_root(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_local_root() -> String {
    ".".into()
}

/// `[filters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// File extensions (without the dot) treated as markdown.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory names never descended into (e.g. translations).
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["md".into(), "mdx".into()]
}
fn default_exclude_dirs() -> Vec<String> {
    vec!["zh".into()]
}

impl AppConfig {
    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.corpus_path.trim().is_empty() {
            return Err(CorpusBuilderError::config("corpus_path must not be empty"));
        }
        if self.fetch_concurrency == 0 {
            return Err(CorpusBuilderError::config(
                "fetch_concurrency must be at least 1",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(CorpusBuilderError::config(
                "retry_attempts must be at least 1",
            ));
        }
        if self.filters.extensions.is_empty() {
            return Err(CorpusBuilderError::config(
                "filters.extensions must list at least one extension",
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.owner.trim().is_empty()
                || source.repo.trim().is_empty()
                || source.git_ref.trim().is_empty()
            {
                return Err(CorpusBuilderError::config(format!(
                    "source '{source}' needs a non-empty owner, repo, and ref"
                )));
            }
            if !seen.insert(source) {
                return Err(CorpusBuilderError::config(format!(
                    "source '{source}' is listed more than once"
                )));
            }
        }

        Ok(())
    }

    /// Read the provider token from the configured env var, if set and non-empty.
    pub fn provider_token(&self) -> Option<String> {
        std::env::var(&self.provider.token_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// A config with one example source, written by `config init`.
    pub fn example() -> Self {
        Self {
            sources: vec![SourceSpec::new("rust-lang", "book", "src", "main")],
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.corpusbuilder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CorpusBuilderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Resolve which config file to read, if any.
///
/// An explicit path must exist. Otherwise the working directory is tried
/// before the user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(CorpusBuilderError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }

    let user = config_dir()?.join(CONFIG_FILE_NAME);
    if user.exists() {
        return Ok(Some(user));
    }

    Ok(None)
}

/// Load and validate the application config. Returns defaults if no file is found.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config = match resolve_config_path(explicit)? {
        Some(path) => load_config_from(&path)?,
        None => {
            tracing::debug!("config file not found, using defaults");
            AppConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path (no validation).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CorpusBuilderError::io(path, e))?;

    let config = toml::from_str(&content).map_err(|e| {
        CorpusBuilderError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Write an example config file to `path`. Refuses to overwrite.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(CorpusBuilderError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CorpusBuilderError::io(parent, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::example())
        .map_err(|e| CorpusBuilderError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| CorpusBuilderError::io(path, e))?;
    tracing::info!(path = %path.display(), "created example config file");

    Ok(path.to_path_buf())
}
