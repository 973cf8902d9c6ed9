//! Shared types, error model, and configuration for CorpusBuilder.
//!
//! This crate is the foundation depended on by all other CorpusBuilder crates.
//! It provides:
//! - [`CorpusBuilderError`]: the unified error type
//! - Domain types ([`SourceSpec`], [`DocumentRecord`], [`NewDocument`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, FiltersConfig, ProviderConfig, ProviderKind, config_dir,
    init_config, load_config, load_config_from, resolve_config_path,
};
pub use error::{CorpusBuilderError, ErrorKind, Result};
pub use types::{DocumentRecord, NewDocument, SourceSpec};
