//! Upstream source hosts: where documentation trees are listed and fetched from.
//!
//! This crate provides:
//! - [`SourceHost`]: the two-operation capability the pipeline depends on
//! - [`GitHubHost`]: GitHub REST contents API implementation
//! - [`LocalHost`]: directory mirror implementation (offline runs, tests)

pub mod github;
pub mod host;
pub mod local;

pub use github::GitHubHost;
pub use host::{SourceHost, build_host};
pub use local::LocalHost;
