//! Enumeration and retrieval of source documents.
//!
//! This crate provides:
//! - [`retry`]: bounded retry with exponential backoff around any host call
//! - [`enumerate`]: markdown file enumeration for a [`SourceSpec`](corpusbuilder_shared::SourceSpec)
//! - [`fetch`]: raw content retrieval with content hashing

pub mod enumerate;
pub mod fetch;
pub mod retry;

pub use enumerate::{EnumerateFilter, enumerate_markdown};
pub use fetch::{FetchedFile, content_hash, fetch_document};
pub use retry::{RetryFailure, RetryPolicy, with_retry};
