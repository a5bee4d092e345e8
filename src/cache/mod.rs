//! Content-addressed cache for full-size artifacts
//!
//! Stores documents and compacted-away history segments so that a short
//! summary can later be expanded by key, optionally scoped to one section.

pub mod sections;
pub mod store;

pub use sections::{cap_range, keyword_window, SectionIndex};
pub use store::{
    ArtifactKind, CacheKey, CacheMetadata, CacheSummary, ContentCache, EntryStats,
    RetentionPolicy, DEFAULT_SECTION_WINDOW,
};

use thiserror::Error;

/// Cache lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Cache key not found: {0}")]
    KeyNotFound(String),

    #[error("Section '{section}' not found in cache entry {key}")]
    SectionNotFound { key: String, section: String },
}
