//! Content cache with content-derived keys and explicit retention

use super::sections::{cap_range, keyword_window, SectionIndex};
use super::CacheError;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Bytes returned on each side of a keyword match
pub const DEFAULT_SECTION_WINDOW: usize = 500;

/// Opaque content-derived cache key (hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What kind of artifact an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// An incoming document, e.g. a fetched page or file
    Document,
    /// Messages removed from the live history by compaction
    CompactedHistory,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::CompactedHistory => "compacted_history",
        }
    }
}

/// Metadata that takes part in key derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub source: String,
    pub kind: ArtifactKind,
}

impl CacheMetadata {
    pub fn document(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: ArtifactKind::Document,
        }
    }

    pub fn compacted_history(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: ArtifactKind::CompactedHistory,
        }
    }
}

/// Retention bounds; `None` disables a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
}

#[derive(Debug)]
struct CacheEntry {
    full_text: String,
    metadata: CacheMetadata,
    created_at: DateTime<Utc>,
    inserted_at: Instant,
    sections: SectionIndex,
}

/// Introspection data for one entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryStats {
    pub key: CacheKey,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub kind: ArtifactKind,
    pub tokens_estimated: usize,
    pub sections: Vec<String>,
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub total_bytes: usize,
}

/// Content-addressed artifact cache, safe to share across sessions
pub struct ContentCache {
    entries: DashMap<CacheKey, CacheEntry>,
    retention: RetentionPolicy,
    section_window: usize,
}

impl ContentCache {
    /// Create a new cache with the given retention policy
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            section_window: DEFAULT_SECTION_WINDOW,
        }
    }

    pub fn with_section_window(mut self, window: usize) -> Self {
        self.section_window = window;
        self
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Derive the key `content` would be stored under, without storing it
    pub fn derive_key(content: &str, metadata: &CacheMetadata) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(metadata.kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(metadata.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    /// Store `content`; identical content and metadata always map to one entry
    pub fn put(&self, content: &str, metadata: CacheMetadata) -> CacheKey {
        let key = Self::derive_key(content, &metadata);

        if let Some(existing) = self.entries.get(&key) {
            if !self.is_expired(existing.value()) {
                debug!("Cache put deduplicated: key={}", key);
                METRICS.record_cache_put(false);
                return key;
            }
        }

        self.make_room(&key);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if self.is_expired(occupied.get()) {
                    occupied.insert(Self::new_entry(content, metadata));
                    METRICS.record_cache_put(true);
                } else {
                    METRICS.record_cache_put(false);
                }
            }
            Entry::Vacant(vacant) => {
                debug!(
                    "Caching {} bytes from {} ({}): key={}",
                    content.len(),
                    metadata.source,
                    metadata.kind.as_str(),
                    key
                );
                vacant.insert(Self::new_entry(content, metadata));
                METRICS.record_cache_put(true);
            }
        }

        key
    }

    /// Retrieve stored content, optionally scoped to a section
    pub fn get(&self, key: &str, section: Option<&str>) -> Result<String, CacheError> {
        {
            let entry = match self.entries.get(key) {
                Some(entry) => entry,
                None => {
                    METRICS.record_cache_lookup(false);
                    return Err(CacheError::KeyNotFound(key.to_string()));
                }
            };

            if !self.is_expired(entry.value()) {
                METRICS.record_cache_lookup(true);
                return match section {
                    None => Ok(entry.full_text.clone()),
                    Some(section) => self.read_section(key, entry.value(), section),
                };
            }
        }

        // A concurrent put may have refreshed the entry since the guard dropped
        if self
            .entries
            .remove_if(key, |_, entry| self.is_expired(entry))
            .is_some()
        {
            debug!("Cache entry expired on read: key={}", key);
            METRICS.record_cache_evictions(1);
        }
        METRICS.record_cache_lookup(false);
        Err(CacheError::KeyNotFound(key.to_string()))
    }

    /// Size and age of a live entry
    pub fn stats(&self, key: &str) -> Result<EntryStats, CacheError> {
        self.entries
            .get(key)
            .filter(|entry| !self.is_expired(entry.value()))
            .map(|entry| Self::entry_stats(entry.key(), entry.value()))
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !self.is_expired(entry.value()))
            .unwrap_or(false)
    }

    /// Stats for every live entry, oldest first
    pub fn list(&self) -> Vec<EntryStats> {
        let mut items: Vec<EntryStats> = self
            .entries
            .iter()
            .filter(|entry| !self.is_expired(entry.value()))
            .map(|entry| Self::entry_stats(entry.key(), entry.value()))
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        items
    }

    pub fn summary(&self) -> CacheSummary {
        self.entries
            .iter()
            .filter(|entry| !self.is_expired(entry.value()))
            .fold(
                CacheSummary {
                    entries: 0,
                    total_bytes: 0,
                },
                |acc, entry| CacheSummary {
                    entries: acc.entries + 1,
                    total_bytes: acc.total_bytes + entry.full_text.len(),
                },
            )
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            info!("Purged {} expired cache entries", removed);
            METRICS.record_cache_evictions(removed);
        }
        removed
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn new_entry(content: &str, metadata: CacheMetadata) -> CacheEntry {
        CacheEntry {
            full_text: content.to_string(),
            metadata,
            created_at: Utc::now(),
            inserted_at: Instant::now(),
            sections: SectionIndex::build(content),
        }
    }

    fn entry_stats(key: &CacheKey, entry: &CacheEntry) -> EntryStats {
        EntryStats {
            key: key.clone(),
            size: entry.full_text.len(),
            created_at: entry.created_at,
            source: entry.metadata.source.clone(),
            kind: entry.metadata.kind,
            tokens_estimated: entry.full_text.len() / 4,
            sections: entry.sections.labels(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.retention
            .max_age
            .map(|max_age| entry.inserted_at.elapsed() >= max_age)
            .unwrap_or(false)
    }

    fn read_section(
        &self,
        key: &str,
        entry: &CacheEntry,
        section: &str,
    ) -> Result<String, CacheError> {
        let not_found = || CacheError::SectionNotFound {
            key: key.to_string(),
            section: section.to_string(),
        };

        let needle = section.trim();
        if needle.is_empty() {
            return Err(not_found());
        }

        let range = entry
            .sections
            .lookup(needle)
            .map(|range| cap_range(&entry.full_text, range, self.section_window * 2))
            .or_else(|| keyword_window(&entry.full_text, needle, self.section_window))
            .ok_or_else(not_found)?;

        Ok(entry.full_text[range].to_string())
    }

    /// Enforce the count bound before inserting `incoming`
    ///
    /// Eviction and the following insert are separate map operations, so
    /// concurrent puts of distinct keys may briefly leave the cache up to one
    /// entry per racing writer over `max_entries`. The next put trims it back.
    fn make_room(&self, incoming: &CacheKey) {
        let max_entries = match self.retention.max_entries {
            Some(max) => max,
            None => return,
        };

        if self.entries.len() >= max_entries {
            self.purge_expired();
        }

        while self.entries.len() >= max_entries.max(1) && !self.entries.contains_key(incoming) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(oldest) => {
                    debug!("Evicting oldest cache entry: key={}", oldest);
                    self.entries.remove(&oldest);
                    METRICS.record_cache_evictions(1);
                }
                None => break,
            }
        }
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
