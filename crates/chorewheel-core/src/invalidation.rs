//! # Cache Invalidation Keys
//!
//! Declarative description of which cached queries became stale.
//!
//! ## Key Scopes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Scope        Example           Meaning                                │
//! │  ──────────   ───────────────   ──────────────────────────────────     │
//! │  collection   chores            every list view of the resource        │
//! │  item         chore:7           the single-item query                  │
//! │  detail       choreDetails:7    the expanded detail query              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An [`InvalidationSet`] is computed per envelope and handed to the cache
//! invalidator; it is never stored.

use serde::Serialize;
use std::collections::BTreeSet;

/// One cache key to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "scope", content = "key", rename_all = "snake_case")]
pub enum CacheKey {
    Collection(String),
    Item(String),
    Detail(String),
}

impl CacheKey {
    /// The raw key string understood by the cache store.
    pub fn as_str(&self) -> &str {
        match self {
            CacheKey::Collection(k) | CacheKey::Item(k) | CacheKey::Detail(k) => k,
        }
    }

    /// Scope label, useful for logging.
    pub fn scope(&self) -> &'static str {
        match self {
            CacheKey::Collection(_) => "collection",
            CacheKey::Item(_) => "item",
            CacheKey::Detail(_) => "detail",
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated set of keys produced by one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InvalidationSet(BTreeSet<CacheKey>);

impl InvalidationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CacheKey) -> bool {
        self.0.insert(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.0.iter()
    }
}

impl FromIterator<CacheKey> for InvalidationSet {
    fn from_iter<I: IntoIterator<Item = CacheKey>>(iter: I) -> Self {
        InvalidationSet(iter.into_iter().collect())
    }
}

impl IntoIterator for InvalidationSet {
    type Item = CacheKey;
    type IntoIter = std::collections::btree_set::IntoIter<CacheKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a InvalidationSet {
    type Item = &'a CacheKey;
    type IntoIter = std::collections::btree_set::Iter<'a, CacheKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
