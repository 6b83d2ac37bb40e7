//! Cache keys, partition keys and the per-partition cache index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Version prefix of every key written by this planner.
pub const CACHE_FORMAT_VERSION: &str = "__v1__";

/// `{version}{StageName}[{stat}]-{hash}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(version: &str, stage_label: &str, hash: &str) -> Self {
        Self(format!("{}{}-{}", version, stage_label, hash))
    }

    /// Wraps a key read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self { Self(raw.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn has_version(&self, version: &str) -> bool { self.0.starts_with(version) }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Identifies one data partition; ordering defines the analysis index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self { Self(key.to_string()) }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// An encoded accumulator. The planner never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry(Arc<[u8]>);

impl CacheEntry {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self { Self(bytes.into()) }
    pub fn bytes(&self) -> &[u8] { &self.0 }
}

pub type CacheIndex = BTreeMap<PartitionKey, BTreeMap<CacheKey, CacheEntry>>;

/// Looks a key up, treating entries of another format version as absent.
pub fn lookup<'a>(
    index: &'a CacheIndex,
    partition: &PartitionKey,
    key: &CacheKey,
    version: &str,
) -> Option<&'a CacheEntry> {
    if !key.has_version(version) {
        return None;
    }
    index.get(partition)?.get(key)
}

/// Number of entries whose key carries a different format version.
pub fn count_stale_entries(index: &CacheIndex, version: &str) -> usize {
    index
        .values()
        .flat_map(|entries| entries.keys())
        .filter(|k| !k.has_version(version))
        .count()
}
