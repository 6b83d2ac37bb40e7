//! Cache keys and fingerprints for per-partition statistic results.
pub mod fingerprint;
pub mod key;

pub use fingerprint::{Blake3Fingerprint, FingerprintStrategy, Fingerprinter, FixedFingerprint};
pub use key::{CacheEntry, CacheIndex, CacheKey, PartitionKey, CACHE_FORMAT_VERSION};
