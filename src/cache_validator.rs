use hex;
use sha2::{Digest, Sha256};

/// Integrity-validated entries for the search-response cache.
///
/// Raw search API responses are cached as JSON strings with a SHA-256
/// checksum computed at insert time and re-checked on every read. A
/// corrupted or tampered entry fails validation and the caller falls back
/// to a fresh fetch, so a bad cache row can never feed the pipeline.

/// Wrapper for cached data with integrity validation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// The cached payload (raw JSON response body)
    pub data: String,
    /// SHA-256 checksum of the payload (hex encoded)
    pub checksum: String,
}

impl ValidatedCacheEntry {
    /// Creates a new entry with the checksum computed over the payload.
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    /// Computes SHA-256 checksum of the payload
    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum still matches the payload.
    pub fn is_valid(&self) -> bool {
        let computed = Self::compute_checksum(&self.data);
        computed == self.checksum
    }

    /// Serializes the entry for storage in the cache.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserializes and validates a cache entry.
    ///
    /// Returns `Some(payload)` when the entry parses and the checksum
    /// matches; `None` for corrupted or invalid JSON, in which case the
    /// caller should refetch from the live source.
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            // Checksum mismatch - entry corrupted
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}
