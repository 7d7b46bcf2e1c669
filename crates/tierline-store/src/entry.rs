//! Cache entries and the store contract

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// A cached dispatch result keyed by request fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    /// Backend tier that produced the payload
    pub backend: String,
    /// Resources attached to the producing dispatch
    #[serde(default)]
    pub resources: Vec<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: Vec<u8>,
        backend: impl Into<String>,
        resources: Vec<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            created_at: now,
            expires_at: now + ttl,
            hit_count: 0,
            backend: backend.into(),
            resources,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn references(&self, resource_id: &str) -> bool {
        self.resources.iter().any(|r| r == resource_id)
    }
}

/// Durable map from fingerprint to [`CacheEntry`].
///
/// `put` replaces any entry under the same key as a whole, so a reader sees
/// either the old entry or the new one.
pub trait CacheStore: Send + Sync {
    /// `Err(StoreError::Corrupt)` when the stored row cannot be decoded
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Returns whether an entry was removed
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    fn record_hit(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Every decodable entry; undecodable ones are skipped
    fn entries(&self) -> Result<Vec<CacheEntry>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            "bug fix login",
            b"ok".to_vec(),
            "tier0",
            vec![],
            Duration::seconds(300),
            now,
        );
        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::seconds(299)));
        assert!(entry.is_expired(now + Duration::seconds(300)));
    }

    #[test]
    fn test_references() {
        let entry = CacheEntry::new(
            "k",
            vec![],
            "tier1",
            vec!["src/a.rs".to_string()],
            Duration::seconds(1),
            Utc::now(),
        );
        assert!(entry.references("src/a.rs"));
        assert!(!entry.references("src/b.rs"));
    }
}
