use serde::{Serialize, Serializer};
use std::borrow::Cow;
use tierline_core::{CacheHit, Classification, ContextSummary, TierCounts};

/// Result of a routed request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResponse {
    pub request_id: String,
    #[serde(serialize_with = "lossy_text")]
    pub payload: Vec<u8>,
    /// Tier (or fast-path handler) that produced the payload
    pub backend_used: String,
    pub cache_hit: CacheHit,
    /// Jaccard similarity of the cache match, if served from cache
    pub similarity: Option<f64>,
    /// Backend tiers called for this request, in order
    pub tiers_attempted: Vec<String>,
    pub classification: Classification,
    pub context: ContextSummary,
    /// Served by the last-resort tier because every eligible tier was unhealthy
    pub degraded: bool,
}

impl RouteResponse {
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

fn lossy_text<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    /// Whether a relevance record existed and was marked stale
    pub relevance_marked: bool,
    pub cache_entries_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStatus {
    pub tick: u64,
    pub resources: usize,
    pub tiers: TierCounts,
    pub evictable: Vec<String>,
    pub cache_entries: usize,
}
