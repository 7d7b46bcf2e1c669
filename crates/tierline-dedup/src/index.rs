//! Inverted token index over the cache store
//!
//! The store holds the entries; this index only knows which fingerprints
//! contain which tokens and when each entry expires, so lookups score just
//! the fingerprints sharing at least one token with the request.

use crate::normalize::{fingerprint, jaccard, normalize};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tierline_core::DedupConfig;
use tierline_store::{CacheEntry, CacheStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Served without re-validation
    Hard,
    /// Served, with re-validation scheduled
    Soft,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupMatch {
    pub fingerprint: String,
    pub similarity: f64,
    pub kind: MatchKind,
    pub entry: CacheEntry,
}

#[derive(Debug, Default)]
struct IndexState {
    postings: HashMap<String, HashSet<String>>,
    expiries: HashMap<String, DateTime<Utc>>,
}

impl IndexState {
    fn add(&mut self, fingerprint: &str, expires_at: DateTime<Utc>) {
        for token in fingerprint.split(' ') {
            self.postings
                .entry(token.to_string())
                .or_default()
                .insert(fingerprint.to_string());
        }
        self.expiries.insert(fingerprint.to_string(), expires_at);
    }

    fn forget(&mut self, fingerprint: &str) {
        for token in fingerprint.split(' ') {
            if let Some(set) = self.postings.get_mut(token) {
                set.remove(fingerprint);
                if set.is_empty() {
                    self.postings.remove(token);
                }
            }
        }
        self.expiries.remove(fingerprint);
    }

    /// The indexed entry closest to expiry
    fn next_to_expire(&self) -> Option<String> {
        self.expiries
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(fp, _)| fp.clone())
    }
}

pub struct SemanticDedupIndex {
    store: Arc<dyn CacheStore>,
    config: DedupConfig,
    state: RwLock<IndexState>,
}

impl std::fmt::Debug for SemanticDedupIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticDedupIndex")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

impl SemanticDedupIndex {
    pub fn new(store: Arc<dyn CacheStore>, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Number of indexed fingerprints
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .expiries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, text: &str) -> Option<DedupMatch> {
        self.lookup_at(text, Utc::now())
    }

    /// Best live entry at or above the soft threshold. Expired and corrupt
    /// entries met along the way are removed and never served.
    pub fn lookup_at(&self, text: &str, now: DateTime<Utc>) -> Option<DedupMatch> {
        let tokens = normalize(text);
        if tokens.is_empty() {
            return None;
        }

        let mut candidates: Vec<(String, f64)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let mut seen = HashSet::new();
            for token in &tokens {
                if let Some(fps) = state.postings.get(token) {
                    seen.extend(fps.iter().cloned());
                }
            }
            seen.into_iter()
                .map(|fp| {
                    let other: Vec<&str> = fp.split(' ').collect();
                    let similarity = jaccard(&tokens, &other);
                    (fp, similarity)
                })
                .filter(|(_, similarity)| *similarity >= self.config.low_threshold)
                .collect()
        };
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        for (fp, similarity) in candidates {
            match self.store.get(&fp) {
                Ok(Some(entry)) if entry.is_expired(now) => {
                    tracing::debug!(fingerprint = %fp, "dropping expired cache entry");
                    self.discard(&fp);
                }
                Ok(Some(entry)) => {
                    if let Err(e) = self.store.record_hit(&fp) {
                        tracing::warn!(
                            fingerprint = %fp,
                            error = %e,
                            "failed to record cache hit"
                        );
                    }
                    let kind = if similarity >= self.config.high_threshold {
                        MatchKind::Hard
                    } else {
                        MatchKind::Soft
                    };
                    tracing::debug!(fingerprint = %fp, similarity, ?kind, "dedup hit");
                    return Some(DedupMatch {
                        fingerprint: fp,
                        similarity,
                        kind,
                        entry,
                    });
                }
                Ok(None) => self.forget(&fp),
                Err(StoreError::Corrupt { key, reason }) => {
                    tracing::warn!(
                        fingerprint = %key,
                        reason = %reason,
                        "discarding corrupt cache entry"
                    );
                    self.discard(&fp);
                }
                Err(e) => {
                    tracing::warn!(
                        fingerprint = %fp,
                        error = %e,
                        "cache read failed, treating as miss"
                    );
                }
            }
        }
        None
    }

    pub fn insert(
        &self,
        text: &str,
        payload: Vec<u8>,
        backend: &str,
        resources: Vec<String>,
    ) -> Result<Option<String>, StoreError> {
        self.insert_at(text, payload, backend, resources, Utc::now())
    }

    /// Cache `payload` under the fingerprint of `text`, superseding any
    /// entry with the same fingerprint. Blank text is never cached.
    /// Returns the fingerprint used.
    pub fn insert_at(
        &self,
        text: &str,
        payload: Vec<u8>,
        backend: &str,
        resources: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let Some(fp) = fingerprint(&normalize(text)) else {
            return Ok(None);
        };

        let ttl = self.config.ttl();
        let entry = CacheEntry::new(fp.clone(), payload, backend, resources, ttl, now);
        let expires_at = entry.expires_at;
        self.store.put(entry)?;

        let evicted = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.add(&fp, expires_at);
            let mut evicted = Vec::new();
            while state.expiries.len() > self.config.max_entries.max(1) {
                match state.next_to_expire() {
                    Some(victim) => {
                        state.forget(&victim);
                        evicted.push(victim);
                    }
                    None => break,
                }
            }
            evicted
        };
        for victim in evicted {
            tracing::debug!(fingerprint = %victim, "evicting cache entry at capacity");
            if let Err(e) = self.store.remove(&victim) {
                tracing::warn!(fingerprint = %victim, error = %e, "failed to evict cache entry");
            }
        }

        Ok(Some(fp))
    }

    /// Remove every entry produced with `resource_id` attached. Returns the
    /// number removed.
    pub fn invalidate_resource(&self, resource_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.store.entries()? {
            if entry.references(resource_id) {
                self.forget(&entry.key);
                if self.store.remove(&entry.key)? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::debug!(resource = resource_id, removed, "invalidated cache entries");
        }
        Ok(removed)
    }

    /// Drop expired entries. Returns the number removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .expiries
                .iter()
                .filter(|(_, expires_at)| now >= **expires_at)
                .map(|(fp, _)| fp.clone())
                .collect()
        };
        for fp in &expired {
            self.discard(fp);
        }
        expired.len()
    }

    /// Reload the token index from the store. Expired and corrupt rows are
    /// removed. Returns the number of live entries indexed.
    pub fn rebuild(&self) -> Result<usize, StoreError> {
        self.rebuild_at(Utc::now())
    }

    pub fn rebuild_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut fresh = IndexState::default();
        for key in self.store.keys()? {
            match self.store.get(&key) {
                Ok(Some(entry)) if !entry.is_expired(now) => fresh.add(&key, entry.expires_at),
                Ok(Some(_)) => {
                    self.store.remove(&key)?;
                }
                Ok(None) => {}
                Err(StoreError::Corrupt { reason, .. }) => {
                    tracing::warn!(
                        fingerprint = %key,
                        reason = %reason,
                        "discarding corrupt cache entry"
                    );
                    self.store.remove(&key)?;
                }
                Err(e) => return Err(e),
            }
        }
        let count = fresh.expiries.len();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::debug!(entries = count, "rebuilt dedup index");
        Ok(count)
    }

    fn forget(&self, fp: &str) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .forget(fp);
    }

    fn discard(&self, fp: &str) {
        self.forget(fp);
        if let Err(e) = self.store.remove(fp) {
            tracing::warn!(fingerprint = %fp, error = %e, "failed to remove cache entry");
        }
    }
}
