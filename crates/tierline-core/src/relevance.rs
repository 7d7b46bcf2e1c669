//! Relevance tiering engine
//!
//! Every resource carries a score in `[0, 1]`. Accesses boost it, every
//! tick without an access decays it, and the tier is derived from the score.
//! Decay is applied lazily: each record remembers the tick it was last
//! brought up to date, so reads and the background sweeper materialize
//! exactly the pending ticks instead of rewriting every record per request.

use crate::config::TieringConfig;
use crate::types::{RelevanceRecord, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

#[derive(Debug)]
struct Slot {
    score: f64,
    access_count: u64,
    last_access: DateTime<Utc>,
    /// Ticks before this one are already folded into `score`
    synced_tick: u64,
    stale: bool,
}

impl Slot {
    fn materialize(&mut self, now_tick: u64, config: &TieringConfig) {
        if now_tick <= self.synced_tick {
            return;
        }
        let elapsed = (now_tick - self.synced_tick).min(i32::MAX as u64) as i32;
        self.score *= config.decay_factor.powi(elapsed);
        if self.score < config.score_floor {
            self.score = 0.0;
        }
        self.synced_tick = now_tick;
    }

    fn record(&self, resource_id: &str, config: &TieringConfig) -> RelevanceRecord {
        RelevanceRecord {
            resource_id: resource_id.to_string(),
            score: self.score,
            tier: config.tier(self.score),
            last_access: self.last_access,
            access_count: self.access_count,
        }
    }
}

/// Number of records per tier, plus those decayed to the floor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub evictable: usize,
}

#[derive(Debug)]
pub struct RelevanceEngine {
    config: TieringConfig,
    slots: RwLock<BTreeMap<String, Mutex<Slot>>>,
    tick: AtomicU64,
    sweep_cursor: Mutex<Option<String>>,
}

impl RelevanceEngine {
    pub fn new(config: TieringConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(BTreeMap::new()),
            tick: AtomicU64::new(0),
            sweep_cursor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TieringConfig {
        &self.config
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Record an access. Creates the record at the WARM midpoint on first
    /// sight, otherwise boosts the score. The access shields the record
    /// from the decay of the tick in progress.
    pub fn access(&self, resource_id: &str, now: DateTime<Utc>) -> RelevanceRecord {
        let tick = self.current_tick();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(resource_id) {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                self.touch(&mut slot, tick, now);
                return slot.record(resource_id, &self.config);
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(resource_id.to_string()).or_insert_with(|| {
            tracing::debug!(resource = resource_id, "new relevance record");
            Mutex::new(Slot {
                score: self.config.initial_score(),
                access_count: 0,
                last_access: now,
                synced_tick: tick + 1,
                stale: false,
            })
        });
        let slot = slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if slot.access_count == 0 {
            slot.access_count = 1;
        } else {
            // Lost the insert race to another accessor
            self.touch(slot, tick, now);
        }
        slot.record(resource_id, &self.config)
    }

    fn touch(&self, slot: &mut Slot, tick: u64, now: DateTime<Utc>) {
        slot.materialize(tick, &self.config);
        if slot.stale {
            slot.score = self.config.initial_score();
            slot.stale = false;
        } else {
            slot.score = (slot.score + self.config.access_boost).min(1.0);
        }
        slot.access_count += 1;
        slot.last_access = now;
        slot.synced_tick = slot.synced_tick.max(tick + 1);
    }

    /// Finish the current tick. Returns the new tick number.
    pub fn tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self, resource_id: &str) -> Option<RelevanceRecord> {
        let tick = self.current_tick();
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(resource_id)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.materialize(tick, &self.config);
        Some(slot.record(resource_id, &self.config))
    }

    /// Mark a record stale so its next access starts over at the midpoint.
    /// Returns whether the record exists.
    pub fn invalidate(&self, resource_id: &str) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match slots.get(resource_id) {
            Some(slot) => {
                slot.lock().unwrap_or_else(PoisonError::into_inner).stale = true;
                true
            }
            None => false,
        }
    }

    pub fn is_stale(&self, resource_id: &str) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(resource_id)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).stale)
            .unwrap_or(false)
    }

    /// Bring up to `batch` records up to date, continuing where the previous
    /// sweep stopped and wrapping around at the end. Locks one record at a
    /// time. Returns the number of records visited.
    pub fn sweep(&self, batch: usize) -> usize {
        let tick = self.current_tick();
        let mut cursor = self
            .sweep_cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);

        let lower = match cursor.as_deref() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let mut visited = 0;
        let mut last = None;
        for (id, slot) in slots
            .range::<str, _>((lower, Bound::Unbounded))
            .take(batch)
        {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .materialize(tick, &self.config);
            visited += 1;
            last = Some(id.clone());
        }

        *cursor = if visited < batch { None } else { last };
        visited
    }

    /// All records, up to date, ordered by id
    pub fn snapshot(&self) -> Vec<RelevanceRecord> {
        let tick = self.current_tick();
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(id, slot)| {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                slot.materialize(tick, &self.config);
                slot.record(id, &self.config)
            })
            .collect()
    }

    /// Load persisted records. Tiers are recomputed from the score; the
    /// stored tier is ignored.
    pub fn restore(&self, records: impl IntoIterator<Item = RelevanceRecord>) -> usize {
        let tick = self.current_tick();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut restored = 0;
        for record in records {
            let score = record.score.clamp(0.0, 1.0);
            slots.insert(
                record.resource_id,
                Mutex::new(Slot {
                    score: if score < self.config.score_floor { 0.0 } else { score },
                    access_count: record.access_count,
                    last_access: record.last_access,
                    synced_tick: tick,
                    stale: false,
                }),
            );
            restored += 1;
        }
        restored
    }

    pub fn tier_counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for record in self.snapshot() {
            match record.tier {
                Tier::Hot => counts.hot += 1,
                Tier::Warm => counts.warm += 1,
                Tier::Cold => counts.cold += 1,
            }
            if record.score == 0.0 {
                counts.evictable += 1;
            }
        }
        counts
    }

    /// Resources whose score decayed to the floor
    pub fn evictable(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.score == 0.0)
            .map(|r| r.resource_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RelevanceEngine {
        RelevanceEngine::new(TieringConfig::default())
    }

    #[test]
    fn test_first_access_at_midpoint() {
        let engine = engine();
        let record = engine.access("src/lib.rs", Utc::now());
        assert!((record.score - 0.525).abs() < 1e-9);
        assert_eq!(record.tier, Tier::Warm);
        assert_eq!(record.access_count, 1);
    }

    #[test]
    fn test_repeat_access_boosts_and_caps() {
        let engine = engine();
        engine.access("a", Utc::now());
        let second = engine.access("a", Utc::now());
        assert!((second.score - 0.825).abs() < 1e-9);
        assert_eq!(second.tier, Tier::Hot);

        let third = engine.access("a", Utc::now());
        assert_eq!(third.score, 1.0);
        assert_eq!(third.access_count, 3);
    }

    #[test]
    fn test_tick_spares_records_accessed_during_it() {
        let engine = engine();
        engine.access("a", Utc::now());
        engine.tick();
        let record = engine.get("a").unwrap();
        assert!((record.score - 0.525).abs() < 1e-9);

        engine.tick();
        let record = engine.get("a").unwrap();
        assert!((record.score - 0.525 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_decay_is_exact_across_reads_and_sweeps() {
        let a = engine();
        let b = engine();
        a.access("x", Utc::now());
        b.access("x", Utc::now());
        for i in 0..7 {
            a.tick();
            b.tick();
            if i % 2 == 0 {
                a.sweep(16);
            }
        }
        let sa = a.get("x").unwrap().score;
        let sb = b.get("x").unwrap().score;
        assert!((sa - sb).abs() < 1e-12);
        assert!((sa - 0.525 * 0.85f64.powi(6)).abs() < 1e-9);
    }

    #[test]
    fn test_floor_snaps_to_zero() {
        let engine = engine();
        engine.access("x", Utc::now());
        for _ in 0..40 {
            engine.tick();
        }
        let record = engine.get("x").unwrap();
        assert_eq!(record.score, 0.0);
        assert_eq!(record.tier, Tier::Cold);
        assert_eq!(engine.evictable(), vec!["x".to_string()]);
        assert_eq!(engine.tier_counts().evictable, 1);
    }

    #[test]
    fn test_invalidate_resets_on_next_access() {
        let engine = engine();
        engine.access("x", Utc::now());
        engine.access("x", Utc::now());
        assert!(engine.invalidate("x"));
        assert!(engine.invalidate("x"));
        assert!(engine.is_stale("x"));

        let record = engine.access("x", Utc::now());
        assert!((record.score - 0.525).abs() < 1e-9);
        assert!(!engine.is_stale("x"));
        assert!(!engine.invalidate("never-seen"));
    }

    #[test]
    fn test_sweep_walks_in_batches_and_wraps() {
        let engine = engine();
        for i in 0..5 {
            engine.access(&format!("r{}", i), Utc::now());
        }
        assert_eq!(engine.sweep(2), 2);
        assert_eq!(engine.sweep(2), 2);
        assert_eq!(engine.sweep(2), 1);
        assert_eq!(engine.sweep(2), 2);
    }

    #[test]
    fn test_restore_recomputes_tier() {
        let engine = engine();
        let restored = engine.restore(vec![RelevanceRecord {
            resource_id: "docs/a.md".to_string(),
            score: 0.9,
            tier: Tier::Cold,
            last_access: Utc::now(),
            access_count: 4,
        }]);
        assert_eq!(restored, 1);
        let record = engine.get("docs/a.md").unwrap();
        assert_eq!(record.tier, Tier::Hot);
        assert_eq!(record.access_count, 4);
    }

    #[test]
    fn test_concurrent_first_access_counts_every_access() {
        let engine = std::sync::Arc::new(engine());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = std::sync::Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.access("shared", Utc::now());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.get("shared").unwrap().access_count, 8);
        assert_eq!(engine.len(), 1);
    }
}
