//! Backend health with hysteresis
//!
//! A backend turns unhealthy after `failure_threshold` consecutive failed
//! dispatches and healthy again only after `recovery_probes` consecutive
//! successful probes. Lifetime counters are atomics; the transition check and
//! the rolling sample window sit behind one lock per backend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tierline_core::{BackendDescriptor, HealthConfig};
use tierline_telemetry::DispatchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTransition {
    BecameUnhealthy,
    Recovered,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    outcome: DispatchOutcome,
    latency_ms: u64,
    cost: f64,
}

/// Statistics over the rolling sample window of one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub tier_id: String,
    pub samples: usize,
    pub successes: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    /// Mean reported cost of successful samples, if any reported one
    pub mean_cost: Option<f64>,
}

/// Lifetime dispatch counters of one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub latency_total_ms: u64,
}

#[derive(Debug)]
struct BackendState {
    descriptor: BackendDescriptor,
    probe_streak: u32,
    window: VecDeque<Sample>,
}

#[derive(Debug)]
struct BackendEntry {
    state: Mutex<BackendState>,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    latency_total_ms: AtomicU64,
}

impl BackendEntry {
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    backends: BTreeMap<String, BackendEntry>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, descriptors: Vec<BackendDescriptor>) -> Self {
        let window_size = config.window_size.max(1);
        let backends = descriptors
            .into_iter()
            .map(|descriptor| {
                (
                    descriptor.tier_id.clone(),
                    BackendEntry {
                        state: Mutex::new(BackendState {
                            descriptor,
                            probe_streak: 0,
                            window: VecDeque::with_capacity(window_size),
                        }),
                        successes: AtomicU64::new(0),
                        failures: AtomicU64::new(0),
                        timeouts: AtomicU64::new(0),
                        latency_total_ms: AtomicU64::new(0),
                    },
                )
            })
            .collect();
        Self { config, backends }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn contains(&self, tier_id: &str) -> bool {
        self.backends.contains_key(tier_id)
    }

    pub fn tier_ids(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Record one dispatch outcome. A success on an unhealthy backend counts
    /// as a successful probe. Unknown tiers are ignored.
    pub fn record(
        &self,
        tier_id: &str,
        outcome: DispatchOutcome,
        latency_ms: u64,
        cost: f64,
    ) -> Option<HealthTransition> {
        let Some(entry) = self.backends.get(tier_id) else {
            tracing::debug!(tier = tier_id, "outcome for unknown backend ignored");
            return None;
        };

        match outcome {
            DispatchOutcome::Success => entry.successes.fetch_add(1, Ordering::Relaxed),
            DispatchOutcome::Failure => entry.failures.fetch_add(1, Ordering::Relaxed),
            DispatchOutcome::Timeout => entry.timeouts.fetch_add(1, Ordering::Relaxed),
        };
        entry
            .latency_total_ms
            .fetch_add(latency_ms, Ordering::Relaxed);

        let mut state = entry.lock();
        state.window.push_back(Sample {
            outcome,
            latency_ms,
            cost,
        });
        while state.window.len() > self.config.window_size.max(1) {
            state.window.pop_front();
        }

        if outcome.is_success() {
            if state.descriptor.is_healthy {
                state.descriptor.consecutive_failures = 0;
                None
            } else {
                self.probe_succeeded(&mut state)
            }
        } else {
            state.descriptor.consecutive_failures += 1;
            state.probe_streak = 0;
            if state.descriptor.is_healthy
                && state.descriptor.consecutive_failures >= self.config.failure_threshold
            {
                state.descriptor.is_healthy = false;
                tracing::warn!(
                    tier = tier_id,
                    failures = state.descriptor.consecutive_failures,
                    "backend marked unhealthy"
                );
                Some(HealthTransition::BecameUnhealthy)
            } else {
                None
            }
        }
    }

    /// Record a probe result for a backend
    pub fn record_probe(
        &self,
        tier_id: &str,
        ok: bool,
        now: DateTime<Utc>,
    ) -> Option<HealthTransition> {
        let entry = self.backends.get(tier_id)?;
        let mut state = entry.lock();
        state.descriptor.last_probe = Some(now);
        if ok {
            self.probe_succeeded(&mut state)
        } else {
            state.probe_streak = 0;
            tracing::debug!(tier = tier_id, "probe failed");
            None
        }
    }

    fn probe_succeeded(&self, state: &mut BackendState) -> Option<HealthTransition> {
        if state.descriptor.is_healthy {
            return None;
        }
        state.probe_streak += 1;
        if state.probe_streak < self.config.recovery_probes {
            return None;
        }
        state.descriptor.is_healthy = true;
        state.descriptor.consecutive_failures = 0;
        state.probe_streak = 0;
        tracing::info!(tier = %state.descriptor.tier_id, "backend recovered");
        Some(HealthTransition::Recovered)
    }

    /// Unhealthy backends whose last probe is older than the probe interval
    pub fn due_for_probe(&self, now: DateTime<Utc>) -> Vec<String> {
        self.backends
            .iter()
            .filter(|(_, entry)| self.is_due(&entry.lock().descriptor, now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Like [`due_for_probe`](Self::due_for_probe), but stamps `last_probe`
    /// so concurrent callers do not probe the same backend twice.
    pub fn claim_due_probes(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut claimed = Vec::new();
        for (id, entry) in &self.backends {
            let mut state = entry.lock();
            if self.is_due(&state.descriptor, now) {
                state.descriptor.last_probe = Some(now);
                claimed.push(id.clone());
            }
        }
        claimed
    }

    fn is_due(&self, descriptor: &BackendDescriptor, now: DateTime<Utc>) -> bool {
        !descriptor.is_healthy
            && descriptor
                .last_probe
                .map_or(true, |last| now - last >= self.config.probe_interval())
    }

    pub fn descriptor(&self, tier_id: &str) -> Option<BackendDescriptor> {
        self.backends
            .get(tier_id)
            .map(|entry| entry.lock().descriptor.clone())
    }

    /// Every descriptor, ordered by tier id
    pub fn snapshot(&self) -> Vec<BackendDescriptor> {
        self.backends
            .values()
            .map(|entry| entry.lock().descriptor.clone())
            .collect()
    }

    pub fn stats(&self, tier_id: &str) -> Option<WindowStats> {
        let entry = self.backends.get(tier_id)?;
        let state = entry.lock();
        let window = &state.window;

        let samples = window.len();
        let successes = window.iter().filter(|s| s.outcome.is_success()).count();
        let timeouts = window
            .iter()
            .filter(|s| s.outcome == DispatchOutcome::Timeout)
            .count();
        let failures = samples - successes - timeouts;
        let mean_latency_ms = if samples == 0 {
            0.0
        } else {
            window.iter().map(|s| s.latency_ms as f64).sum::<f64>() / samples as f64
        };
        let costs: Vec<f64> = window
            .iter()
            .filter(|s| s.outcome.is_success() && s.cost > 0.0)
            .map(|s| s.cost)
            .collect();
        let mean_cost = if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum::<f64>() / costs.len() as f64)
        };

        Some(WindowStats {
            tier_id: tier_id.to_string(),
            samples,
            successes,
            failures,
            timeouts,
            success_rate: if samples == 0 {
                0.0
            } else {
                successes as f64 / samples as f64
            },
            mean_latency_ms,
            mean_cost,
        })
    }

    pub fn all_stats(&self) -> Vec<WindowStats> {
        self.backends
            .keys()
            .filter_map(|id| self.stats(id))
            .collect()
    }

    pub fn counters(&self, tier_id: &str) -> Option<Counters> {
        let entry = self.backends.get(tier_id)?;
        Some(Counters {
            successes: entry.successes.load(Ordering::Relaxed),
            failures: entry.failures.load(Ordering::Relaxed),
            timeouts: entry.timeouts.load(Ordering::Relaxed),
            latency_total_ms: entry.latency_total_ms.load(Ordering::Relaxed),
        })
    }

    /// Set the effective cost weight. Returns the previous weight.
    pub fn set_cost_weight(&self, tier_id: &str, weight: f64) -> Option<f64> {
        let entry = self.backends.get(tier_id)?;
        let mut state = entry.lock();
        Some(std::mem::replace(&mut state.descriptor.cost_weight, weight))
    }

    /// Apply persisted health state to configured backends. Capability
    /// ceilings stay as configured; a persisted cost weight is kept only if
    /// the configured base weight is unchanged. Returns the number restored.
    pub fn restore(&self, persisted: &[BackendDescriptor]) -> usize {
        let mut restored = 0;
        for saved in persisted {
            let Some(entry) = self.backends.get(&saved.tier_id) else {
                continue;
            };
            let mut state = entry.lock();
            let current = &mut state.descriptor;
            current.is_healthy = saved.is_healthy;
            current.consecutive_failures = saved.consecutive_failures;
            current.last_probe = saved.last_probe;
            if (saved.base_cost_weight - current.base_cost_weight).abs() < f64::EPSILON {
                current.cost_weight = saved.cost_weight;
            }
            restored += 1;
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(
            HealthConfig::default(),
            vec![
                BackendDescriptor::new("tier0", 1.0, 3),
                BackendDescriptor::new("tier1", 5.0, 7),
            ],
        )
    }

    #[test]
    fn test_unhealthy_after_threshold() {
        let monitor = monitor();
        for _ in 0..4 {
            assert_eq!(monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0), None);
        }
        assert!(monitor.descriptor("tier0").unwrap().is_healthy);

        let transition = monitor.record("tier0", DispatchOutcome::Timeout, 10, 0.0);
        assert_eq!(transition, Some(HealthTransition::BecameUnhealthy));
        let d = monitor.descriptor("tier0").unwrap();
        assert!(!d.is_healthy);
        assert_eq!(d.consecutive_failures, 5);

        assert_eq!(monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0), None);
    }

    #[test]
    fn test_success_resets_streak() {
        let monitor = monitor();
        for _ in 0..4 {
            monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0);
        }
        monitor.record("tier0", DispatchOutcome::Success, 10, 0.0);
        for _ in 0..4 {
            monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0);
        }
        assert!(monitor.descriptor("tier0").unwrap().is_healthy);
    }

    #[test]
    fn test_recovery_needs_consecutive_probes() {
        let monitor = monitor();
        for _ in 0..5 {
            monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0);
        }
        let now = Utc::now();
        assert_eq!(monitor.record_probe("tier0", true, now), None);
        assert_eq!(monitor.record_probe("tier0", false, now), None);
        assert_eq!(monitor.record_probe("tier0", true, now), None);
        assert_eq!(
            monitor.record_probe("tier0", true, now),
            Some(HealthTransition::Recovered)
        );
        let d = monitor.descriptor("tier0").unwrap();
        assert!(d.is_healthy);
        assert_eq!(d.consecutive_failures, 0);
    }

    #[test]
    fn test_dispatch_success_counts_as_probe() {
        let monitor = monitor();
        for _ in 0..5 {
            monitor.record("tier1", DispatchOutcome::Failure, 10, 0.0);
        }
        assert_eq!(monitor.record("tier1", DispatchOutcome::Success, 10, 0.0), None);
        assert_eq!(
            monitor.record("tier1", DispatchOutcome::Success, 10, 0.0),
            Some(HealthTransition::Recovered)
        );
    }

    #[test]
    fn test_probe_schedule() {
        let monitor = monitor();
        let now = Utc::now();
        assert!(monitor.due_for_probe(now).is_empty());

        for _ in 0..5 {
            monitor.record("tier0", DispatchOutcome::Failure, 10, 0.0);
        }
        assert_eq!(monitor.due_for_probe(now), vec!["tier0"]);
        assert_eq!(monitor.claim_due_probes(now), vec!["tier0"]);
        assert!(monitor.claim_due_probes(now).is_empty());
        assert!(monitor.due_for_probe(now + Duration::seconds(10)).is_empty());
        assert_eq!(monitor.due_for_probe(now + Duration::seconds(30)), vec!["tier0"]);
    }

    #[test]
    fn test_window_stats() {
        let config = HealthConfig {
            window_size: 4,
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::new(config, vec![BackendDescriptor::new("t", 1.0, 5)]);
        monitor.record("t", DispatchOutcome::Failure, 100, 0.0);
        monitor.record("t", DispatchOutcome::Success, 20, 0.5);
        monitor.record("t", DispatchOutcome::Success, 40, 1.5);
        monitor.record("t", DispatchOutcome::Timeout, 60, 0.0);
        monitor.record("t", DispatchOutcome::Success, 80, 0.0);

        let stats = monitor.stats("t").unwrap();
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.successes, 3);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 0);
        assert!((stats.success_rate - 0.75).abs() < 1e-12);
        assert!((stats.mean_latency_ms - 50.0).abs() < 1e-12);
        assert_eq!(stats.mean_cost, Some(1.0));

        let counters = monitor.counters("t").unwrap();
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.successes, 3);
        assert_eq!(counters.latency_total_ms, 300);
    }

    #[test]
    fn test_unknown_tier_ignored() {
        let monitor = monitor();
        assert_eq!(monitor.record("formatter", DispatchOutcome::Failure, 1, 0.0), None);
        assert!(monitor.stats("formatter").is_none());
        assert_eq!(monitor.snapshot().len(), 2);
    }

    #[test]
    fn test_concurrent_failures_flip_once() {
        let monitor = std::sync::Arc::new(monitor());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let monitor = std::sync::Arc::clone(&monitor);
                std::thread::spawn(move || {
                    monitor.record("tier0", DispatchOutcome::Failure, 1, 0.0)
                })
            })
            .collect();
        let flips = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(flips, 1);
        assert_eq!(monitor.counters("tier0").unwrap().failures, 10);
    }

    #[test]
    fn test_restore_keeps_configured_ceiling() {
        let monitor = monitor();
        let mut saved = BackendDescriptor::new("tier0", 1.0, 9);
        saved.is_healthy = false;
        saved.consecutive_failures = 7;
        saved.cost_weight = 1.2;
        let mut stale = BackendDescriptor::new("tier1", 4.0, 7);
        stale.cost_weight = 3.0;

        assert_eq!(
            monitor.restore(&[saved, stale, BackendDescriptor::new("gone", 1.0, 1)]),
            2
        );
        let tier0 = monitor.descriptor("tier0").unwrap();
        assert!(!tier0.is_healthy);
        assert_eq!(tier0.capability_ceiling, 3);
        assert_eq!(tier0.cost_weight, 1.2);
        assert_eq!(monitor.descriptor("tier1").unwrap().cost_weight, 5.0);
    }
}
