//! Dispatch outcome recording
//!
//! Every attempt goes to the audit sink and the health monitor. Every
//! `recompute_every` records the weight adjuster runs over the current
//! windows and its changes are applied to the monitor.

use crate::adaptive::{WeightAdjuster, WeightChange};
use crate::health::{HealthMonitor, HealthTransition};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tierline_core::AdaptiveConfig;
use tierline_telemetry::{AuditError, AuditSink, DispatchRecord};

pub struct OutcomeRecorder {
    health: Arc<HealthMonitor>,
    audit: Arc<dyn AuditSink>,
    adjuster: WeightAdjuster,
    recompute_every: u64,
    recorded: AtomicU64,
}

impl OutcomeRecorder {
    pub fn new(
        health: Arc<HealthMonitor>,
        audit: Arc<dyn AuditSink>,
        config: AdaptiveConfig,
    ) -> Self {
        Self {
            health,
            audit,
            recompute_every: config.recompute_every.max(1),
            adjuster: WeightAdjuster::new(config),
            recorded: AtomicU64::new(0),
        }
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Record one attempt. Health is updated even if the audit write fails;
    /// the audit error is still returned to the caller.
    pub fn record(&self, record: &DispatchRecord) -> Result<Option<HealthTransition>, AuditError> {
        // Handler executors are not backend tiers; the monitor ignores them.
        let transition = self.health.record(
            &record.backend_tier,
            record.outcome,
            record.latency_ms(),
            record.cost,
        );

        let count = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.recompute_every == 0 {
            self.recompute();
        }

        if let Err(e) = self.audit.append(record) {
            tracing::warn!(
                request_id = %record.request_id,
                tier = %record.backend_tier,
                error = %e,
                "failed to append dispatch record"
            );
            return Err(e);
        }
        Ok(transition)
    }

    /// Run one adjustment cycle now and apply the result
    pub fn recompute(&self) -> Vec<WeightChange> {
        let inputs: Vec<_> = self
            .health
            .snapshot()
            .into_iter()
            .filter_map(|d| self.health.stats(&d.tier_id).map(|s| (d, s)))
            .collect();

        let changes = self.adjuster.compute(&inputs);
        for change in &changes {
            self.health.set_cost_weight(&change.tier_id, change.to);
            tracing::debug!(
                tier = %change.tier_id,
                from = change.from,
                to = change.to,
                "cost weight adjusted"
            );
        }
        if !changes.is_empty() {
            tracing::info!(changes = changes.len(), "cost weights recomputed");
        }
        changes
    }

    pub fn recorded_count(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}
