//! Backend cascade selection: cheapest capable healthy tier first

use crate::types::BackendDescriptor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordered candidates for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadePlan {
    pub candidates: Vec<String>,
    /// Every eligible backend was unhealthy and the last-resort tier was used
    pub degraded: bool,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeSelector;

impl CascadeSelector {
    pub fn new() -> Self {
        Self
    }

    /// Order the backends able to serve `required` capability.
    ///
    /// Healthy eligible backends ascend by cost weight, then capability
    /// ceiling, then tier id. When nothing meets the requirement the
    /// highest-ceiling tiers are treated as eligible. When every eligible
    /// backend is unhealthy, only the highest-ceiling one is returned and the
    /// plan is marked degraded.
    pub fn select(&self, required: u8, descriptors: &[BackendDescriptor]) -> CascadePlan {
        let mut eligible: Vec<&BackendDescriptor> = descriptors
            .iter()
            .filter(|d| d.capability_ceiling >= required)
            .collect();

        if eligible.is_empty() {
            let top = descriptors.iter().map(|d| d.capability_ceiling).max();
            eligible = descriptors
                .iter()
                .filter(|d| Some(d.capability_ceiling) == top)
                .collect();
            if !eligible.is_empty() {
                tracing::debug!(required, "no backend meets requirement, using strongest tier");
            }
        }

        let mut healthy: Vec<&BackendDescriptor> =
            eligible.iter().copied().filter(|d| d.is_healthy).collect();
        healthy.sort_by(|a, b| by_cost(a, b));

        if !healthy.is_empty() {
            return CascadePlan {
                candidates: healthy.into_iter().map(|d| d.tier_id.clone()).collect(),
                degraded: false,
            };
        }

        let last_resort = eligible.into_iter().max_by(|a, b| {
            a.capability_ceiling
                .cmp(&b.capability_ceiling)
                // prefer the cheaper one among equals
                .then_with(|| by_cost(b, a))
        });

        match last_resort {
            Some(d) => {
                tracing::warn!(
                    tier = %d.tier_id,
                    required,
                    "all eligible backends unhealthy, falling back to last-resort tier"
                );
                CascadePlan {
                    candidates: vec![d.tier_id.clone()],
                    degraded: true,
                }
            }
            None => CascadePlan {
                candidates: Vec::new(),
                degraded: true,
            },
        }
    }

    /// Like [`select`](Self::select), but a fast-path handler naming a
    /// candidate backend is tried first. A handler tier that is unhealthy or
    /// below `required` is not promoted.
    pub fn select_with_handler(
        &self,
        required: u8,
        handler: Option<&str>,
        descriptors: &[BackendDescriptor],
    ) -> CascadePlan {
        let mut plan = self.select(required, descriptors);
        if let Some(handler) = handler {
            if let Some(pos) = plan.candidates.iter().position(|tier| tier == handler) {
                let tier = plan.candidates.remove(pos);
                plan.candidates.insert(0, tier);
            } else if descriptors.iter().any(|d| d.tier_id == handler) {
                tracing::debug!(handler, "handler tier not eligible, using cascade order");
            } else {
                tracing::debug!(handler, "fast-path handler is not a backend, using cascade");
            }
        }
        plan
    }
}

fn by_cost(a: &BackendDescriptor, b: &BackendDescriptor) -> Ordering {
    a.cost_weight
        .partial_cmp(&b.cost_weight)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.capability_ceiling.cmp(&b.capability_ceiling))
        .then_with(|| a.tier_id.cmp(&b.tier_id))
}
