//! Outcome-driven cost weight adjustment
//!
//! Each cycle compares backends by efficiency (success rate per unit cost)
//! and nudges the weight of the above-average ones down and the
//! below-average ones up, so cheaper successful tiers get tried earlier.

use crate::health::WindowStats;
use serde::Serialize;
use tierline_core::{AdaptiveConfig, BackendDescriptor};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightChange {
    pub tier_id: String,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone)]
pub struct WeightAdjuster {
    config: AdaptiveConfig,
}

impl WeightAdjuster {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Compute the next weights. Backends with fewer than `min_samples`
    /// window samples are left alone, and nothing moves unless at least two
    /// backends are comparable. Each change is bounded by `max_step` and the
    /// result by `[min_factor, max_factor] * base_cost_weight`.
    pub fn compute(&self, backends: &[(BackendDescriptor, WindowStats)]) -> Vec<WeightChange> {
        if !self.config.enabled {
            return Vec::new();
        }

        let eligible: Vec<(&BackendDescriptor, f64)> = backends
            .iter()
            .filter(|(_, stats)| stats.samples >= self.config.min_samples.max(1))
            .map(|(descriptor, stats)| (descriptor, efficiency(descriptor, stats)))
            .collect();
        if eligible.len() < 2 {
            return Vec::new();
        }

        let mean = eligible.iter().map(|(_, e)| e).sum::<f64>() / eligible.len() as f64;
        if mean <= 0.0 {
            return Vec::new();
        }

        let max_step = self.config.max_step.abs();
        eligible
            .into_iter()
            .filter_map(|(descriptor, eff)| {
                let step = (-(eff - mean) / mean).clamp(-max_step, max_step);
                let lower = descriptor.base_cost_weight * self.config.min_factor;
                let upper = descriptor.base_cost_weight * self.config.max_factor;
                let to = (descriptor.cost_weight * (1.0 + step)).clamp(lower, upper);
                if (to - descriptor.cost_weight).abs() < 1e-9 {
                    return None;
                }
                Some(WeightChange {
                    tier_id: descriptor.tier_id.clone(),
                    from: descriptor.cost_weight,
                    to,
                })
            })
            .collect()
    }
}

fn efficiency(descriptor: &BackendDescriptor, stats: &WindowStats) -> f64 {
    let cost = stats
        .mean_cost
        .unwrap_or(descriptor.base_cost_weight)
        .max(f64::EPSILON);
    stats.success_rate / cost
}
