#![allow(dead_code)]

use tierline_core::{BackendDescriptor, TieringConfig};

/// Thresholds whose WARM midpoint is 0.6
pub fn wide_warm_tiering() -> TieringConfig {
    TieringConfig {
        hot_threshold: 0.95,
        cold_threshold: 0.25,
        decay_factor: 0.85,
        ..TieringConfig::default()
    }
}

pub fn three_tiers() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::new("tier0", 1.0, 3),
        BackendDescriptor::new("tier1", 5.0, 7),
        BackendDescriptor::new("tier2", 20.0, 10),
    ]
}
