mod common;

use common::three_tiers;
use tierline_core::{CascadeSelector, Classification, CapabilityHints};

#[test]
fn test_candidates_sorted_by_cost_for_every_complexity() {
    let backends = three_tiers();
    let selector = CascadeSelector::new();

    for complexity in 1..=10u8 {
        let classification = Classification::new("general", complexity, false);
        let required = classification.required_capability(&CapabilityHints::default());
        let plan = selector.select(required, &backends);

        let weights: Vec<f64> = plan
            .candidates
            .iter()
            .map(|id| backends.iter().find(|b| &b.tier_id == id).unwrap().cost_weight)
            .collect();
        assert!(weights.windows(2).all(|w| w[0] <= w[1]), "complexity {}", complexity);

        for id in &plan.candidates {
            let backend = backends.iter().find(|b| &b.tier_id == id).unwrap();
            assert!(backend.capability_ceiling >= complexity);
        }
    }
}

#[test]
fn test_unhealthy_tier0_skips_to_tier1() {
    let mut backends = three_tiers();
    backends[0].is_healthy = false;
    backends[0].consecutive_failures = 5;

    let plan = CascadeSelector::new().select(2, &backends);
    assert_eq!(plan.candidates.first().map(String::as_str), Some("tier1"));
    assert!(!plan.candidates.contains(&"tier0".to_string()));
}

#[test]
fn test_unhealthy_only_eligible_tier_is_kept() {
    let mut backends = three_tiers();
    backends[2].is_healthy = false;

    let plan = CascadeSelector::new().select(9, &backends);
    assert_eq!(plan.candidates, vec!["tier2"]);
    assert!(plan.degraded);
}

#[test]
fn test_min_capability_hint_raises_floor() {
    let backends = three_tiers();
    let classification = Classification::new("general", 2, false);
    let hints = CapabilityHints {
        min_capability: Some(6),
    };
    let plan = CascadeSelector::new().select(classification.required_capability(&hints), &backends);
    assert_eq!(plan.candidates, vec!["tier1", "tier2"]);
}
