use super::Workspace;
use serde::Serialize;
use std::collections::BTreeMap;
use tierline_telemetry::{DispatchOutcome, DispatchRecord, Paths};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
struct TierStats {
    attempts: usize,
    successes: usize,
    failures: usize,
    timeouts: usize,
    success_rate: f64,
    mean_latency_ms: f64,
    total_cost: f64,
}

fn compute_stats(records: &[DispatchRecord]) -> BTreeMap<String, TierStats> {
    let mut latency: BTreeMap<&str, u64> = BTreeMap::new();
    let mut stats: BTreeMap<String, TierStats> = BTreeMap::new();

    for record in records {
        let entry = stats.entry(record.backend_tier.clone()).or_default();
        entry.attempts += 1;
        match record.outcome {
            DispatchOutcome::Success => entry.successes += 1,
            DispatchOutcome::Failure => entry.failures += 1,
            DispatchOutcome::Timeout => entry.timeouts += 1,
        }
        entry.total_cost += record.cost;
        *latency.entry(&record.backend_tier).or_default() += record.latency_ms();
    }

    for (tier, entry) in stats.iter_mut() {
        let attempts = entry.attempts as f64;
        entry.success_rate = entry.successes as f64 / attempts;
        entry.mean_latency_ms =
            latency.get(tier.as_str()).copied().unwrap_or(0) as f64 / attempts;
    }
    stats
}

pub fn run(paths: &Paths, limit: usize, stats: bool) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let audit = workspace.audit_sink();

    if stats {
        let records = audit.recent(usize::MAX)?;
        if records.is_empty() {
            println!("No dispatch history");
            return Ok(());
        }
        println!("{}", serde_json::to_string_pretty(&compute_stats(&records))?);
        return Ok(());
    }

    let records = audit.recent(limit)?;
    if records.is_empty() {
        println!("No dispatch history");
        return Ok(());
    }

    println!("Recent Dispatches (last {})", records.len());
    println!("==========================");
    for record in records.iter().rev() {
        println!(
            "  {} | {:<8} {:<7} {:>6}ms cost:{:.4} intent:{}{}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.backend_tier,
            record.outcome.as_str(),
            record.latency_ms(),
            record.cost,
            record.intent,
            record
                .reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(tier: &str, outcome: DispatchOutcome, latency_ms: i64, cost: f64) -> DispatchRecord {
        let started_at = Utc::now();
        DispatchRecord {
            request_id: "r".to_string(),
            backend_tier: tier.to_string(),
            intent: "general".to_string(),
            complexity: 5,
            fast_path: false,
            started_at,
            finished_at: started_at + Duration::milliseconds(latency_ms),
            outcome,
            cost,
            reason: None,
        }
    }

    #[test]
    fn test_compute_stats_per_tier() {
        let records = vec![
            record("tier0", DispatchOutcome::Success, 100, 0.01),
            record("tier0", DispatchOutcome::Timeout, 300, 0.0),
            record("tier1", DispatchOutcome::Success, 50, 0.05),
            record("tier0", DispatchOutcome::Failure, 200, 0.0),
        ];
        let stats = compute_stats(&records);

        let tier0 = &stats["tier0"];
        assert_eq!(tier0.attempts, 3);
        assert_eq!(tier0.successes, 1);
        assert_eq!(tier0.failures, 1);
        assert_eq!(tier0.timeouts, 1);
        assert!((tier0.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((tier0.mean_latency_ms - 200.0).abs() < 1e-9);

        let tier1 = &stats["tier1"];
        assert_eq!(tier1.success_rate, 1.0);
        assert!((tier1.total_cost - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_compute_stats_empty() {
        assert!(compute_stats(&[]).is_empty());
    }

    #[test]
    fn test_history_on_fresh_home() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_home(temp.path());
        assert!(run(&paths, 10, false).is_ok());
        assert!(run(&paths, 10, true).is_ok());
    }
}
