//! Dispatch audit record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one dispatch attempt against one backend tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Success,
    Failure,
    Timeout,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::Failure => "failure",
            DispatchOutcome::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(DispatchOutcome::Success),
            "failure" => Some(DispatchOutcome::Failure),
            "timeout" => Some(DispatchOutcome::Timeout),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success)
    }
}

/// One append-only audit row per dispatch attempt.
///
/// Health statistics and cost-weight adjustments are derived from these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub request_id: String,
    pub backend_tier: String,
    pub intent: String,
    pub complexity: u8,
    #[serde(default)]
    pub fast_path: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
    #[serde(default)]
    pub cost: f64,
    /// Failure detail (timeout, unavailable, executor message)
    #[serde(default)]
    pub reason: Option<String>,
}

impl DispatchRecord {
    pub fn latency_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_names() {
        for outcome in [
            DispatchOutcome::Success,
            DispatchOutcome::Failure,
            DispatchOutcome::Timeout,
        ] {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
            assert_eq!(DispatchOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(DispatchOutcome::parse("exploded"), None);
    }

    #[test]
    fn test_latency_never_negative() {
        let now = Utc::now();
        let record = DispatchRecord {
            request_id: "r1".to_string(),
            backend_tier: "tier0".to_string(),
            intent: "general".to_string(),
            complexity: 3,
            fast_path: false,
            started_at: now,
            finished_at: now - chrono::Duration::milliseconds(5),
            outcome: DispatchOutcome::Failure,
            cost: 0.0,
            reason: None,
        };
        assert_eq!(record.latency_ms(), 0);
    }

    #[test]
    fn test_record_backwards_compatible() {
        let old_json = r#"{"request_id":"r1","backend_tier":"tier1","intent":"bugfix","complexity":4,"started_at":"2025-01-01T00:00:00Z","finished_at":"2025-01-01T00:00:01Z","outcome":"timeout"}"#;
        let parsed: DispatchRecord = serde_json::from_str(old_json).unwrap();
        assert!(!parsed.fast_path);
        assert_eq!(parsed.cost, 0.0);
        assert_eq!(parsed.reason, None);
        assert_eq!(parsed.latency_ms(), 1000);
    }
}
