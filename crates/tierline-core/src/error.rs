//! Error taxonomy for routing and configuration

use serde::{Deserialize, Serialize};
use tierline_telemetry::DispatchOutcome;

/// Why one candidate in the cascade did not produce a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub tier: String,
    pub outcome: DispatchOutcome,
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}: {})", self.tier, self.outcome.as_str(), self.reason)
    }
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Routing errors.
///
/// Only `AllBackendsExhausted` and `Cancelled` are returned from `route`;
/// the others are absorbed inside the pipeline and logged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("classification ambiguous (confidence {confidence:.2})")]
    ClassificationAmbiguous { confidence: f64 },

    #[error("backend {tier} unavailable: {reason}")]
    BackendUnavailable { tier: String, reason: String },

    #[error("backend {tier} timed out after {timeout_ms}ms")]
    BackendTimeout { tier: String, timeout_ms: u64 },

    #[error("cache entry {key} is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("all backends exhausted: {}", summarize(.attempts))]
    AllBackendsExhausted { attempts: Vec<AttemptFailure> },

    #[error("request cancelled")]
    Cancelled,
}

impl RouteError {
    /// Tiers tried before giving up, in attempt order
    pub fn attempted_tiers(&self) -> Vec<&str> {
        match self {
            RouteError::AllBackendsExhausted { attempts } => {
                attempts.iter().map(|a| a.tier.as_str()).collect()
            }
            RouteError::BackendUnavailable { tier, .. } | RouteError::BackendTimeout { tier, .. } => {
                vec![tier.as_str()]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
