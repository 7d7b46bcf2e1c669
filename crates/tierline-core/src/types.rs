//! Core types for routing, tiering, and backend state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relevance tier of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// HOT: full content attached
    #[serde(rename = "HOT")]
    Hot,
    /// WARM: condensed summary attached
    #[serde(rename = "WARM")]
    Warm,
    /// COLD: reference identifier only
    #[serde(rename = "COLD")]
    Cold,
}

impl Tier {
    /// Classify a score. Strictly above `hot` is HOT, strictly below `cold`
    /// is COLD, and the closed interval between them is WARM.
    pub fn from_score(score: f64, hot: f64, cold: f64) -> Self {
        if score > hot {
            Tier::Hot
        } else if score >= cold {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "HOT",
            Tier::Warm => "WARM",
            Tier::Cold => "COLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HOT" => Some(Tier::Hot),
            "WARM" => Some(Tier::Warm),
            "COLD" => Some(Tier::Cold),
            _ => None,
        }
    }
}

/// Optional capability hints declared by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityHints {
    /// Minimum backend capability ceiling, regardless of estimated complexity
    #[serde(default)]
    pub min_capability: Option<u8>,
}

/// An incoming request. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub hints: CapabilityHints,
    /// Resources this request touches; each counts as an access
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default = "Utc::now")]
    pub arrived_at: DateTime<Utc>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            hints: CapabilityHints::default(),
            resources: Vec::new(),
            arrived_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_capability(mut self, min_capability: u8) -> Self {
        self.hints.min_capability = Some(min_capability);
        self
    }
}

/// Classification produced once per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: String,
    /// 1..=10
    pub complexity: u8,
    pub fast_path: bool,
    /// Declared handler of a fast-path pattern, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl Classification {
    pub fn new(intent: impl Into<String>, complexity: u8, fast_path: bool) -> Self {
        Self {
            intent: intent.into(),
            complexity: complexity.clamp(1, 10),
            fast_path,
            handler: None,
        }
    }

    /// Capability ceiling a backend needs to be eligible for this request
    pub fn required_capability(&self, hints: &CapabilityHints) -> u8 {
        hints
            .min_capability
            .map_or(self.complexity, |min| self.complexity.max(min))
    }
}

/// Relevance annotation for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceRecord {
    pub resource_id: String,
    pub score: f64,
    pub tier: Tier,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
}

/// Health and cost state of one backend tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub tier_id: String,
    /// Effective weight used for ordering; drifts with adaptive adjustment
    pub cost_weight: f64,
    /// Configured weight the adaptive adjustment is bounded around
    pub base_cost_weight: f64,
    pub capability_ceiling: u8,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
}

impl BackendDescriptor {
    pub fn new(tier_id: impl Into<String>, cost_weight: f64, capability_ceiling: u8) -> Self {
        Self {
            tier_id: tier_id.into(),
            cost_weight,
            base_cost_weight: cost_weight,
            capability_ceiling,
            is_healthy: true,
            consecutive_failures: 0,
            last_probe: None,
        }
    }
}

/// How a routed response was sourced from the dedup cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHit {
    None,
    Hard,
    Soft,
}
