//! Configuration for tiering, dedup, health, classification, and dispatch

use crate::error::ConfigError;
use crate::types::{BackendDescriptor, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Relevance tiering thresholds and decay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TieringConfig {
    /// Strictly above this = HOT (full content)
    pub hot_threshold: f64,
    /// Strictly below this = COLD (reference only)
    pub cold_threshold: f64,
    /// Added to the score on each access, capped at 1.0
    pub access_boost: f64,
    /// Multiplier applied per tick to resources not accessed in that tick
    pub decay_factor: f64,
    /// Scores below this snap to 0.0 and the resource becomes evictable
    pub score_floor: f64,
    pub sweep_interval_ms: u64,
    /// Max records the background sweeper touches per pass
    pub sweep_batch: usize,
}

impl TieringConfig {
    /// Score of a newly seen resource: midpoint of the WARM band
    pub fn initial_score(&self) -> f64 {
        (self.cold_threshold + self.hot_threshold) / 2.0
    }

    pub fn tier(&self, score: f64) -> Tier {
        Tier::from_score(score, self.hot_threshold, self.cold_threshold)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            hot_threshold: 0.8,
            cold_threshold: 0.25,
            access_boost: 0.3,
            decay_factor: 0.85,
            score_floor: 0.01,
            sweep_interval_ms: 1_000,
            sweep_batch: 256,
        }
    }
}

/// Semantic dedup acceptance thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// At or above: hard hit, served without re-validation
    pub high_threshold: f64,
    /// At or above (and below high): soft hit, served and re-validated
    pub low_threshold: f64,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl DedupConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            low_threshold: 0.5,
            ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

/// Backend health hysteresis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before a backend is marked unhealthy
    pub failure_threshold: u32,
    /// Consecutive successful probes before it is marked healthy again
    pub recovery_probes: u32,
    /// Rolling window of recent samples per backend
    pub window_size: usize,
    pub probe_interval_secs: u64,
}

impl HealthConfig {
    pub fn probe_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.probe_interval_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_probes: 2,
            window_size: 50,
            probe_interval_secs: 30,
        }
    }
}

/// Slow-moving cost-weight adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Recompute weights every N recorded dispatches
    pub recompute_every: u64,
    /// Window samples a backend needs before it is adjusted
    pub min_samples: usize,
    /// Max relative change per cycle (0.1 = ±10%)
    pub max_step: f64,
    /// Lower bound on effective weight, as a multiple of the base weight
    pub min_factor: f64,
    /// Upper bound on effective weight, as a multiple of the base weight
    pub max_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recompute_every: 20,
            min_samples: 5,
            max_step: 0.1,
            min_factor: 0.5,
            max_factor: 2.0,
        }
    }
}

/// Context budget per dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_chars: usize,
    /// Share of `max_chars` reserved for HOT content
    pub hot_share: f64,
    pub max_hot: usize,
    pub max_warm: usize,
    pub max_cold_refs: usize,
    /// Lines kept in a WARM summary
    pub summary_lines: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: 20_000,
            hot_share: 0.7,
            max_hot: 3,
            max_warm: 5,
            max_cold_refs: 20,
            summary_lines: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Case-insensitive command prefix ending on a word boundary
    Prefix,
    /// Regex for structured operator syntax, anchored at the start
    Operator,
}

/// One deterministic fast-path rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub pattern: String,
    pub intent: String,
    pub complexity: u8,
    #[serde(default)]
    pub handler: Option<String>,
}

impl PatternSpec {
    pub fn prefix(pattern: &str, intent: &str, complexity: u8) -> Self {
        Self {
            kind: PatternKind::Prefix,
            pattern: pattern.to_string(),
            intent: intent.to_string(),
            complexity,
            handler: None,
        }
    }

    pub fn operator(pattern: &str, intent: &str, complexity: u8) -> Self {
        Self {
            kind: PatternKind::Operator,
            ..Self::prefix(pattern, intent, complexity)
        }
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.handler = Some(handler.to_string());
        self
    }
}

/// Pattern rules and complexity estimation knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub patterns: Vec<PatternSpec>,
    /// Estimates below this confidence fall back to mid-tier defaults
    pub min_confidence: f64,
    pub default_intent: String,
    pub default_complexity: u8,
    /// Complexity at or above this suggests the caller decompose the request
    pub decomposition_threshold: u8,
    /// Word count treated as a long request
    pub long_request_words: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                PatternSpec::prefix("format", "format", 1),
                PatternSpec::prefix("lint", "lint", 1),
                PatternSpec::prefix("run tests", "test", 2),
                PatternSpec::operator(r"^/[a-z][a-z0-9_-]*(\s|$)", "command", 2),
            ],
            min_confidence: 0.3,
            default_intent: "general".to_string(),
            default_complexity: 5,
            decomposition_threshold: 7,
            long_request_words: 120,
        }
    }
}

/// Dispatch loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Hard timeout per backend attempt
    pub attempt_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    /// Re-execute soft-hit requests in the background
    pub revalidate_soft_hits: bool,
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            probe_timeout_ms: 2_000,
            revalidate_soft_hits: true,
        }
    }
}

/// A configured backend tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    pub tier_id: String,
    pub cost_weight: f64,
    pub capability_ceiling: u8,
    /// Program run by the command executor
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Cost reported per successful call
    #[serde(default)]
    pub cost_per_call: f64,
}

impl BackendSpec {
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new(self.tier_id.clone(), self.cost_weight, self.capability_ceiling)
    }
}

/// A fast-path handler run directly for matching patterns, outside the cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditTarget {
    #[default]
    Sqlite,
    Jsonl,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tiering: TieringConfig,
    pub dedup: DedupConfig,
    pub health: HealthConfig,
    pub adaptive: AdaptiveConfig,
    pub context: ContextConfig,
    pub classifier: ClassifierConfig,
    pub dispatch: DispatchConfig,
    pub backends: Vec<BackendSpec>,
    pub handlers: Vec<HandlerSpec>,
    pub audit: AuditTarget,
}

impl Config {
    pub fn new() -> Self {
        Self {
            tiering: TieringConfig::default(),
            dedup: DedupConfig::default(),
            health: HealthConfig::default(),
            adaptive: AdaptiveConfig::default(),
            context: ContextConfig::default(),
            classifier: ClassifierConfig::default(),
            dispatch: DispatchConfig::default(),
            backends: default_backends(),
            handlers: Vec::new(),
            audit: AuditTarget::default(),
        }
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::new()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tiering;
        if !(0.0..=1.0).contains(&t.cold_threshold)
            || !(0.0..=1.0).contains(&t.hot_threshold)
            || t.cold_threshold >= t.hot_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "tiering thresholds must satisfy 0 <= cold ({}) < hot ({}) <= 1",
                t.cold_threshold, t.hot_threshold
            )));
        }
        if !(t.decay_factor > 0.0 && t.decay_factor < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "decay_factor must be in (0, 1), got {}",
                t.decay_factor
            )));
        }
        if t.access_boost <= 0.0 {
            return Err(ConfigError::Invalid("access_boost must be positive".into()));
        }

        let d = &self.dedup;
        if !(0.0..=1.0).contains(&d.low_threshold)
            || !(0.0..=1.0).contains(&d.high_threshold)
            || d.low_threshold >= d.high_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "dedup thresholds must satisfy 0 <= low ({}) < high ({}) <= 1",
                d.low_threshold, d.high_threshold
            )));
        }

        if self.health.failure_threshold == 0 || self.health.recovery_probes == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold and recovery_probes must be at least 1".into(),
            ));
        }

        let a = &self.adaptive;
        if a.min_factor <= 0.0 || a.min_factor > 1.0 || a.max_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "adaptive factors must satisfy 0 < min_factor <= 1 <= max_factor".into(),
            ));
        }

        if !(1..=10).contains(&self.classifier.default_complexity) {
            return Err(ConfigError::Invalid(
                "default_complexity must be in 1..=10".into(),
            ));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.tier_id.trim().is_empty() {
                return Err(ConfigError::Invalid("backend tier_id must not be empty".into()));
            }
            if !seen.insert(backend.tier_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend tier_id {}",
                    backend.tier_id
                )));
            }
            if !(1..=10).contains(&backend.capability_ceiling) {
                return Err(ConfigError::Invalid(format!(
                    "backend {} capability_ceiling must be in 1..=10",
                    backend.tier_id
                )));
            }
            if backend.cost_weight <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "backend {} cost_weight must be positive",
                    backend.tier_id
                )));
            }
        }
        for handler in &self.handlers {
            if handler.name.trim().is_empty() || handler.command.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "handler name and command must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(BackendSpec::descriptor).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn default_backends() -> Vec<BackendSpec> {
    [("tier0", 1.0, 3, 0.001), ("tier1", 5.0, 7, 0.01), ("tier2", 20.0, 10, 0.05)]
        .into_iter()
        .map(|(tier_id, cost_weight, capability_ceiling, cost_per_call)| BackendSpec {
            tier_id: tier_id.to_string(),
            cost_weight,
            capability_ceiling,
            command: Some("cat".to_string()),
            args: Vec::new(),
            cost_per_call,
        })
        .collect()
}
