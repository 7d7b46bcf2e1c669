//! Tier-keyed context assembly under a character budget

use crate::config::ContextConfig;
use crate::types::{RelevanceRecord, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tierline_telemetry::{estimate_tokens, truncate_chars};

/// Read-only access to resource content owned by a collaborator
pub trait ResourceProvider: Send + Sync {
    fn content(&self, resource_id: &str) -> Option<String>;

    /// Condensed form used for WARM resources
    fn summary(&self, resource_id: &str, max_lines: usize) -> Option<String> {
        self.content(resource_id)
            .map(|content| summarize(&content, max_lines))
    }
}

/// Resources addressed by file path, optionally relative to a root
#[derive(Debug, Clone, Default)]
pub struct FsResources {
    root: Option<PathBuf>,
}

impl FsResources {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, resource_id: &str) -> PathBuf {
        let path = PathBuf::from(resource_id);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

impl ResourceProvider for FsResources {
    fn content(&self, resource_id: &str) -> Option<String> {
        let path = self.resolve(resource_id);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "resource unreadable");
                None
            }
        }
    }
}

/// In-memory resources, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    contents: HashMap<String, String>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(resource_id, content);
        self
    }

    pub fn insert(&mut self, resource_id: impl Into<String>, content: impl Into<String>) {
        self.contents.insert(resource_id.into(), content.into());
    }
}

impl ResourceProvider for MemoryResources {
    fn content(&self, resource_id: &str) -> Option<String> {
        self.contents.get(resource_id).cloned()
    }
}

fn is_outline_line(trimmed: &str) -> bool {
    const SIGNATURES: &[&str] = &[
        "pub fn ",
        "fn ",
        "pub async fn ",
        "async fn ",
        "def ",
        "class ",
        "pub struct ",
        "struct ",
        "pub enum ",
        "enum ",
        "pub trait ",
        "trait ",
        "impl ",
        "func ",
        "function ",
        "interface ",
    ];
    trimmed.starts_with('#') || SIGNATURES.iter().any(|s| trimmed.starts_with(s))
}

/// Condense content to headings and top-level signatures, falling back to
/// the leading lines when it has neither. At most `max_lines` lines.
pub fn summarize(content: &str, max_lines: usize) -> String {
    let outline: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| is_outline_line(line))
        .take(max_lines)
        .collect();

    if outline.is_empty() {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(max_lines)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        outline.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub resource_id: String,
    /// Tier as delivered; a resource whose content is missing is delivered COLD
    pub tier: Tier,
    pub score: f64,
    /// Empty for reference-only sections
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub sections: Vec<ContextSection>,
    /// Characters of attached content, bounded by the configured budget
    pub chars: usize,
    pub estimated_tokens: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        let mut refs = Vec::new();
        for section in &self.sections {
            match section.tier {
                Tier::Hot => parts.push(format!("[HOT] {}\n{}", section.resource_id, section.body)),
                Tier::Warm => parts.push(format!(
                    "[WARM] {} (summary)\n{}",
                    section.resource_id, section.body
                )),
                Tier::Cold => refs.push(format!("[COLD] {}", section.resource_id)),
            }
        }
        if !refs.is_empty() {
            parts.push(refs.join("\n"));
        }
        parts.join("\n\n")
    }

    pub fn summary(&self) -> ContextSummary {
        let ids = |tier: Tier| -> Vec<String> {
            self.sections
                .iter()
                .filter(|s| s.tier == tier)
                .map(|s| s.resource_id.clone())
                .collect()
        };
        ContextSummary {
            hot: ids(Tier::Hot),
            warm: ids(Tier::Warm),
            cold: ids(Tier::Cold),
            chars: self.chars,
            estimated_tokens: self.estimated_tokens,
        }
    }
}

/// Which resources went out at which tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub hot: Vec<String>,
    pub warm: Vec<String>,
    pub cold: Vec<String>,
    pub chars: usize,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Build the context for one dispatch. HOT resources get full content
    /// within their share of the budget, WARM resources a summary, COLD
    /// resources their id only.
    pub fn assemble(
        &self,
        records: &[RelevanceRecord],
        provider: &dyn ResourceProvider,
    ) -> AssembledContext {
        let mut ordered: Vec<&RelevanceRecord> = records.iter().collect();
        ordered.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        ordered.dedup_by(|a, b| a.resource_id == b.resource_id);

        let mut hot = Vec::new();
        let mut warm = Vec::new();
        let mut cold = Vec::new();
        for record in ordered {
            match record.tier {
                Tier::Hot if hot.len() < self.config.max_hot => hot.push(record),
                Tier::Hot | Tier::Warm if warm.len() < self.config.max_warm => warm.push(record),
                _ => cold.push(record),
            }
        }

        let max_chars = self.config.max_chars;
        let per_hot_budget = if hot.is_empty() {
            0
        } else {
            ((max_chars as f64 * self.config.hot_share.clamp(0.0, 1.0)) as usize) / hot.len()
        };

        let mut sections = Vec::new();
        let mut refs = Vec::new();
        let mut used = 0usize;

        for record in hot {
            let budget = per_hot_budget.min(max_chars - used);
            match provider.content(&record.resource_id) {
                Some(content) if budget > 0 => {
                    let body = truncate_chars(&content, budget).to_string();
                    used += body.chars().count();
                    sections.push(section(record, Tier::Hot, body));
                }
                _ => refs.push(record),
            }
        }

        for record in warm {
            let budget = max_chars - used;
            match provider.summary(&record.resource_id, self.config.summary_lines) {
                Some(summary) if budget > 0 && !summary.is_empty() => {
                    let body = truncate_chars(&summary, budget).to_string();
                    used += body.chars().count();
                    sections.push(section(record, Tier::Warm, body));
                }
                _ => refs.push(record),
            }
        }

        refs.extend(cold);
        sections.extend(
            refs.into_iter()
                .take(self.config.max_cold_refs)
                .map(|record| section(record, Tier::Cold, String::new())),
        );

        let mut assembled = AssembledContext {
            sections,
            chars: used,
            estimated_tokens: 0,
        };
        assembled.estimated_tokens = estimate_tokens(&assembled.render());
        tracing::debug!(
            sections = assembled.sections.len(),
            chars = assembled.chars,
            tokens = assembled.estimated_tokens,
            "assembled context"
        );
        assembled
    }
}

fn section(record: &RelevanceRecord, tier: Tier, body: String) -> ContextSection {
    ContextSection {
        resource_id: record.resource_id.clone(),
        tier,
        score: record.score,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, score: f64, tier: Tier) -> RelevanceRecord {
        RelevanceRecord {
            resource_id: id.to_string(),
            score,
            tier,
            last_access: Utc::now(),
            access_count: 1,
        }
    }

    #[test]
    fn test_summarize_keeps_outline() {
        let content = "# Title\nsome prose\npub fn route() {}\n    let x = 1;\nclass Foo:\n";
        assert_eq!(summarize(content, 10), "# Title\npub fn route() {}\nclass Foo:");
        assert_eq!(summarize(content, 1), "# Title");
    }

    #[test]
    fn test_summarize_falls_back_to_leading_lines() {
        let content = "alpha\n\nbeta\ngamma\ndelta";
        assert_eq!(summarize(content, 3), "alpha\nbeta\ngamma");
    }

    #[test]
    fn test_tiers_shape_sections() {
        let provider = MemoryResources::new()
            .with("hot.rs", "fn hot() {}\nbody line")
            .with("warm.md", "# Warm\ntext\n## Section")
            .with("cold.txt", "never read");
        let assembler = ContextAssembler::new(ContextConfig::default());
        let ctx = assembler.assemble(
            &[
                record("cold.txt", 0.1, Tier::Cold),
                record("warm.md", 0.5, Tier::Warm),
                record("hot.rs", 0.9, Tier::Hot),
            ],
            &provider,
        );

        assert_eq!(ctx.sections.len(), 3);
        assert_eq!(ctx.sections[0].tier, Tier::Hot);
        assert_eq!(ctx.sections[0].body, "fn hot() {}\nbody line");
        assert_eq!(ctx.sections[1].body, "# Warm\n## Section");
        assert_eq!(ctx.sections[2].resource_id, "cold.txt");
        assert!(ctx.sections[2].body.is_empty());

        let rendered = ctx.render();
        assert!(rendered.contains("[HOT] hot.rs"));
        assert!(rendered.contains("[WARM] warm.md (summary)"));
        assert!(rendered.contains("[COLD] cold.txt"));
        assert!(!rendered.contains("never read"));
        assert!(ctx.estimated_tokens > 0);
    }

    #[test]
    fn test_hot_budget_is_shared() {
        let big = "x".repeat(10_000);
        let provider = MemoryResources::new().with("a", big.clone()).with("b", big);
        let config = ContextConfig {
            max_chars: 1_000,
            ..ContextConfig::default()
        };
        let ctx = ContextAssembler::new(config).assemble(
            &[record("a", 0.95, Tier::Hot), record("b", 0.9, Tier::Hot)],
            &provider,
        );
        assert_eq!(ctx.sections[0].body.len(), 350);
        assert_eq!(ctx.sections[1].body.len(), 350);
        assert_eq!(ctx.chars, 700);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let provider = MemoryResources::new()
            .with("h", "h".repeat(500))
            .with("w1", "w".repeat(500))
            .with("w2", "v".repeat(500));
        let config = ContextConfig {
            max_chars: 600,
            ..ContextConfig::default()
        };
        let ctx = ContextAssembler::new(config).assemble(
            &[
                record("h", 0.9, Tier::Hot),
                record("w1", 0.6, Tier::Warm),
                record("w2", 0.5, Tier::Warm),
            ],
            &provider,
        );
        assert!(ctx.chars <= 600);
        let summary = ctx.summary();
        assert_eq!(summary.hot, vec!["h"]);
        assert_eq!(summary.warm, vec!["w1"]);
        assert_eq!(summary.cold, vec!["w2"]);
    }

    #[test]
    fn test_missing_content_degrades_to_reference() {
        let provider = MemoryResources::new();
        let ctx = ContextAssembler::new(ContextConfig::default())
            .assemble(&[record("gone.rs", 0.9, Tier::Hot)], &provider);
        assert_eq!(ctx.sections.len(), 1);
        assert_eq!(ctx.sections[0].tier, Tier::Cold);
        assert_eq!(ctx.chars, 0);
    }

    #[test]
    fn test_fs_resources_relative_to_root() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.md"), "# Notes\nbody").unwrap();
        let provider = FsResources::with_root(temp.path());
        assert_eq!(provider.content("notes.md").unwrap(), "# Notes\nbody");
        assert_eq!(provider.summary("notes.md", 5).unwrap(), "# Notes");
        assert!(provider.content("missing.md").is_none());
    }
}
