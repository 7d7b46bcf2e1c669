//! Lexical complexity estimation
//!
//! Scores a request 1..=10 from cheap surface features:
//!
//! | Feature            | Points |
//! |--------------------|--------|
//! | Length             | 0-3    |
//! | Multi-step markers | 0-3    |
//! | Code markers       | 0-2    |
//! | Structured data    | 0-1    |
//! | Intent weight      | 0-1    |
//!
//! plus a base of 1. Confidence grows with the number of features that fired.

use serde::Serialize;
use tierline_core::{Classification, ClassifierConfig, RouteError};

struct IntentKeywords {
    intent: &'static str,
    weight: u8,
    keywords: &'static [&'static str],
}

const INTENT_KEYWORD_MAP: &[IntentKeywords] = &[
    IntentKeywords {
        intent: "refactor",
        weight: 1,
        keywords: &[
            "refactor",
            "rename",
            "reorganize",
            "restructure",
            "cleanup",
            "simplify",
            "extract",
            "move",
        ],
    },
    IntentKeywords {
        intent: "bugfix",
        weight: 0,
        keywords: &[
            "fix", "bug", "error", "broken", "crash", "issue", "wrong", "fail", "problem",
        ],
    },
    IntentKeywords {
        intent: "feature",
        weight: 1,
        keywords: &["add", "implement", "create", "feature", "build", "develop"],
    },
    IntentKeywords {
        intent: "review",
        weight: 0,
        keywords: &["review", "check", "examine", "audit", "analyze"],
    },
    IntentKeywords {
        intent: "exploration",
        weight: 0,
        keywords: &[
            "find", "search", "where", "how does", "what is", "explain", "explore",
        ],
    },
    IntentKeywords {
        intent: "config",
        weight: 0,
        keywords: &[
            "config",
            "setting",
            "environment",
            "setup",
            "install",
            "deploy",
        ],
    },
];

const SEQUENCE_WORDS: &[&str] = &[
    "then",
    "finally",
    "afterwards",
    "next",
    "step",
    "steps",
    "first",
    "second",
    "third",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cpp", "h", "rb", "toml", "json",
    "yaml", "yml", "sql", "sh",
];

/// Raw lexical features of one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Features {
    pub words: usize,
    pub step_markers: usize,
    pub fenced_code: bool,
    pub code_markers: usize,
    pub data_markers: usize,
    pub intent: Option<&'static str>,
    pub intent_hits: usize,
}

/// An estimate with the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub classification: Classification,
    pub confidence: f64,
    pub features: Features,
}

#[derive(Debug, Clone)]
pub struct ComplexityEstimator {
    config: ClassifierConfig,
}

impl ComplexityEstimator {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Estimate intent and complexity. Low-confidence estimates are reported
    /// as [`RouteError::ClassificationAmbiguous`].
    pub fn estimate(&self, text: &str) -> Result<Classification, RouteError> {
        let estimate = self.analyze(text);
        if estimate.confidence < self.config.min_confidence {
            return Err(RouteError::ClassificationAmbiguous {
                confidence: estimate.confidence,
            });
        }
        Ok(estimate.classification)
    }

    pub fn analyze(&self, text: &str) -> Estimate {
        let features = extract_features(text);

        let length_points: u8 = match features.words {
            0..=12 => 0,
            13..=40 => 1,
            n if n < self.config.long_request_words => 2,
            _ => 3,
        };
        let step_points: u8 = match features.step_markers {
            0 => 0,
            1 => 1,
            2..=3 => 2,
            _ => 3,
        };
        let code_points: u8 = if features.fenced_code {
            2
        } else {
            features.code_markers.min(2) as u8
        };
        let data_points: u8 = u8::from(features.data_markers >= 2);
        let intent_points = features
            .intent
            .and_then(|intent| INTENT_KEYWORD_MAP.iter().find(|e| e.intent == intent))
            .map_or(0, |e| e.weight);

        let complexity =
            1 + length_points + step_points + code_points + data_points + intent_points;

        let fired = [
            length_points > 0,
            step_points > 0,
            code_points > 0,
            data_points > 0,
            features.intent.is_some(),
        ]
        .iter()
        .filter(|&&f| f)
        .count();
        let confidence = if features.words == 0 {
            0.0
        } else {
            let corroborated = if features.intent_hits >= 2 { 0.1 } else { 0.0 };
            (0.2 + 0.2 * fired as f64 + corroborated).min(1.0)
        };

        let intent = features
            .intent
            .map_or_else(|| self.config.default_intent.clone(), str::to_string);

        Estimate {
            classification: Classification::new(intent, complexity, false),
            confidence,
            features,
        }
    }

    pub fn needs_decomposition(&self, classification: &Classification) -> bool {
        classification.complexity >= self.config.decomposition_threshold
    }
}

fn word_tokens(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_list_item(trimmed: &str) -> bool {
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
        return true;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &trimmed[digits..];
    rest.starts_with(". ") || rest.starts_with(") ")
}

fn is_key_value(trimmed: &str) -> bool {
    let Some((key, value)) = trimmed.split_once(':') else {
        return false;
    };
    let key_ok = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    key_ok && value.starts_with(' ') && !value.trim().is_empty()
}

fn has_code_extension(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
    match word.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && CODE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn classify_intent(lower: &str, tokens: &[&str]) -> (Option<&'static str>, usize) {
    let mut best: Option<(&'static str, usize)> = None;
    for entry in INTENT_KEYWORD_MAP {
        let hits = entry
            .keywords
            .iter()
            .filter(|kw| {
                if kw.contains(' ') {
                    lower.contains(*kw)
                } else {
                    tokens
                        .iter()
                        .any(|t| t == *kw || (kw.len() >= 4 && t.starts_with(*kw)))
                }
            })
            .count();
        if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
            best = Some((entry.intent, hits));
        }
    }
    match best {
        Some((intent, hits)) => (Some(intent), hits),
        None => (None, 0),
    }
}

pub(crate) fn extract_features(text: &str) -> Features {
    let lower = text.to_lowercase();
    let tokens = word_tokens(&lower);

    let mut features = Features {
        words: text.split_whitespace().count(),
        fenced_code: text.contains("```"),
        ..Features::default()
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if is_list_item(trimmed) {
            features.step_markers += 1;
        }
        if trimmed.ends_with(';') || trimmed.contains('{') || trimmed.contains('}') {
            features.code_markers += 1;
        }
        if trimmed.contains("\":") || trimmed.matches('|').count() >= 2 || is_key_value(trimmed) {
            features.data_markers += 1;
        }
    }

    features.step_markers += tokens.iter().filter(|t| SEQUENCE_WORDS.contains(*t)).count();
    features.step_markers += lower.matches("after that").count();

    for marker in ["::", "fn ", "def ", "class ", "=>", "->"] {
        features.code_markers += text.matches(marker).count();
    }
    features.code_markers += text
        .split_whitespace()
        .filter(|w| has_code_extension(w))
        .count();

    let (intent, hits) = classify_intent(&lower, &tokens);
    features.intent = intent;
    features.intent_hits = hits;
    features
}
