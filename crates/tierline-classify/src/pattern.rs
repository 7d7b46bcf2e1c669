//! Fast-path pattern matching
//!
//! Command prefixes live in a character trie so a lookup costs one walk over
//! the request text. Operator patterns are anchored regexes tried in order
//! after the trie misses.

use regex::Regex;
use std::collections::HashMap;
use tierline_core::{Classification, PatternKind, PatternSpec};

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    rule: Option<usize>,
}

#[derive(Debug, Clone)]
struct Rule {
    intent: String,
    complexity: u8,
    handler: Option<String>,
}

impl Rule {
    fn classification(&self) -> Classification {
        let mut classification = Classification::new(self.intent.clone(), self.complexity, true);
        classification.handler = self.handler.clone();
        classification
    }
}

#[derive(Debug, Default)]
pub struct PatternClassifier {
    root: TrieNode,
    operators: Vec<(Regex, usize)>,
    rules: Vec<Rule>,
}

impl PatternClassifier {
    /// Build from specs. Malformed specs are skipped with a warning.
    pub fn new(specs: &[PatternSpec]) -> Self {
        let mut classifier = Self::default();
        for spec in specs {
            if let Err(reason) = classifier.add(spec) {
                tracing::warn!(
                    pattern = %spec.pattern,
                    reason = %reason,
                    "skipping malformed pattern"
                );
            }
        }
        classifier
    }

    fn add(&mut self, spec: &PatternSpec) -> Result<(), String> {
        if spec.pattern.trim().is_empty() {
            return Err("empty pattern".to_string());
        }
        if spec.intent.trim().is_empty() {
            return Err("blank intent".to_string());
        }
        if !(1..=10).contains(&spec.complexity) {
            return Err(format!("complexity {} outside 1..=10", spec.complexity));
        }

        let rule = Rule {
            intent: spec.intent.clone(),
            complexity: spec.complexity,
            handler: spec.handler.clone(),
        };

        match spec.kind {
            PatternKind::Prefix => {
                let index = self.rules.len();
                let mut node = &mut self.root;
                for ch in spec.pattern.trim().to_lowercase().chars() {
                    node = node.children.entry(ch).or_default();
                }
                // First registration of a prefix wins
                if node.rule.is_none() {
                    node.rule = Some(index);
                }
                self.rules.push(rule);
            }
            PatternKind::Operator => {
                // Wrapped so every alternation branch is anchored
                let source = format!("^(?:{})", spec.pattern);
                let regex = Regex::new(&source).map_err(|e| e.to_string())?;
                self.operators.push((regex, self.rules.len()));
                self.rules.push(rule);
            }
        }
        Ok(())
    }

    /// Match `text` against the configured patterns. The longest matching
    /// prefix wins; operator patterns are tried only when no prefix matches.
    pub fn classify(&self, text: &str) -> Option<Classification> {
        let text = text.trim_start();
        if text.is_empty() {
            return None;
        }

        if let Some(index) = self.longest_prefix(text) {
            return self.rules.get(index).map(Rule::classification);
        }

        self.operators
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .and_then(|(_, index)| self.rules.get(*index))
            .map(Rule::classification)
    }

    fn longest_prefix(&self, text: &str) -> Option<usize> {
        let mut node = &self.root;
        let mut best = None;
        let mut chars = text.chars().flat_map(char::to_lowercase).peekable();

        while let Some(ch) = chars.next() {
            match node.children.get(&ch) {
                Some(next) => node = next,
                None => break,
            }
            if let Some(index) = node.rule {
                let at_boundary = chars.peek().map_or(true, |c| !c.is_alphanumeric());
                if at_boundary {
                    best = Some(index);
                }
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_case_insensitive_on_word_boundary() {
        let classifier = PatternClassifier::new(&[PatternSpec::prefix("format", "format", 1)]);
        assert!(classifier.classify("Format this file").is_some());
        assert!(classifier.classify("  format").is_some());
        assert!(classifier.classify("format: src/main.rs").is_some());
        assert!(classifier.classify("formatting rules are weird").is_none());
        assert!(classifier.classify("please format this").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let classifier = PatternClassifier::new(&[
            PatternSpec::prefix("run", "run", 2),
            PatternSpec::prefix("run tests", "test", 1).with_handler("test-runner"),
        ]);

        let c = classifier.classify("run tests for auth").unwrap();
        assert_eq!(c.intent, "test");
        assert_eq!(c.handler.as_deref(), Some("test-runner"));
        assert!(c.fast_path);

        let c = classifier.classify("run the linter").unwrap();
        assert_eq!(c.intent, "run");
    }

    #[test]
    fn test_operator_patterns_are_anchored() {
        let classifier =
            PatternClassifier::new(&[PatternSpec::operator(r"/[a-z]+(\s|$)", "command", 2)]);
        assert_eq!(classifier.classify("/deploy staging").unwrap().intent, "command");
        assert!(classifier.classify("please /deploy").is_none());
    }

    #[test]
    fn test_operator_alternation_anchored_on_every_branch() {
        let classifier =
            PatternClassifier::new(&[PatternSpec::operator(r"^/build|/test", "command", 2)]);
        assert!(classifier.classify("/build release").is_some());
        assert!(classifier.classify("/test auth").is_some());
        assert!(classifier.classify("please /test auth").is_none());
        assert!(classifier.classify("why does /build fail").is_none());
    }

    #[test]
    fn test_malformed_specs_skipped() {
        let classifier = PatternClassifier::new(&[
            PatternSpec::operator(r"([unclosed", "broken", 2),
            PatternSpec::prefix("", "empty", 1),
            PatternSpec::prefix("lint", "lint", 11),
            PatternSpec::prefix("check", " ", 1),
            PatternSpec::prefix("format", "format", 1),
        ]);
        assert_eq!(classifier.len(), 1);
        assert!(classifier.classify("lint everything").is_none());
        assert!(classifier.classify("format it").is_some());
    }

    #[test]
    fn test_no_patterns_never_matches() {
        let classifier = PatternClassifier::new(&[]);
        assert!(classifier.is_empty());
        assert!(classifier.classify("format this file").is_none());
    }
}
