//! Request classification: deterministic fast-path patterns with a lexical
//! complexity estimate as fallback

mod complexity;
mod pattern;

pub use complexity::{ComplexityEstimator, Estimate, Features};
pub use pattern::PatternClassifier;

use tierline_core::{Classification, ClassifierConfig, RouteError};

/// Pattern match first, then the complexity estimate, then mid-tier defaults
#[derive(Debug)]
pub struct Classifier {
    patterns: PatternClassifier,
    estimator: ComplexityEstimator,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            patterns: PatternClassifier::new(&config.patterns),
            estimator: ComplexityEstimator::new(config.clone()),
            config,
        }
    }

    pub fn classify(&self, text: &str) -> Classification {
        if let Some(classification) = self.patterns.classify(text) {
            tracing::debug!(intent = %classification.intent, "fast-path match");
            return classification;
        }

        match self.estimator.estimate(text) {
            Ok(classification) => classification,
            Err(RouteError::ClassificationAmbiguous { confidence }) => {
                tracing::debug!(confidence, "ambiguous request, using defaults");
                self.fallback()
            }
            Err(e) => {
                tracing::warn!(error = %e, "unexpected classification error, using defaults");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Classification {
        Classification::new(
            self.config.default_intent.clone(),
            self.config.default_complexity,
            false,
        )
    }

    /// Whether the caller should split the request before routing it
    pub fn needs_decomposition(&self, classification: &Classification) -> bool {
        self.estimator.needs_decomposition(classification)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_beats_estimate() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify("format this file");
        assert!(c.fast_path);
        assert_eq!(c.intent, "format");
        assert_eq!(c.complexity, 1);
    }

    #[test]
    fn test_ambiguous_falls_back_to_mid_tier() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify("hmm");
        assert!(!c.fast_path);
        assert_eq!(c.intent, "general");
        assert_eq!(c.complexity, 5);
    }

    #[test]
    fn test_estimated_request() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify("fix the login bug");
        assert!(!c.fast_path);
        assert_eq!(c.intent, "bugfix");
        assert!(c.complexity <= 3);
        assert!(!classifier.needs_decomposition(&c));
    }
}
