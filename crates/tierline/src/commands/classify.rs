use super::Workspace;
use serde_json::json;
use tierline_classify::{Classifier, ComplexityEstimator};
use tierline_telemetry::Paths;

pub fn run(paths: &Paths, text: &str) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let classifier = Classifier::new(workspace.config.classifier.clone());
    let classification = classifier.classify(text);
    let estimate = ComplexityEstimator::new(workspace.config.classifier.clone()).analyze(text);

    let output = json!({
        "needs_decomposition": classifier.needs_decomposition(&classification),
        "classification": classification,
        "estimate": estimate,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
