//! Level 2: semantic analysis
//!
//! Hands the skill text to the intent classifier and maps labeled intents
//! onto findings. The level is degradable: any classifier failure yields a
//! single inconclusive finding and never stalls the pipeline.

use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::levels::Finding;
use crate::skill::Skill;

/// Level 2 output
#[derive(Debug, Clone)]
pub struct SemanticReport {
    pub findings: Vec<Finding>,
    /// False when the classifier could not deliver a verdict
    pub conclusive: bool,
}

/// Severity assigned to each intent label the classifier can emit.
/// Unknown labels get a cautious middle severity rather than zero.
fn label_severity(label: &str) -> f64 {
    match label {
        "benign" => 0.0,
        "data_collection" => 0.40,
        "code_execution" => 0.70,
        "shell_execution" => 0.75,
        "prompt_injection" => 0.85,
        "credential_theft" => 0.90,
        "exfiltration" => 0.85,
        "sabotage" => 0.95,
        _ => 0.50,
    }
}

pub struct SemanticAnalyzer<'a> {
    classifier: &'a dyn Classifier,
    max_content_bytes: usize,
    confidence_floor: f64,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        max_content_bytes: usize,
        confidence_floor: f64,
    ) -> Self {
        Self {
            classifier,
            max_content_bytes,
            confidence_floor,
        }
    }

    pub async fn analyze(&self, skill: &Skill) -> SemanticReport {
        let mut findings = Vec::new();

        let text = if skill.content.len() > self.max_content_bytes {
            findings.push(Finding::new(
                2,
                "truncated_for_analysis",
                "truncated_for_analysis",
                0.0,
                format!(
                    "skill text truncated from {} to {} bytes for classification",
                    skill.content.len(),
                    self.max_content_bytes
                ),
            ));
            truncate_at_boundary(&skill.content, self.max_content_bytes)
        } else {
            skill.content.as_str()
        };

        match self.classifier.classify(text).await {
            Ok(report) => {
                for intent in &report.labels {
                    if intent.confidence < self.confidence_floor || intent.label == "benign" {
                        continue;
                    }
                    let severity = label_severity(&intent.label) * intent.confidence;
                    findings.push(Finding::new(
                        2,
                        format!("intent_{}", intent.label),
                        intent.label.clone(),
                        severity,
                        format!(
                            "classifier flagged intent '{}' with confidence {:.2}: {}",
                            intent.label, intent.confidence, report.summary
                        ),
                    ));
                }
                debug!(skill = %skill.name, findings = findings.len(), "semantic analysis complete");
                SemanticReport {
                    findings,
                    conclusive: true,
                }
            }
            Err(e) => {
                warn!(skill = %skill.name, error = %e, "semantic analysis unavailable");
                findings.push(
                    Finding::new(
                        2,
                        "semantic_analysis_unavailable",
                        "semantic_analysis_unavailable",
                        0.0,
                        format!("intent classification could not complete: {e}"),
                    )
                    .inconclusive(),
                );
                SemanticReport {
                    findings,
                    conclusive: false,
                }
            }
        }
    }
}

/// Truncate at a char boundary at or below `max` bytes
fn truncate_at_boundary(text: &str, max: usize) -> &str {
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
