//! Scan Reports
//!
//! Collects ScanResults into a deterministic batch report: admission
//! counts, the high-risk view, and JSON / markdown renderings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::scanner::{ScanResult, ScanStatus};
use crate::score::Classification;

/// Admission counts for one batch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AdmissionCounts {
    /// Low: auto-approved
    pub passed: usize,
    /// Medium: flagged for review
    pub flagged: usize,
    /// High or Critical: blocked
    pub blocked: usize,
}

/// Compact entry for skills that warrant attention first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighRiskSkill {
    pub name: String,
    pub score: f64,
    pub top_category: String,
}

/// Deterministic batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_skills: usize,
    #[serde(rename = "results")]
    pub counts: AdmissionCounts,
    pub high_risk_skills: Vec<HighRiskSkill>,
    pub skills: Vec<ScanResult>,
}

impl ScanReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Skill Scan Report `{}`\n\n", self.scan_id));
        out.push_str(&format!(
            "- Scanned: {} skills at {}\n- Passed: {}\n- Flagged: {}\n- Blocked: {}\n",
            self.total_skills,
            self.timestamp.to_rfc3339(),
            self.counts.passed,
            self.counts.flagged,
            self.counts.blocked,
        ));

        if !self.high_risk_skills.is_empty() {
            out.push_str("\n## High-risk skills\n\n");
            for entry in &self.high_risk_skills {
                out.push_str(&format!(
                    "- **{}** — score {:.2}, dominant category `{}`\n",
                    entry.name, entry.score, entry.top_category
                ));
            }
        }

        let issues = most_common_issues(&self.skills, 5);
        if !issues.is_empty() {
            out.push_str("\n## Most common issues\n\n");
            for (category, count) in issues {
                out.push_str(&format!("- `{category}`: {count}\n"));
            }
        }

        out.push_str("\n## Results\n\n");
        out.push_str("| skill | version | tier | score | status | action |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for result in &self.skills {
            out.push_str(&format!(
                "| {} | {} | {} | {:.2} | {} | {} |\n",
                result.skill_name,
                result.skill_version,
                result.score.classification,
                result.score.composite,
                status_label(result.status),
                result.score.classification.action(),
            ));
        }
        out
    }
}

fn status_label(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Completed => "completed",
        ScanStatus::PartiallyDegraded => "partially_degraded",
        ScanStatus::Failed => "failed",
    }
}

/// Builds a ScanReport from results that may arrive in any order
#[derive(Debug, Default)]
pub struct ReportBuilder {
    results: Vec<ScanResult>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: ScanResult) -> &mut Self {
        self.results.push(result);
        self
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ScanResult>) -> &mut Self {
        self.results.extend(results);
        self
    }

    /// Finalize the report. Results are re-sorted by classification
    /// (worst first), then by skill name, so completion order never
    /// leaks into the output.
    pub fn build(mut self) -> ScanReport {
        self.results.sort_by(|a, b| {
            b.score
                .classification
                .cmp(&a.score.classification)
                .then_with(|| a.skill_name.cmp(&b.skill_name))
        });

        let mut counts = AdmissionCounts::default();
        for result in &self.results {
            match result.score.classification {
                Classification::Low => counts.passed += 1,
                Classification::Medium => counts.flagged += 1,
                Classification::High | Classification::Critical => counts.blocked += 1,
            }
        }

        let high_risk_skills = self
            .results
            .iter()
            .filter(|r| r.score.composite >= 0.6 || r.score.classification >= Classification::High)
            .map(|r| HighRiskSkill {
                name: r.skill_name.clone(),
                score: r.score.composite,
                top_category: top_category(r),
            })
            .collect();

        ScanReport {
            scan_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_skills: self.results.len(),
            counts,
            high_risk_skills,
            skills: self.results,
        }
    }
}

/// Category of the most severe conclusive finding
fn top_category(result: &ScanResult) -> String {
    result
        .findings
        .iter()
        .filter(|f| !f.inconclusive)
        .max_by(|a, b| a.severity.total_cmp(&b.severity))
        .map(|f| f.category.clone())
        .unwrap_or_else(|| "none".to_string())
}

/// Conclusive finding categories ranked by frequency across the batch
fn most_common_issues(results: &[ScanResult], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for result in results {
        for finding in result.findings.iter().filter(|f| !f.inconclusive) {
            *counts.entry(finding.category.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(category, count)| (category.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}
