//! Level 1: static analysis
//!
//! Pattern matching over every text file in the skill bundle plus a
//! metadata schema validator. Always completes synchronously and always
//! returns a report, even for a bundle full of unreadable files.

use tracing::debug;

use crate::levels::Finding;
use crate::patterns::PatternLibrary;
use crate::skill::Skill;

/// Risk labels accepted in frontmatter
pub const VALID_RISK_LABELS: &[&str] = &["none", "safe", "critical", "offensive"];

/// Disclaimer required on skills declared offensive
pub const OFFENSIVE_DISCLAIMER: &str = "AUTHORIZED USE ONLY";

/// Level 1 output
#[derive(Debug, Clone)]
pub struct StaticReport {
    pub findings: Vec<Finding>,
    /// Permission scope component in [0,1], from declared permissions
    /// with the risk label as fallback
    pub permission_scope_score: f64,
}

/// Static analyzer over a shared pattern library
pub struct StaticAnalyzer<'a> {
    patterns: &'a PatternLibrary,
}

impl<'a> StaticAnalyzer<'a> {
    pub fn new(patterns: &'a PatternLibrary) -> Self {
        Self { patterns }
    }

    pub fn analyze(&self, skill: &Skill) -> StaticReport {
        let mut findings = Vec::new();

        self.check_metadata(skill, &mut findings);
        self.match_patterns(skill, &mut findings);

        for path in &skill.unreadable {
            findings.push(
                Finding::new(
                    1,
                    "unreadable_source",
                    "unreadable_source",
                    0.30,
                    format!("source file could not be read as text: {}", path.display()),
                )
                .at(path.display().to_string(), None),
            );
        }

        let permission_scope_score = permission_scope(skill, &mut findings);

        // Declared offensive tooling that carries the authorization
        // disclaimer is expected to trip tool-shaped rules; cap those so
        // the declaration is not punished twice.
        if skill.is_offensive() && skill.has_disclaimer() {
            for f in findings.iter_mut() {
                let tool_shaped = matches!(
                    f.category.as_str(),
                    "credential_access" | "network_exfiltration" | "privilege_escalation"
                );
                if f.level == 1 && tool_shaped && f.severity > 0.65 {
                    f.severity = 0.65;
                }
            }
        }

        debug!(
            skill = %skill.name,
            findings = findings.len(),
            permission_scope = permission_scope_score,
            "static analysis complete"
        );

        StaticReport {
            findings,
            permission_scope_score,
        }
    }

    fn check_metadata(&self, skill: &Skill, findings: &mut Vec<Finding>) {
        let meta = &skill.metadata;

        if !meta.contains("name") || !meta.contains("description") {
            findings.push(Finding::new(
                1,
                "missing_required_field",
                "metadata",
                0.30,
                "frontmatter is missing a required field (name, description)",
            ));
        }

        let folder = skill
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(declared) = meta.get("name") {
            if !folder.is_empty() && declared != folder {
                findings.push(Finding::new(
                    1,
                    "name_mismatch",
                    "metadata",
                    0.20,
                    format!("declared name '{declared}' does not match directory name '{folder}'"),
                ));
            }
        }

        match meta.get("risk") {
            None => {
                findings.push(Finding::new(
                    1,
                    "missing_risk",
                    "metadata",
                    0.35,
                    "frontmatter does not declare a risk label",
                ));
            }
            Some(risk) if !VALID_RISK_LABELS.contains(&risk) => {
                findings.push(Finding::new(
                    1,
                    "invalid_risk",
                    "metadata",
                    0.40,
                    format!("unrecognized risk label '{risk}'"),
                ));
            }
            Some(_) => {}
        }

        if !meta.contains("source") {
            findings.push(Finding::new(
                1,
                "missing_source",
                "metadata",
                0.15,
                "frontmatter does not declare a source",
            ));
        }

        if skill.is_offensive() && !skill.has_disclaimer() {
            findings.push(
                Finding::new(
                    1,
                    "missing_disclaimer",
                    "metadata",
                    0.90,
                    format!("offensive skill lacks the '{OFFENSIVE_DISCLAIMER}' disclaimer"),
                )
                .with_mitigation(format!(
                    "add a prominent '{OFFENSIVE_DISCLAIMER}' disclaimer to SKILL.md"
                )),
            );
        }
    }

    fn match_patterns(&self, skill: &Skill, findings: &mut Vec<Finding>) {
        let manifest = skill.path.join("SKILL.md");
        let mut texts: Vec<(String, &str)> =
            vec![(manifest.display().to_string(), skill.content.as_str())];
        for (path, text) in &skill.sources {
            texts.push((path.display().to_string(), text.as_str()));
        }

        for (file, text) in texts {
            for m in self.patterns.match_text(text) {
                findings.push(
                    Finding {
                        level: 1,
                        name: m.rule.name.clone(),
                        category: m.rule.category.clone(),
                        severity: m.rule.severity,
                        file: None,
                        line: None,
                        message: format!("{}: {}", m.rule.message, m.snippet),
                        inconclusive: false,
                        mitigation: m.rule.mitigation.clone(),
                    }
                    .at(file.clone(), Some(m.line)),
                );
            }
        }
    }
}

/// Derive the permission scope component. Declared permissions are
/// bucketed individually; the declared risk label sets a floor when it
/// implies broader access than the explicit list does.
fn permission_scope(skill: &Skill, findings: &mut Vec<Finding>) -> f64 {
    let mut score: f64 = 0.0;

    for perm in skill.metadata.permissions() {
        let bucket = match perm.as_str() {
            "shell" | "process" | "exec" => 0.9,
            "filesystem" | "filesystem:write" => 0.7,
            "network" => 0.6,
            "env" | "environment" => 0.5,
            "filesystem:read" => 0.4,
            _ => 0.3,
        };
        if bucket >= 0.6 {
            findings.push(Finding::new(
                1,
                "broad_permission",
                "permission_scope",
                bucket,
                format!("skill declares high-privilege permission '{perm}'"),
            ));
        }
        score = score.max(bucket);
    }

    let risk_floor = match skill.metadata.risk() {
        "none" => 0.0,
        "safe" => 0.2,
        "critical" => 0.6,
        "offensive" => 0.9,
        _ => 0.5,
    };

    score.max(risk_floor)
}
