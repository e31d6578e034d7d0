//! Analysis levels
//!
//! The four admission levels, each producing [`Finding`]s over a loaded
//! skill. Level 1 is always-on static analysis, Level 2 is the semantic
//! classifier, Level 3 is conditional sandboxed execution, Level 4 is
//! trust and provenance verification.

pub mod dynamic;
pub mod semantic;
pub mod static_analysis;
pub mod trust_check;

use serde::{Deserialize, Serialize};

/// One piece of evidence produced by an analysis level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Which level produced this (1-4)
    pub level: u8,
    /// Rule or check name
    pub name: String,
    /// Category (shell_execution, prompt_injection, sandbox_timeout, ...)
    pub category: String,
    /// Severity in [0.0, 1.0]
    pub severity: f64,
    /// File the evidence came from, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line number, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Human-readable description
    pub message: String,
    /// An inconclusive finding records that a check could not run; it
    /// carries no severity signal and is excluded from scoring.
    #[serde(default)]
    pub inconclusive: bool,
    /// Suggested mitigation, when the rule ships one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl Finding {
    pub fn new(
        level: u8,
        name: impl Into<String>,
        category: impl Into<String>,
        severity: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            name: name.into(),
            category: category.into(),
            severity,
            file: None,
            line: None,
            message: message.into(),
            inconclusive: false,
            mitigation: None,
        }
    }

    /// Mark this finding as inconclusive. Severity is zeroed since the
    /// check produced no evidence either way.
    pub fn inconclusive(mut self) -> Self {
        self.inconclusive = true;
        self.severity = 0.0;
        self
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<usize>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }

    /// Categories so operationally severe that the final tier must be at
    /// least High regardless of the weighted composite.
    pub fn forces_elevated_review(&self) -> bool {
        !self.inconclusive
            && matches!(
                self.category.as_str(),
                "sandbox_timeout" | "sandbox_crash" | "trust_verification_failed"
            )
    }
}
