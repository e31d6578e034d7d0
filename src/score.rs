//! Risk scoring
//!
//! Combines the per-level signals into one composite score and maps it
//! onto an action tier. Weights and tier boundaries are validated at
//! construction so scoring itself cannot fail.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::levels::Finding;

/// Component weights for the composite score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub pattern_severity: f64,
    pub permission_scope: f64,
    pub source_trust: f64,
    pub community_reports: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            pattern_severity: 0.40,
            permission_scope: 0.30,
            source_trust: 0.20,
            community_reports: 0.10,
        }
    }
}

impl Weights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let components: [(&'static str, f64); 4] = [
            ("pattern_severity", self.pattern_severity),
            ("permission_scope", self.permission_scope),
            ("source_trust", self.source_trust),
            ("community_reports", self.community_reports),
        ];
        for (name, w) in components {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::WeightOutOfRange(name));
            }
        }
        let sum = self.pattern_severity
            + self.permission_scope
            + self.source_trust
            + self.community_reports;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(ConfigError::BadWeightSum(sum));
        }
        Ok(())
    }
}

/// Tier boundaries. Lower bounds are inclusive: a score exactly on a
/// boundary lands in the higher tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
    /// Composite partial score at which dynamic analysis is triggered
    pub level3_trigger: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.6,
            critical: 0.8,
            level3_trigger: 0.35,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 1.0;
        if !ordered || !(0.0..=1.0).contains(&self.level3_trigger) {
            return Err(ConfigError::BadThresholds);
        }
        Ok(())
    }
}

/// Action tier for a scanned skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Low,
    Medium,
    High,
    Critical,
}

impl Classification {
    /// Recommended admission action for this tier
    pub fn action(&self) -> &'static str {
        match self {
            Classification::Low => "auto_approve",
            Classification::Medium => "manual_review",
            Classification::High => "blocked_pending_review",
            Classification::Critical => "rejected",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Classification::High | Classification::Critical)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Low => "low",
            Classification::Medium => "medium",
            Classification::High => "high",
            Classification::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Composite score with its inputs, kept for audit and reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub pattern_severity: f64,
    pub permission_scope: f64,
    pub source_trust: f64,
    pub community_reports: f64,
    pub composite: f64,
    pub classification: Classification,
    /// Set when a severe operational finding forced the tier upward
    pub elevated: bool,
}

/// Turns per-level findings into a classified composite score
#[derive(Debug, Clone)]
pub struct RiskAggregator {
    weights: Weights,
    thresholds: Thresholds,
}

impl RiskAggregator {
    pub fn new(weights: Weights, thresholds: Thresholds) -> Result<Self, ConfigError> {
        weights.validate()?;
        thresholds.validate()?;
        Ok(Self {
            weights,
            thresholds,
        })
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Load weights and thresholds from a TOML file. Either table may be
    /// omitted and falls back to the defaults.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct ScoringFile {
            weights: Option<Weights>,
            thresholds: Option<Thresholds>,
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let parsed: ScoringFile = toml::from_str(&raw).map_err(|e| ConfigError::Unparseable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::new(
            parsed.weights.unwrap_or_default(),
            parsed.thresholds.unwrap_or_default(),
        )
    }

    /// Maximum severity across conclusive Level 1-3 findings.
    /// Inconclusive findings carry no signal, and Level 4 findings act
    /// only through the trust component (and the High override), never
    /// through pattern severity.
    pub fn pattern_severity(findings: &[Finding]) -> f64 {
        findings
            .iter()
            .filter(|f| !f.inconclusive && f.level <= 3)
            .map(|f| f.severity)
            .fold(0.0, f64::max)
    }

    /// Partial composite from the two components available before
    /// dynamic analysis, used to decide whether to run it.
    pub fn partial_score(&self, pattern_severity: f64, permission_scope: f64) -> f64 {
        self.weights.pattern_severity * pattern_severity
            + self.weights.permission_scope * permission_scope
    }

    pub fn should_run_dynamic(&self, pattern_severity: f64, permission_scope: f64) -> bool {
        self.partial_score(pattern_severity, permission_scope) >= self.thresholds.level3_trigger
    }

    /// Compute the composite score and classify it. `trust` is the
    /// verified trust score in [0,1]; the component is its inversion.
    pub fn score(
        &self,
        findings: &[Finding],
        permission_scope: f64,
        trust: f64,
        community_reports: f64,
    ) -> RiskScore {
        let pattern_severity = Self::pattern_severity(findings);
        let source_trust = 1.0 - trust.clamp(0.0, 1.0);

        let composite = (self.weights.pattern_severity * pattern_severity
            + self.weights.permission_scope * permission_scope.clamp(0.0, 1.0)
            + self.weights.source_trust * source_trust
            + self.weights.community_reports * community_reports.clamp(0.0, 1.0))
        .clamp(0.0, 1.0);

        let mut classification = self.classify(composite);
        let mut elevated = false;

        // Severe operational failures must not be averaged away by the
        // weighted sum. Any finding that demands review pins the floor
        // at High.
        if findings.iter().any(Finding::forces_elevated_review)
            && classification < Classification::High
        {
            classification = Classification::High;
            elevated = true;
        }

        RiskScore {
            pattern_severity,
            permission_scope: permission_scope.clamp(0.0, 1.0),
            source_trust,
            community_reports: community_reports.clamp(0.0, 1.0),
            composite,
            classification,
            elevated,
        }
    }

    /// Map a composite score onto a tier. Boundaries are closed lower
    /// bounds: 0.3 is Medium, 0.6 is High, 0.8 is Critical.
    pub fn classify(&self, composite: f64) -> Classification {
        if composite >= self.thresholds.critical {
            Classification::Critical
        } else if composite >= self.thresholds.high {
            Classification::High
        } else if composite >= self.thresholds.medium {
            Classification::Medium
        } else {
            Classification::Low
        }
    }
}

impl Default for RiskAggregator {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            thresholds: Thresholds::default(),
        }
    }
}
