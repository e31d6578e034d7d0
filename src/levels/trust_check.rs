//! Level 4: trust verification
//!
//! Checks the skill's provenance: detached signature against the trust
//! store key, publisher allowlist status, and source attribution. Always
//! runs and is cheap. Every verification is appended to a JSONL audit
//! trail when one is configured.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::levels::Finding;
use crate::skill::Skill;
use crate::trust::TrustStore;

/// Sources under these prefixes are considered first-party enough to
/// carry no attribution risk.
const TRUSTED_SOURCE_DOMAINS: &[&str] = &[
    "github.com/anthropics",
    "github.com/google",
    "github.com/microsoft",
    "github.com/openai",
];

/// How the signature check resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    /// Valid signature from an allowlisted publisher
    VerifiedAllowlisted,
    /// Valid signature from a known but unlisted publisher
    Verified,
    /// Signature present but it does not check out
    Tampered,
    /// No signature, publisher is in the store
    UnsignedKnown,
    /// No signature, publisher is not in the store
    UnsignedUnknown,
}

/// Level 4 output
#[derive(Debug, Clone)]
pub struct TrustReport {
    pub findings: Vec<Finding>,
    /// Verified trust in [0,1]; 1.0 = signed and allowlisted
    pub trust_score: f64,
    pub signature_state: SignatureState,
    /// SHA-256 of SKILL.md, hex
    pub content_hash: String,
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    skill_name: &'a str,
    skill_path: String,
    publisher: &'a str,
    content_hash: &'a str,
    signature_state: SignatureState,
    trust_score: f64,
    findings_count: usize,
    max_severity: f64,
}

pub struct TrustVerifier<'a> {
    store: &'a dyn TrustStore,
    audit_log_path: Option<&'a PathBuf>,
}

impl<'a> TrustVerifier<'a> {
    pub fn new(store: &'a dyn TrustStore, audit_log_path: Option<&'a PathBuf>) -> Self {
        Self {
            store,
            audit_log_path,
        }
    }

    pub fn verify(&self, skill: &Skill) -> TrustReport {
        let mut findings = Vec::new();
        let content_hash = content_hash(&skill.content);
        let publisher = skill.metadata.publisher();

        let (signature_state, trust_score) = self.verify_signature(skill, publisher, &mut findings);
        verify_source(skill, &mut findings);

        debug!(
            skill = %skill.name,
            publisher,
            state = ?signature_state,
            trust = trust_score,
            "trust verification complete"
        );

        let report = TrustReport {
            findings,
            trust_score,
            signature_state,
            content_hash,
        };
        self.append_audit(skill, publisher, &report);
        report
    }

    fn verify_signature(
        &self,
        skill: &Skill,
        publisher: &str,
        findings: &mut Vec<Finding>,
    ) -> (SignatureState, f64) {
        let record = if publisher.is_empty() || publisher == "unknown" {
            None
        } else {
            self.store.lookup(publisher)
        };

        match (&skill.signature, record) {
            (Some(signature), Some(record)) => {
                if signature_matches(signature, &record.key, &skill.content) {
                    if record.allowlisted {
                        (SignatureState::VerifiedAllowlisted, 1.0)
                    } else {
                        findings.push(Finding::new(
                            4,
                            "unlisted_publisher",
                            "unlisted_publisher",
                            0.20,
                            format!("publisher '{publisher}' is known but not allowlisted"),
                        ));
                        (SignatureState::Verified, 0.6)
                    }
                } else {
                    findings.push(
                        Finding::new(
                            4,
                            "trust_verification_failed",
                            "trust_verification_failed",
                            0.85,
                            format!(
                                "signature from '{publisher}' does not match the skill content"
                            ),
                        )
                        .with_mitigation("re-sign the skill or reject it as tampered"),
                    );
                    (SignatureState::Tampered, 0.0)
                }
            }
            (Some(_), None) => {
                // A signature that cannot be checked against any key is
                // indistinguishable from a forged one.
                findings.push(Finding::new(
                    4,
                    "trust_verification_failed",
                    "trust_verification_failed",
                    0.85,
                    format!("signature present but publisher '{publisher}' has no key on record"),
                ));
                (SignatureState::Tampered, 0.0)
            }
            (None, Some(_)) => {
                findings.push(
                    Finding::new(
                        4,
                        "missing_signature",
                        "missing_signature",
                        0.30,
                        "no SKILL.md.sig found for a known publisher",
                    )
                    .with_mitigation("publish a detached signature alongside SKILL.md"),
                );
                (SignatureState::UnsignedKnown, 0.4)
            }
            (None, None) => {
                findings.push(Finding::new(
                    4,
                    "unknown_publisher",
                    "unknown_publisher",
                    0.40,
                    format!("publisher '{publisher}' is not in the trust store and the skill is unsigned"),
                ));
                (SignatureState::UnsignedUnknown, 0.0)
            }
        }
    }

    fn append_audit(&self, skill: &Skill, publisher: &str, report: &TrustReport) {
        let Some(path) = self.audit_log_path else {
            return;
        };

        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            skill_name: &skill.name,
            skill_path: skill.path.display().to_string(),
            publisher,
            content_hash: &report.content_hash,
            signature_state: report.signature_state,
            trust_score: report.trust_score,
            findings_count: report.findings.len(),
            max_severity: report
                .findings
                .iter()
                .map(|f| f.severity)
                .fold(0.0, f64::max),
        };

        if let Err(e) = write_audit_line(path, &entry) {
            warn!(path = %path.display(), error = %e, "failed to append audit entry");
        }
    }
}

fn write_audit_line(path: &Path, entry: &AuditEntry<'_>) -> std::io::Result<()> {
    let line = serde_json::to_string(entry)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

/// Attribution findings mirror the source taxonomy: self-attributed work
/// is near-neutral, external sources carry some risk, no attribution is
/// worse. Missing `source` entirely is already flagged at Level 1.
fn verify_source(skill: &Skill, findings: &mut Vec<Finding>) {
    let source = skill.metadata.source();

    if source.is_empty() || source == "unknown" {
        findings.push(
            Finding::new(
                4,
                "unknown_source",
                "source_attribution",
                0.40,
                "skill has no source attribution",
            )
            .with_mitigation("add a 'source' field with a URL, or 'self' for original work"),
        );
    } else if source == "self" {
        findings.push(Finding::new(
            4,
            "self_attributed",
            "source_attribution",
            0.10,
            "skill is self-attributed original work",
        ));
    } else if source.starts_with("http") {
        let trusted = TRUSTED_SOURCE_DOMAINS.iter().any(|d| source.contains(d));
        if !trusted {
            findings.push(Finding::new(
                4,
                "external_source",
                "source_attribution",
                0.20,
                format!("source is an external repository: {}", truncate(source, 50)),
            ));
        }
    }
}

/// Keyed content digest: hex(sha256(key || content))
fn signature_matches(signature: &str, key: &str, content: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(content.as_bytes());
    let expected = hex::encode(hasher.finalize());
    signature.trim().eq_ignore_ascii_case(&expected)
}

/// Hex SHA-256 of the manifest content, recorded in the audit trail
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Produce a valid signature for `content` under `key`. Used by signing
/// tooling and tests.
pub fn sign_content(key: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
