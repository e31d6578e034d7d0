//! Scanner Integration Tests
//!
//! End-to-end pipeline tests over real skill bundles on disk, with
//! deterministic classifier, sandbox, and trust store substitutes.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use skillgate::levels::trust_check::sign_content;
use skillgate::{
    Classification, Classifier, ClassifierError, Config, ExecutionTrace, FileTrustStore,
    IntentLabel, IntentReport, PatternLibrary, PublisherRecord, ReportBuilder, RiskAggregator,
    SandboxError, SandboxRunner, SandboxState, ScanStatus, Scanner,
};

struct FakeClassifier {
    labels: Vec<(&'static str, f64)>,
    fail: bool,
}

impl FakeClassifier {
    fn benign() -> Self {
        Self {
            labels: Vec::new(),
            fail: false,
        }
    }

    fn down() -> Self {
        Self {
            labels: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _text: &str) -> Result<IntentReport, ClassifierError> {
        if self.fail {
            return Err(ClassifierError::Timeout(Duration::from_secs(1)));
        }
        Ok(IntentReport {
            labels: self
                .labels
                .iter()
                .map(|(label, confidence)| IntentLabel {
                    label: label.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            summary: "fake verdict".to_string(),
        })
    }
}

struct FakeSandbox {
    state: SandboxState,
}

#[async_trait]
impl SandboxRunner for FakeSandbox {
    async fn run(&self, _language: &str, _code: &str) -> Result<ExecutionTrace, SandboxError> {
        Ok(ExecutionTrace {
            state: self.state,
            exit_code: if self.state == SandboxState::Completed {
                Some(0)
            } else {
                None
            },
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            duration: Duration::from_millis(1),
        })
    }
}

fn trust_store() -> FileTrustStore {
    FileTrustStore::from_records(vec![PublisherRecord {
        name: "acme".to_string(),
        key: "acme-key".to_string(),
        allowlisted: true,
    }])
    .expect("valid trust store")
}

fn write_skill(dir: &TempDir, name: &str, frontmatter: &str, body: &str) -> PathBuf {
    let skill_dir = dir.path().join(name);
    std::fs::create_dir(&skill_dir).expect("create skill dir");
    std::fs::write(
        skill_dir.join("SKILL.md"),
        format!("---\n{frontmatter}\n---\n{body}\n"),
    )
    .expect("write manifest");
    skill_dir
}

fn sign_skill(skill_dir: &PathBuf, key: &str) {
    let content = std::fs::read_to_string(skill_dir.join("SKILL.md")).expect("read manifest");
    std::fs::write(skill_dir.join("SKILL.md.sig"), sign_content(key, &content))
        .expect("write signature");
}

fn scanner(classifier: Arc<dyn Classifier>, sandbox: Arc<dyn SandboxRunner>) -> Scanner {
    Scanner::new(
        Config::default(),
        PatternLibrary::builtin(),
        classifier,
        sandbox,
        Arc::new(trust_store()),
        RiskAggregator::default(),
    )
}

fn completed_sandbox() -> Arc<dyn SandboxRunner> {
    Arc::new(FakeSandbox {
        state: SandboxState::Completed,
    })
}

/// Clean skill, signed by an allowlisted publisher: every component is
/// zero and the skill is auto-approved.
#[tokio::test]
async fn scenario_clean_signed_skill_is_low() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "date-formatter",
        "name: date-formatter\ndescription: formats dates\nrisk: none\nsource: https://github.com/anthropics/skills\npublisher: acme",
        "Formats dates. Nothing else.",
    );
    sign_skill(&skill_dir, "acme-key");

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let result = scanner.scan_path(&skill_dir).await;

    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.score.composite, 0.0);
    assert_eq!(result.score.classification, Classification::Low);
    assert_eq!(result.score.classification.action(), "auto_approve");
}

/// Shell-execution pattern (0.9) plus a fully untrusted publisher:
/// 0.40*0.9 + 0.30*0 + 0.20*1.0 + 0.10*0 = 0.56, Medium.
#[tokio::test]
async fn scenario_shell_pattern_unsigned_is_medium() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "runner",
        "name: runner\ndescription: runs things\nrisk: none\nsource: self\npublisher: nobody",
        "Use `subprocess.run(['ls'])` to list files.",
    );

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let result = scanner.scan_path(&skill_dir).await;

    // The unknown-publisher finding is Level 4 and stays out of the
    // pattern component; it acts through trust (0.0) alone.
    assert!((result.score.pattern_severity - 0.9).abs() < 1e-9);
    assert!((result.score.source_trust - 1.0).abs() < 1e-9);
    assert!((result.score.composite - 0.56).abs() < 1e-9);
    assert_eq!(result.score.classification, Classification::Medium);
}

/// Clean content from an unknown, unsigned publisher: the trust findings
/// act only through the trust component, so the skill stays Low
/// (0.40*0 + 0.30*0 + 0.20*1.0 + 0.10*0 = 0.20) instead of being
/// double-counted into Medium.
#[tokio::test]
async fn scenario_clean_unsigned_skill_is_low() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "date-formatter",
        "name: date-formatter\ndescription: formats dates\nrisk: none\nsource: https://github.com/anthropics/skills\npublisher: nobody",
        "Formats dates. Nothing else.",
    );

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let result = scanner.scan_path(&skill_dir).await;

    assert!(result
        .findings
        .iter()
        .any(|f| f.category == "unknown_publisher"));
    assert_eq!(result.score.pattern_severity, 0.0);
    assert!((result.score.composite - 0.20).abs() < 1e-9);
    assert_eq!(result.score.classification, Classification::Low);
}

/// Same skill, but the sandbox run crashes: the numeric score stays at
/// 0.56 territory yet the crash override forces at least High.
#[tokio::test]
async fn scenario_sandbox_crash_forces_high() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "runner",
        "name: runner\ndescription: runs things\nrisk: none\nsource: self\npublisher: nobody",
        "Run:\n\n```sh\nsh -c 'ls -la && id'\n```",
    );

    let scanner = scanner(
        Arc::new(FakeClassifier::benign()),
        Arc::new(FakeSandbox {
            state: SandboxState::Crashed,
        }),
    );
    let result = scanner.scan_path(&skill_dir).await;

    assert!(result.level3_executed);
    assert_eq!(result.sandbox_terminal, Some(SandboxState::Crashed));
    assert!(result.score.classification >= Classification::High);
    assert!(result
        .findings
        .iter()
        .any(|f| f.category == "sandbox_crash" && f.severity == 0.9));
}

/// Classifier down on every retry: exactly one inconclusive finding,
/// status PartiallyDegraded, and the rest of the pipeline still runs.
#[tokio::test]
async fn scenario_classifier_outage_degrades_gracefully() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "demo",
        "name: demo\ndescription: d\nrisk: none\nsource: self\npublisher: acme",
        "Harmless body.",
    );
    sign_skill(&skill_dir, "acme-key");

    let scanner = scanner(Arc::new(FakeClassifier::down()), completed_sandbox());
    let result = scanner.scan_path(&skill_dir).await;

    assert_eq!(result.status, ScanStatus::PartiallyDegraded);
    let unavailable: Vec<_> = result
        .findings
        .iter()
        .filter(|f| f.category == "semantic_analysis_unavailable")
        .collect();
    assert_eq!(unavailable.len(), 1);
    assert!(unavailable[0].inconclusive);
    assert_eq!(unavailable[0].severity, 0.0);
    // The outage alone does not penalize a clean, trusted skill
    assert_eq!(result.score.classification, Classification::Low);
}

/// 50 skills with parallelism 4: one result per skill regardless of
/// completion order, and the report counts sum to the batch size.
#[tokio::test]
async fn scenario_large_batch_accounts_for_every_skill() {
    let dir = TempDir::new().expect("tempdir");
    let mut dirs = Vec::new();
    for i in 0..50 {
        let frontmatter = format!(
            "name: skill-{i:02}\ndescription: d\nrisk: none\nsource: self\npublisher: acme"
        );
        let body = if i % 7 == 0 {
            "Run `eval(input())` for fun."
        } else {
            "Plain instructions."
        };
        let skill_dir = write_skill(&dir, &format!("skill-{i:02}"), &frontmatter, body);
        if i % 2 == 0 {
            sign_skill(&skill_dir, "acme-key");
        }
        dirs.push(skill_dir);
    }

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let results = scanner.scan_batch(dirs, cancel_rx).await;
    assert_eq!(results.len(), 50);

    let mut builder = ReportBuilder::new();
    builder.extend(results);
    let report = builder.build();

    assert_eq!(report.total_skills, 50);
    assert_eq!(
        report.counts.passed + report.counts.flagged + report.counts.blocked,
        50
    );
}

/// A directory without SKILL.md fails closed: one Failed result with a
/// near-critical synthetic finding, never treated as safe.
#[tokio::test]
async fn fail_closed_for_unloadable_skill() {
    let dir = TempDir::new().expect("tempdir");
    let empty = dir.path().join("broken");
    std::fs::create_dir(&empty).expect("create dir");

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let results = scanner.scan_batch(vec![empty], cancel_rx).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ScanStatus::Failed);
    assert!(results[0].score.classification >= Classification::Medium);
    assert!(results[0].findings.iter().any(|f| f.severity >= 0.95));
}

/// Tampering with signed content after signing trips the trust check
/// and pins the classification at High even for harmless content.
#[tokio::test]
async fn tampered_signature_forces_high() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "demo",
        "name: demo\ndescription: d\nrisk: none\nsource: self\npublisher: acme",
        "Original body.",
    );
    sign_skill(&skill_dir, "acme-key");

    // Modify the manifest after signing
    let manifest = skill_dir.join("SKILL.md");
    let mut content = std::fs::read_to_string(&manifest).expect("read manifest");
    content.push_str("\nInjected line.\n");
    std::fs::write(&manifest, content).expect("rewrite manifest");

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let result = scanner.scan_path(&skill_dir).await;

    assert!(result
        .findings
        .iter()
        .any(|f| f.category == "trust_verification_failed"));
    assert!(result.score.classification >= Classification::High);
    assert!((result.score.source_trust - 1.0).abs() < 1e-9);
}

/// Scanning the same bundle twice produces identical scores.
#[tokio::test]
async fn scan_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "demo",
        "name: demo\ndescription: d\nrisk: critical\nsource: self\npublisher: nobody",
        "```python\nimport os\nos.system('uname -a')\n```",
    );

    let scanner = scanner(Arc::new(FakeClassifier::benign()), completed_sandbox());
    let first = scanner.scan_path(&skill_dir).await;
    let second = scanner.scan_path(&skill_dir).await;

    assert_eq!(first.score.composite, second.score.composite);
    assert_eq!(first.score.classification, second.score.classification);
    assert_eq!(first.findings.len(), second.findings.len());
}

/// Semantic findings raise the score when the classifier flags intent.
#[tokio::test]
async fn semantic_labels_contribute_findings() {
    let dir = TempDir::new().expect("tempdir");
    let skill_dir = write_skill(
        &dir,
        "sneaky",
        "name: sneaky\ndescription: d\nrisk: none\nsource: self\npublisher: acme",
        "Innocent-looking text the static rules cannot see through.",
    );
    sign_skill(&skill_dir, "acme-key");

    let scanner = scanner(
        Arc::new(FakeClassifier {
            labels: vec![("credential_theft", 0.9), ("benign", 0.2)],
            fail: false,
        }),
        completed_sandbox(),
    );
    let result = scanner.scan_path(&skill_dir).await;

    let f = result
        .findings
        .iter()
        .find(|f| f.category == "credential_theft")
        .expect("credential_theft finding");
    assert!(f.severity > 0.7);
    assert!(result.score.classification >= Classification::Medium);
}
