//! Level 3: dynamic analysis
//!
//! Runs the skill's testable code blocks inside the sandbox and turns
//! observed behavior into findings. Conditional: the scanner only invokes
//! this level when the partial risk from Levels 1-2 crosses the trigger
//! threshold, a high-risk category matched, or strict mode forces it.

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::levels::Finding;
use crate::sandbox::{SandboxError, SandboxRunner, SandboxState};
use crate::skill::Skill;

/// Upper bound on sandbox runs per skill
pub const MAX_TESTABLE_BLOCKS: usize = 5;

/// Pattern categories that trigger dynamic analysis on their own,
/// regardless of the partial score.
pub const FORCE_TRIGGER_CATEGORIES: &[&str] = &["code_execution", "shell_execution"];

/// Stderr fragments that reveal what a block tried to do inside the
/// sandbox. Probes that the sandbox denied are still signals: the code
/// attempted the operation.
static STDERR_SIGNALS: Lazy<Vec<(&'static str, &'static str, f64)>> = Lazy::new(|| {
    vec![
        ("network is unreachable", "network_attempt", 0.70),
        ("connection refused", "network_attempt", 0.60),
        ("socket.error", "network_attempt", 0.55),
        ("curl:", "external_request", 0.65),
        ("wget:", "external_request", 0.65),
        ("permission denied", "permission_probe", 0.40),
        ("subprocess", "process_spawn", 0.50),
    ]
});

/// Level 3 output
#[derive(Debug, Clone)]
pub struct DynamicReport {
    pub findings: Vec<Finding>,
    /// Worst terminal state across all runs, None when nothing ran
    pub terminal: Option<SandboxState>,
    /// Number of blocks actually executed
    pub executed: usize,
}

pub struct DynamicAnalyzer<'a> {
    sandbox: &'a dyn SandboxRunner,
}

impl<'a> DynamicAnalyzer<'a> {
    pub fn new(sandbox: &'a dyn SandboxRunner) -> Self {
        Self { sandbox }
    }

    pub async fn analyze(&self, skill: &Skill) -> DynamicReport {
        let mut findings = Vec::new();
        let mut terminal: Option<SandboxState> = None;
        let mut executed = 0;

        let testable: Vec<_> = skill
            .code_blocks
            .iter()
            .filter(|b| is_testable(&b.language, &b.code))
            .take(MAX_TESTABLE_BLOCKS)
            .collect();

        if testable.is_empty() {
            debug!(skill = %skill.name, "no testable code blocks");
            return DynamicReport {
                findings,
                terminal,
                executed,
            };
        }

        for (index, block) in testable.iter().enumerate() {
            match self.sandbox.run(&block.language, &block.code).await {
                Ok(trace) => {
                    executed += 1;
                    terminal = Some(worse(terminal, trace.state));
                    match trace.state {
                        SandboxState::TimedOut => {
                            findings.push(Finding::new(
                                3,
                                "sandbox_timeout",
                                "sandbox_timeout",
                                0.90,
                                format!(
                                    "code block {index} did not finish within the sandbox time limit"
                                ),
                            ));
                        }
                        SandboxState::Crashed => {
                            findings.push(Finding::new(
                                3,
                                "sandbox_crash",
                                "sandbox_crash",
                                0.90,
                                format!("code block {index} was killed by a signal"),
                            ));
                        }
                        _ => {
                            behavioral_findings(index, &trace.stderr, trace.exit_code, &mut findings);
                        }
                    }
                }
                Err(SandboxError::UnsupportedLanguage(lang)) => {
                    debug!(skill = %skill.name, language = %lang, "skipping unsupported block");
                }
                Err(e) => {
                    // Host-level refusal. Inconclusive: says nothing about
                    // the skill itself.
                    warn!(skill = %skill.name, error = %e, "sandbox provisioning denied");
                    terminal = Some(worse(terminal, SandboxState::Denied));
                    findings.push(
                        Finding::new(
                            3,
                            "sandbox_denied",
                            "sandbox_denied",
                            0.0,
                            format!("sandbox could not be provisioned for block {index}: {e}"),
                        )
                        .inconclusive(),
                    );
                }
            }
        }

        info!(
            skill = %skill.name,
            executed,
            findings = findings.len(),
            terminal = ?terminal,
            "dynamic analysis complete"
        );

        DynamicReport {
            findings,
            terminal,
            executed,
        }
    }
}

/// Translate a completed run's observable behavior into findings
fn behavioral_findings(
    index: usize,
    stderr: &str,
    exit_code: Option<i32>,
    findings: &mut Vec<Finding>,
) {
    let stderr_lower = stderr.to_lowercase();
    for (needle, category, severity) in STDERR_SIGNALS.iter() {
        if stderr_lower.contains(needle) {
            findings.push(Finding::new(
                3,
                format!("behavior_{category}"),
                *category,
                *severity,
                format!("code block {index} produced '{needle}' on stderr"),
            ));
        }
    }

    // Exit 0 is success, exit 1 is the conventional "handled error".
    // Anything else suggests the block misbehaves outside its own
    // environment assumptions.
    if let Some(code) = exit_code {
        if code != 0 && code != 1 {
            findings.push(Finding::new(
                3,
                "abnormal_exit",
                "abnormal_exit",
                0.30,
                format!("code block {index} exited with status {code}"),
            ));
        }
    }
}

/// A block is worth running when it is in a supported language and is
/// more than comments and whitespace.
fn is_testable(language: &str, code: &str) -> bool {
    let supported = matches!(language, "python" | "python3" | "bash" | "sh" | "shell");
    if !supported {
        return false;
    }
    let meaningful = code
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .count();
    meaningful > 0 && code.trim().len() >= 10
}

fn worse(current: Option<SandboxState>, new: SandboxState) -> SandboxState {
    fn rank(s: SandboxState) -> u8 {
        match s {
            SandboxState::Completed => 0,
            SandboxState::Denied => 1,
            SandboxState::TimedOut => 2,
            SandboxState::Crashed => 3,
            // Non-terminal states never reach here during aggregation
            _ => 0,
        }
    }
    match current {
        Some(c) if rank(c) >= rank(new) => c,
        _ => new,
    }
}
