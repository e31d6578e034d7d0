//! Configuration management
//!
//! All tunables are loaded from the environment (and optional TOML files)
//! into typed values before any skill is scanned. Validation failures are
//! fatal: a scanner constructed from a bad config would produce scores
//! nobody can audit.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors. Fatal at startup, before any skill is scanned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pattern rule '{name}': {reason}")]
    BadRule { name: String, reason: String },

    #[error("rule '{0}' has severity outside [0.0, 1.0]")]
    SeverityOutOfRange(String),

    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),

    #[error("risk weights must sum to 1.0, got {0}")]
    BadWeightSum(f64),

    #[error("risk weight '{0}' outside [0.0, 1.0]")]
    WeightOutOfRange(&'static str),

    #[error("classification thresholds must satisfy 0 < medium < high < critical <= 1")]
    BadThresholds,

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Unparseable { path: PathBuf, reason: String },
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Classifier endpoint (OpenAI-compatible chat completions API)
    pub classifier_api_url: Option<String>,

    /// Classifier API key
    pub classifier_api_key: Option<String>,

    /// Classifier model identity
    pub classifier_model: String,

    /// Classifier request timeout
    pub classifier_timeout: Duration,

    /// Classifier retry budget (definitive rejections are never retried)
    pub classifier_max_retries: u32,

    /// Content ceiling for semantic analysis, in bytes
    pub semantic_max_content_bytes: usize,

    /// Minimum confidence for an intent label to become a finding
    pub semantic_confidence_floor: f64,

    /// Sandbox wall-clock timeout per code block
    pub sandbox_timeout: Duration,

    /// Sandbox output cap in bytes
    pub sandbox_max_output_bytes: usize,

    /// Batch parallelism (concurrent skill pipelines)
    pub parallelism: usize,

    /// Hard ceiling for one skill's full pipeline
    pub per_skill_timeout: Duration,

    /// Strict mode: force dynamic analysis for every skill
    pub strict: bool,

    /// Pattern rules file (TOML); built-in rules when unset
    pub patterns_path: Option<PathBuf>,

    /// Trust store file (TOML); empty store when unset
    pub trust_store_path: Option<PathBuf>,

    /// Scoring weights/thresholds file (TOML); defaults when unset
    pub scoring_path: Option<PathBuf>,

    /// Audit trail file (JSON lines); disabled when unset
    pub audit_log_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let classifier_api_url = std::env::var("SKILLGATE_CLASSIFIER_URL").ok();
        let classifier_api_key = std::env::var("SKILLGATE_CLASSIFIER_KEY").ok();

        let classifier_model = std::env::var("SKILLGATE_CLASSIFIER_MODEL")
            .unwrap_or_else(|_| "gemini-2.0-flash".to_string());

        let classifier_timeout =
            Duration::from_secs(env_parse("SKILLGATE_CLASSIFIER_TIMEOUT", 30));

        let classifier_max_retries = env_parse("SKILLGATE_CLASSIFIER_RETRIES", 2);

        let semantic_max_content_bytes = env_parse("SKILLGATE_SEMANTIC_MAX_BYTES", 8_000);
        let semantic_confidence_floor = env_parse("SKILLGATE_SEMANTIC_CONFIDENCE_FLOOR", 0.5_f64);

        let sandbox_timeout = Duration::from_secs(env_parse("SKILLGATE_SANDBOX_TIMEOUT", 30));
        let sandbox_max_output_bytes = env_parse("SKILLGATE_SANDBOX_MAX_OUTPUT", 1024 * 1024);

        let parallelism = env_parse("SKILLGATE_PARALLELISM", 4_usize).max(1);
        let per_skill_timeout = Duration::from_secs(env_parse("SKILLGATE_SKILL_TIMEOUT", 300));

        let strict = std::env::var("SKILLGATE_STRICT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let patterns_path = std::env::var("SKILLGATE_PATTERNS_FILE")
            .ok()
            .map(expand_path);
        let trust_store_path = std::env::var("SKILLGATE_TRUST_STORE").ok().map(expand_path);
        let scoring_path = std::env::var("SKILLGATE_SCORING_FILE").ok().map(expand_path);
        let audit_log_path = std::env::var("SKILLGATE_AUDIT_LOG").ok().map(expand_path);

        Ok(Self {
            classifier_api_url,
            classifier_api_key,
            classifier_model,
            classifier_timeout,
            classifier_max_retries,
            semantic_max_content_bytes,
            semantic_confidence_floor,
            sandbox_timeout,
            sandbox_max_output_bytes,
            parallelism,
            per_skill_timeout,
            strict,
            patterns_path,
            trust_store_path,
            scoring_path,
            audit_log_path,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classifier_api_url: None,
            classifier_api_key: None,
            classifier_model: "gemini-2.0-flash".to_string(),
            classifier_timeout: Duration::from_secs(30),
            classifier_max_retries: 2,
            semantic_max_content_bytes: 8_000,
            semantic_confidence_floor: 0.5,
            sandbox_timeout: Duration::from_secs(30),
            sandbox_max_output_bytes: 1024 * 1024,
            parallelism: 4,
            per_skill_timeout: Duration::from_secs(300),
            strict: false,
            patterns_path: None,
            trust_store_path: None,
            scoring_path: None,
            audit_log_path: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn expand_path(raw: String) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&raw).as_ref())
}
