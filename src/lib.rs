//! SkillGate
//!
//! Defense-in-depth admission scanner for agent skill bundles.
//!
//! # Features
//!
//! - **Level 1**: static pattern matching and metadata schema checks
//! - **Level 2**: AI intent classification (degradable, never blocks)
//! - **Level 3**: conditional sandboxed execution of code blocks
//! - **Level 4**: signature, publisher allowlist, and source provenance
//! - **Risk scoring**: weighted composite with fixed tier thresholds
//! - **Batch scanning**: bounded worker pool with cancellation
//! - **Audit trail**: JSONL record of every trust verification
//!
//! # Architecture
//!
//! ```text
//! skill dirs ──► Scanner ──► Level1 StaticAnalyzer (patterns + metadata)
//!                  │     ──► Level2 SemanticAnalyzer (Classifier client)
//!                  │     ──► Level3 DynamicAnalyzer (ProcessSandbox)
//!                  │     ──► Level4 TrustVerifier (TrustStore + audit)
//!                  │
//!                  └──► RiskAggregator ──► ScanResult ──► ReportBuilder
//! ```

pub mod classifier;
pub mod config;
pub mod levels;
pub mod patterns;
pub mod report;
pub mod sandbox;
pub mod scanner;
pub mod score;
pub mod skill;
pub mod trust;

pub use classifier::{Classifier, ClassifierError, HttpClassifier, IntentLabel, IntentReport};
pub use config::{Config, ConfigError};
pub use levels::Finding;
pub use patterns::{PatternLibrary, PatternRule, RuleTier};
pub use report::{ReportBuilder, ScanReport};
pub use sandbox::{ExecutionTrace, ProcessSandbox, SandboxConfig, SandboxError, SandboxRunner, SandboxState};
pub use scanner::{CommunityReports, NoReports, ScanResult, ScanStatus, Scanner};
pub use score::{Classification, RiskAggregator, RiskScore, Thresholds, Weights};
pub use skill::{CodeBlock, Skill, SkillLoadError, SkillMetadata};
pub use trust::{FileTrustStore, PublisherRecord, TrustError, TrustStore};
