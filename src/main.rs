//! SkillGate - Entry Point
//!
//! Scans a directory of skill bundles and prints the batch report.
//! Exits non-zero when any skill is blocked.

use std::path::PathBuf;
use std::sync::Arc;

use skillgate::{
    Config, FileTrustStore, HttpClassifier, PatternLibrary, ProcessSandbox, ReportBuilder,
    RiskAggregator, SandboxConfig, Scanner, Thresholds, Weights,
};
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let strict_mode = args.iter().any(|a| a == "--strict");
    let markdown_mode = args.iter().any(|a| a == "--markdown" || a == "-m");
    let skills_dir = arg_value(&args, "--skills-dir").or_else(|| arg_value(&args, "-s"));

    if help_mode {
        println!("SkillGate v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: skillgate --skills-dir <DIR> [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --skills-dir, -s <DIR>  Directory of skill bundles to scan");
        println!("  --strict                Force dynamic analysis for every skill");
        println!("  --markdown, -m          Print the report as markdown instead of JSON");
        println!("  --help, -h              Show this help");
        println!();
        println!("Environment variables:");
        println!("  SKILLGATE_CLASSIFIER_URL    Intent classifier endpoint");
        println!("  SKILLGATE_CLASSIFIER_KEY    Classifier credentials");
        println!("  SKILLGATE_PARALLELISM       Batch worker count (default: 4)");
        println!("  SKILLGATE_PATTERNS_FILE     TOML pattern rules override");
        println!("  SKILLGATE_TRUST_STORE       TOML publisher trust store");
        println!("  SKILLGATE_SCORING_FILE      TOML weights/thresholds override");
        println!("  SKILLGATE_AUDIT_LOG         JSONL audit trail destination");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // Report goes to stdout, logs to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(skills_dir) = skills_dir else {
        anyhow::bail!("missing required argument --skills-dir (see --help)");
    };

    let mut config = Config::from_env()?;
    config.strict = config.strict || strict_mode;

    info!("SkillGate v{}", env!("CARGO_PKG_VERSION"));

    let patterns = match &config.patterns_path {
        Some(path) => PatternLibrary::from_file(path)?,
        None => PatternLibrary::builtin(),
    };

    let trust = match &config.trust_store_path {
        Some(path) => FileTrustStore::from_file(path)?,
        None => {
            warn!("no trust store configured, every publisher is unknown");
            FileTrustStore::empty()
        }
    };

    let classifier = HttpClassifier::from_config(&config);
    if !classifier.is_available() {
        warn!("classifier endpoint not configured, semantic analysis will degrade");
    }

    let sandbox = ProcessSandbox::new(SandboxConfig {
        timeout: config.sandbox_timeout,
        max_output_bytes: config.sandbox_max_output_bytes,
        ..Default::default()
    });

    let aggregator = match &config.scoring_path {
        Some(path) => RiskAggregator::from_file(path)?,
        None => RiskAggregator::new(Weights::default(), Thresholds::default())?,
    };

    let scanner = Scanner::new(
        config,
        patterns,
        Arc::new(classifier),
        Arc::new(sandbox),
        Arc::new(trust),
        aggregator,
    );

    let dirs = discover_skill_dirs(&PathBuf::from(&skills_dir))?;
    if dirs.is_empty() {
        anyhow::bail!("no skill bundles found under {skills_dir}");
    }
    info!(skills = dirs.len(), "starting batch scan");

    // Ctrl-C flips the cancel signal; in-flight sandboxes are reclaimed.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, aborting in-flight scans");
            let _ = cancel_tx.send(true);
        }
    });

    let results = scanner.scan_batch(dirs, cancel_rx).await;

    let mut builder = ReportBuilder::new();
    builder.extend(results);
    let report = builder.build();

    let blocked = report.counts.blocked;
    if markdown_mode {
        println!("{}", report.to_markdown());
    } else {
        println!("{}", report.to_json()?);
    }

    if blocked > 0 {
        warn!(blocked, "batch contains blocked skills");
        std::process::exit(1);
    }
    Ok(())
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Each immediate subdirectory containing a SKILL.md is one bundle; a
/// SKILL.md at the root makes the root itself a single bundle.
fn discover_skill_dirs(root: &PathBuf) -> anyhow::Result<Vec<PathBuf>> {
    if root.join("SKILL.md").is_file() {
        return Ok(vec![root.clone()]);
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() && path.join("SKILL.md").is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
