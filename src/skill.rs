//! Skill Bundle Model
//!
//! A skill is a directory containing a SKILL.md manifest (YAML-style
//! frontmatter + markdown body) and optional supporting source files.
//! Loaded once per scan and treated read-only by every analysis level.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

static FRONTMATTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A---\s*\n(.*?)\n---").expect("frontmatter regex"));

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?s)```(\\w*)\\n(.*?)```").expect("code block regex"));

/// Skill loading errors. Fatal for one skill only; the scanner converts
/// them into a fail-closed result rather than aborting the batch.
#[derive(Debug, thiserror::Error)]
pub enum SkillLoadError {
    #[error("missing SKILL.md in {0}")]
    MissingManifest(PathBuf),

    #[error("unreadable SKILL.md in {path}: {reason}")]
    UnreadableManifest { path: PathBuf, reason: String },

    #[error("malformed frontmatter in {0}")]
    MalformedFrontmatter(PathBuf),
}

/// A fenced code block extracted from the skill body
#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// Parsed frontmatter metadata
#[derive(Debug, Clone, Default)]
pub struct SkillMetadata {
    fields: HashMap<String, String>,
}

impl SkillMetadata {
    pub(crate) fn parse(frontmatter: &str) -> Self {
        let mut fields = HashMap::new();
        for line in frontmatter.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                fields.insert(key.trim().to_string(), value.to_string());
            }
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Declared risk label (none, safe, critical, offensive)
    pub fn risk(&self) -> &str {
        self.get("risk").unwrap_or("unknown")
    }

    /// Source attribution (URL or "self")
    pub fn source(&self) -> &str {
        self.get("source").unwrap_or("unknown")
    }

    pub fn author(&self) -> &str {
        self.get("author").unwrap_or("unknown")
    }

    pub fn publisher(&self) -> &str {
        self.get("publisher").unwrap_or_else(|| self.author())
    }

    pub fn version(&self) -> &str {
        self.get("version").unwrap_or("0.0.0")
    }

    /// Declared permission scopes, comma-separated in frontmatter
    pub fn permissions(&self) -> Vec<String> {
        self.get("permissions")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An agent skill bundle, immutable once loaded
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub metadata: SkillMetadata,
    pub body: String,
    pub code_blocks: Vec<CodeBlock>,
    /// Supporting source files (relative path, content)
    pub sources: Vec<(PathBuf, String)>,
    /// Files that could not be read as text (binary, bad encoding)
    pub unreadable: Vec<PathBuf>,
    /// Detached signature from SKILL.md.sig, when present
    pub signature: Option<String>,
}

impl Skill {
    /// Load a skill bundle from its directory
    pub async fn from_dir(dir: &Path) -> Result<Self, SkillLoadError> {
        let manifest = dir.join("SKILL.md");

        if !manifest.exists() {
            return Err(SkillLoadError::MissingManifest(dir.to_path_buf()));
        }

        let content = tokio::fs::read_to_string(&manifest).await.map_err(|e| {
            SkillLoadError::UnreadableManifest {
                path: manifest.clone(),
                reason: e.to_string(),
            }
        })?;

        let frontmatter = FRONTMATTER_RE
            .captures(&content)
            .and_then(|c| c.get(1))
            .ok_or_else(|| SkillLoadError::MalformedFrontmatter(manifest.clone()))?;

        let metadata = SkillMetadata::parse(frontmatter.as_str());
        let body = Self::extract_body(&content);
        let code_blocks = Self::extract_code_blocks(&content);

        let folder_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = metadata
            .get("name")
            .map(String::from)
            .unwrap_or_else(|| folder_name.clone());

        let (sources, unreadable) = Self::collect_sources(dir).await;

        let signature = tokio::fs::read_to_string(dir.join("SKILL.md.sig"))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        debug!(
            skill = %name,
            code_blocks = code_blocks.len(),
            sources = sources.len(),
            "loaded skill bundle"
        );

        Ok(Self {
            name,
            path: dir.to_path_buf(),
            content,
            metadata,
            body,
            code_blocks,
            sources,
            unreadable,
            signature,
        })
    }

    fn extract_body(content: &str) -> String {
        match FRONTMATTER_RE.find(content) {
            Some(m) => content[m.end()..].trim_start().to_string(),
            None => content.to_string(),
        }
    }

    pub(crate) fn extract_code_blocks(content: &str) -> Vec<CodeBlock> {
        CODE_BLOCK_RE
            .captures_iter(content)
            .map(|cap| CodeBlock {
                language: {
                    let lang = cap.get(1).map(|m| m.as_str()).unwrap_or("");
                    if lang.is_empty() { "unknown" } else { lang }.to_lowercase()
                },
                code: cap.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
            })
            .collect()
    }

    /// Collect supporting text files alongside SKILL.md: the bundle root
    /// plus one level of subdirectories
    async fn collect_sources(dir: &Path) -> (Vec<(PathBuf, String)>, Vec<PathBuf>) {
        let mut sources = Vec::new();
        let mut unreadable = Vec::new();
        let mut subdirs = Vec::new();

        Self::collect_dir(dir, dir, &mut sources, &mut unreadable, Some(&mut subdirs)).await;
        for sub in subdirs {
            Self::collect_dir(dir, &sub, &mut sources, &mut unreadable, None).await;
        }

        // Deterministic scan order regardless of directory iteration order
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        unreadable.sort();

        (sources, unreadable)
    }

    async fn collect_dir(
        root: &Path,
        current: &Path,
        sources: &mut Vec<(PathBuf, String)>,
        unreadable: &mut Vec<PathBuf>,
        mut subdirs: Option<&mut Vec<PathBuf>>,
    ) {
        let Ok(mut entries) = tokio::fs::read_dir(current).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

            if path.is_dir() {
                if let Some(dirs) = subdirs.as_deref_mut() {
                    if !rel.to_string_lossy().starts_with('.') {
                        dirs.push(path);
                    }
                }
                continue;
            }
            if rel.as_os_str() == "SKILL.md" {
                continue;
            }
            if path.extension().map(|e| e == "sig").unwrap_or(false) {
                continue;
            }

            match tokio::fs::read(&path).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => sources.push((rel, text)),
                    Err(_) => unreadable.push(rel),
                },
                Err(_) => unreadable.push(rel),
            }
        }
    }

    /// Check if the skill is declared offensive
    pub fn is_offensive(&self) -> bool {
        self.metadata.risk() == "offensive"
    }

    /// Offensive skills must carry the authorization disclaimer
    pub fn has_disclaimer(&self) -> bool {
        self.content.to_uppercase().contains("AUTHORIZED USE ONLY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_skill(dir: &Path, content: &str) {
        tokio::fs::write(dir.join("SKILL.md"), content).await.unwrap();
    }

    const VALID_SKILL: &str = r#"---
name: test-skill
description: A test skill
risk: safe
source: self
---

# Test Skill

```python
print("hello")
```
"#;

    #[tokio::test]
    async fn test_load_valid_skill() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("test-skill");
        tokio::fs::create_dir(&dir).await.unwrap();
        write_skill(&dir, VALID_SKILL).await;

        let skill = Skill::from_dir(&dir).await.unwrap();
        assert_eq!(skill.name, "test-skill");
        assert_eq!(skill.metadata.risk(), "safe");
        assert_eq!(skill.code_blocks.len(), 1);
        assert_eq!(skill.code_blocks[0].language, "python");
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = Skill::from_dir(tmp.path()).await.unwrap_err();
        assert!(matches!(err, SkillLoadError::MissingManifest(_)));
    }

    #[tokio::test]
    async fn test_malformed_frontmatter() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "# No frontmatter here\n").await;

        let err = Skill::from_dir(tmp.path()).await.unwrap_err();
        assert!(matches!(err, SkillLoadError::MalformedFrontmatter(_)));
    }

    #[tokio::test]
    async fn test_binary_source_recorded_as_unreadable() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), VALID_SKILL).await;
        tokio::fs::write(tmp.path().join("blob.bin"), [0xFFu8, 0xFE, 0x00, 0x80])
            .await
            .unwrap();

        let skill = Skill::from_dir(tmp.path()).await.unwrap();
        assert_eq!(skill.unreadable.len(), 1);
    }

    #[test]
    fn test_permissions_parsing() {
        let meta = SkillMetadata::parse("permissions: fs_read, network,  shell\nname: x");
        assert_eq!(meta.permissions(), vec!["fs_read", "network", "shell"]);
    }

    #[test]
    fn test_risk_label_default() {
        let meta = SkillMetadata::parse("name: x");
        assert_eq!(meta.risk(), "unknown");
    }
}
