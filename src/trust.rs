//! Publisher Trust Store
//!
//! Known publishers, their signing keys, and the allowlist. Loaded once
//! at startup and shared read-only across all workers.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("trust store unreadable at {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("trust store unparseable at {path}: {reason}")]
    Unparseable { path: String, reason: String },
    #[error("duplicate publisher entry: {0}")]
    DuplicatePublisher(String),
}

/// One known publisher
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherRecord {
    pub name: String,
    /// Shared signing key, hex or opaque string
    pub key: String,
    /// Allowlisted publishers get full trust when their signature checks out
    #[serde(default)]
    pub allowlisted: bool,
}

/// Capability interface for publisher lookups
pub trait TrustStore: Send + Sync {
    fn lookup(&self, publisher: &str) -> Option<&PublisherRecord>;
}

/// Trust store backed by a TOML file of `[[publishers]]` tables
#[derive(Debug, Default)]
pub struct FileTrustStore {
    publishers: HashMap<String, PublisherRecord>,
}

impl FileTrustStore {
    /// Empty store: every publisher is unknown
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<PublisherRecord>) -> Result<Self, TrustError> {
        let mut publishers = HashMap::new();
        for record in records {
            if publishers.contains_key(&record.name) {
                return Err(TrustError::DuplicatePublisher(record.name));
            }
            publishers.insert(record.name.clone(), record);
        }
        Ok(Self { publishers })
    }

    pub fn from_file(path: &Path) -> Result<Self, TrustError> {
        #[derive(Deserialize)]
        struct StoreFile {
            #[serde(default)]
            publishers: Vec<PublisherRecord>,
        }

        let raw = std::fs::read_to_string(path).map_err(|e| TrustError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let parsed: StoreFile = toml::from_str(&raw).map_err(|e| TrustError::Unparseable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(publishers = parsed.publishers.len(), "trust store loaded");
        Self::from_records(parsed.publishers)
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl TrustStore for FileTrustStore {
    fn lookup(&self, publisher: &str) -> Option<&PublisherRecord> {
        self.publishers.get(publisher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_file() {
        let raw = r#"
            [[publishers]]
            name = "acme"
            key = "deadbeef"
            allowlisted = true

            [[publishers]]
            name = "indie-dev"
            key = "cafebabe"
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.toml");
        std::fs::write(&path, raw).unwrap();

        let store = FileTrustStore::from_file(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.lookup("acme").unwrap().allowlisted);
        assert!(!store.lookup("indie-dev").unwrap().allowlisted);
        assert!(store.lookup("nobody").is_none());
    }

    #[test]
    fn test_duplicate_publisher_rejected() {
        let records = vec![
            PublisherRecord {
                name: "acme".to_string(),
                key: "k1".to_string(),
                allowlisted: true,
            },
            PublisherRecord {
                name: "acme".to_string(),
                key: "k2".to_string(),
                allowlisted: false,
            },
        ];
        assert!(matches!(
            FileTrustStore::from_records(records),
            Err(TrustError::DuplicatePublisher(_))
        ));
    }

    #[test]
    fn test_empty_store() {
        let store = FileTrustStore::empty();
        assert!(store.is_empty());
        assert!(store.lookup("anyone").is_none());
    }
}
