//! Whole-file archive for identity state
//!
//! Identity changes are rare compared to events, so the state is rewritten
//! in full (atomically) on every change instead of being journaled.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::TelemetryResult;
use crate::utils::atomic_write;

/// File name of the identity archive inside a token's state dir
pub const IDENTITY_FILE: &str = "identity.json";

/// Atomic JSON file holding one serialized value
#[derive(Debug, Clone)]
pub struct IdentityArchive {
    path: PathBuf,
}

impl IdentityArchive {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(IDENTITY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the archived value, `None` if nothing was archived yet
    ///
    /// A corrupted file is reported and treated as absent; the next save
    /// replaces it.
    pub fn load<T: DeserializeOwned>(&self) -> TelemetryResult<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Identity archive unreadable, starting fresh");
                Ok(None)
            }
        }
    }

    pub fn save<T: Serialize>(&self, value: &T) -> TelemetryResult<()> {
        let content = serde_json::to_string_pretty(value)?;
        atomic_write(&self.path, &content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let archive = IdentityArchive::new(dir.path());
        assert!(archive.load::<BTreeMap<String, String>>().unwrap().is_none());

        let mut aliases = BTreeMap::new();
        aliases.insert("alias".to_string(), "canonical".to_string());
        archive.save(&aliases).unwrap();

        assert_eq!(archive.load::<BTreeMap<String, String>>().unwrap(), Some(aliases));
    }

    #[test]
    fn test_corrupted_archive_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let archive = IdentityArchive::new(dir.path());
        fs::write(archive.path(), "{broken").unwrap();

        assert!(archive.load::<BTreeMap<String, String>>().unwrap().is_none());
    }
}
