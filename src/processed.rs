// 🧾 Processed Id Store - The dedup cursor
// A JSON array of message ids, replaced wholesale on every save

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// PROCESSED ID SET
// ============================================================================

/// Message ids already handled, whether or not they produced a payment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedIdSet {
    ids: HashSet<String>,
}

impl ProcessedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in lexical order, so saved files diff cleanly
    pub fn sorted(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl<S: Into<String>> FromIterator<S> for ProcessedIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ProcessedIdSet {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// PROCESSED ID STORE
// ============================================================================

pub struct ProcessedIdStore {
    path: PathBuf,
}

impl ProcessedIdStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ProcessedIdStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the directory holding the store exists.
    /// Called once at startup; failure stops the process.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display())),
            _ => Ok(()),
        }
    }

    /// Missing file = first run = empty set
    pub fn load(&self) -> Result<ProcessedIdSet> {
        if !self.path.exists() {
            return Ok(ProcessedIdSet::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read processed ids: {}", self.path.display()))?;

        let ids: Vec<String> = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse processed ids JSON: {}", self.path.display())
        })?;

        Ok(ids.into_iter().collect())
    }

    /// Write the full set to a sibling temp file, then rename over the
    /// store. A crash leaves either the old or the new file, never half.
    pub fn save(&self, set: &ProcessedIdSet) -> Result<()> {
        let json =
            serde_json::to_string(&set.sorted()).context("Failed to serialize processed ids")?;

        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
        }

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "processed_messages.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_set() {
        let dir = tempdir().unwrap();
        let store = ProcessedIdStore::new(dir.path().join("processed.json"));

        let set = store.load().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_round_trip_ignores_insertion_order() {
        let dir = tempdir().unwrap();
        let store = ProcessedIdStore::new(dir.path().join("processed.json"));

        let mut set = ProcessedIdSet::new();
        set.add("b");
        set.add("a");
        store.save(&set).unwrap();

        let reloaded = store.load().unwrap();
        let expected: ProcessedIdSet = ["a", "b"].into_iter().collect();
        assert_eq!(reloaded, expected);
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = ProcessedIdSet::new();
        assert!(set.add("a"));
        assert!(!set.add("a"));
        assert_eq!(set.len(), 1);
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processed.json");
        let store = ProcessedIdStore::new(&path);

        store.save(&["x", "y", "z"].into_iter().collect()).unwrap();
        store.save(&["x"].into_iter().collect()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"["x"]"#);
        assert!(!dir.path().join("processed.json.tmp").exists());
    }

    #[test]
    fn test_reads_plain_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processed.json");
        fs::write(&path, r#"["18e1a", "18e1b", "18e1a"]"#).unwrap();

        let set = ProcessedIdStore::new(&path).load().unwrap();
        assert_eq!(set.sorted(), vec!["18e1a", "18e1b"]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processed.json");
        fs::write(&path, "not json").unwrap();

        assert!(ProcessedIdStore::new(&path).load().is_err());
    }

    #[test]
    fn test_ensure_parent_dir_creates_nested() {
        let dir = tempdir().unwrap();
        let store = ProcessedIdStore::new(dir.path().join("state/nested/ids.json"));

        store.ensure_parent_dir().unwrap();
        store.save(&ProcessedIdSet::new()).unwrap();
        assert!(store.path().exists());
    }
}
