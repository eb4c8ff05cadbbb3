//! Persistent `source:id` set consulted by the fetcher to skip papers already
//! ingested in a prior run.
//!
//! Loading follows the same "missing/invalid file -> empty" tolerance as the
//! cookie-persistence module this crate already carried; saving uses
//! write-to-temp + rename so a crash mid-write never corrupts the set that
//! other runs depend on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;

/// Loads, grows, and atomically persists the set of `source:id` keys already
/// seen by a prior fetch.
pub struct SeenSet {
    path: PathBuf,
    keys: HashSet<String>,
}

impl SeenSet {
    /// Loads the seen set from `path`, tolerating a missing or malformed file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.exists() {
            debug!(?path, "seen set file not found, starting empty");
            return Self {
                path,
                keys: HashSet::new(),
            };
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(keys) => {
                    info!(count = keys.len(), ?path, "loaded seen set");
                    Self {
                        path,
                        keys: keys.into_iter().collect(),
                    }
                }
                Err(e) => {
                    warn!(error = %e, ?path, "failed to parse seen set, starting empty");
                    Self {
                        path,
                        keys: HashSet::new(),
                    }
                }
            },
            Err(e) => {
                warn!(error = %e, ?path, "failed to read seen set, starting empty");
                Self {
                    path,
                    keys: HashSet::new(),
                }
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Marks `key` as seen. Returns `true` if it was newly inserted.
    pub fn insert(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Persists the set atomically: write to a sibling temp file, then rename
    /// over the destination.
    pub fn save(&self) -> Result<()> {
        save_atomic(&self.path, &self.keys)
    }
}

fn save_atomic(path: &Path, keys: &HashSet<String>) -> Result<()> {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort();
    let content = serde_json::to_string_pretty(&sorted)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    info!(count = keys.len(), ?path, "saved seen set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_starts_empty() {
        let set = SeenSet::load("/nonexistent/seen.json");
        assert!(set.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut set = SeenSet::load(&path);
        set.insert("arxiv:2501.00001".to_string());
        set.insert("arxiv:2501.00002".to_string());
        set.save().unwrap();

        let reloaded = SeenSet::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("arxiv:2501.00001"));
    }

    #[test]
    fn second_run_unions_with_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut first = SeenSet::load(&path);
        first.insert("arxiv:2501.00001".to_string());
        first.save().unwrap();

        let mut second = SeenSet::load(&path);
        assert!(second.contains("arxiv:2501.00001"));
        second.insert("arxiv:2501.00002".to_string());
        second.save().unwrap();

        let reloaded = SeenSet::load(&path);
        assert_eq!(reloaded.len(), 2);
    }
}
