//! Conversation history files, one per session mode.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::action::HistoryEntry;

/// JSON history file capped to the most recent `limit` entries.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored history; a missing or unreadable file yields an empty history.
    pub fn load(&self) -> Vec<HistoryEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "history unreadable, starting fresh");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
            Ok(entries) => cap(entries, self.limit),
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "history corrupt, starting fresh");
                Vec::new()
            }
        }
    }

    /// Rewrite the file with the last `limit` entries of `history`.
    pub fn save(&self, history: &[HistoryEntry]) -> Result<()> {
        let start = history.len().saturating_sub(self.limit);
        let mut payload =
            serde_json::to_string_pretty(&history[start..]).context("serialize history")?;
        payload.push('\n');
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&self.path, payload).with_context(|| format!("write {}", self.path.display()))?;
        debug!(path = %self.path.display(), entries = history.len() - start, "saved history");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

fn cap(mut entries: Vec<HistoryEntry>, limit: usize) -> Vec<HistoryEntry> {
    let excess = entries.len().saturating_sub(limit);
    entries.drain(..excess);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    HistoryEntry::user(format!("q{i}"))
                } else {
                    HistoryEntry::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn save_keeps_most_recent_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(temp.path().join("dev_history.json"), 3);
        store.save(&turns(5)).expect("save");
        let loaded = store.load();
        assert_eq!(loaded, turns(5)[2..].to_vec());
    }

    #[test]
    fn missing_or_corrupt_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(temp.path().join("chat_history.json"), 20);
        assert!(store.load().is_empty());
        fs::write(store.path(), "not json").expect("write");
        assert!(store.load().is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(temp.path().join("h/chat_history.json"), 20);
        store.save(&turns(2)).expect("save");
        store.clear().expect("clear");
        store.clear().expect("clear again");
        assert!(store.load().is_empty());
    }

    #[test]
    fn file_format_is_role_content_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(temp.path().join("chat_history.json"), 20);
        store.save(&[HistoryEntry::user("hi")]).expect("save");
        let raw = fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value, serde_json::json!([{"role": "user", "content": "hi"}]));
    }
}
