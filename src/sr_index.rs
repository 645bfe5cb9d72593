//! Attached-SR index, persisted across daemon restarts.
//!
//! Maps the manager's SR handle to the backend-supplied SR identifier and
//! the metric data sources registered at attach time. The full table is
//! rewritten to the state file after every mutation so that a restarted
//! daemon resumes with the same attachments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::{SmError, SmResult};

/// Persisted record of one attached SR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedSr {
    /// Backend SR identifier returned by the `SR.attach` script.
    pub sr_id: String,
    /// Data-source uids registered with the metric service during attach.
    #[serde(default)]
    pub datasource_uids: Vec<String>,
}

type Contents = HashMap<String, AttachedSr>;

/// Concurrent-safe index of attached SRs with a persistence side-channel.
pub struct SrIndex {
    path: PathBuf,
    state: Mutex<Contents>,
}

impl SrIndex {
    /// Open the index, reloading the state file when one exists.
    pub async fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            match Self::load_from_file(&path).await {
                Ok(contents) => {
                    info!(
                        path = %path.display(),
                        attached = contents.len(),
                        "Loaded attached-SR state file"
                    );
                    contents
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load attached-SR state file, starting fresh"
                    );
                    Contents::default()
                }
            }
        } else {
            info!(path = %path.display(), "No attached-SR state file, starting fresh");
            Contents::default()
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    async fn load_from_file(path: &Path) -> Result<Contents> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read state file")?;
        serde_json::from_str(&contents).context("Failed to parse state file")
    }

    /// Rewrite the state file from the current table. Writes to a temp file
    /// in the same directory, then renames over the target.
    async fn save_to_file(&self) -> Result<()> {
        let state = self.state.lock().await;
        let contents =
            serde_json::to_string_pretty(&*state).context("Failed to serialize state")?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .context("Failed to write state file")?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("Failed to rename state file into place")?;
        Ok(())
    }

    /// Insert or replace an attachment, then persist.
    pub async fn add(&self, handle: &str, sr_id: &str, datasource_uids: Vec<String>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.insert(
                handle.to_string(),
                AttachedSr {
                    sr_id: sr_id.to_string(),
                    datasource_uids,
                },
            );
        }
        self.save_to_file().await
    }

    /// Full record for a handle, if attached.
    pub async fn lookup(&self, handle: &str) -> Option<AttachedSr> {
        let state = self.state.lock().await;
        state.get(handle).cloned()
    }

    /// Backend SR identifier for a handle.
    pub async fn find(&self, handle: &str) -> SmResult<String> {
        self.lookup(handle)
            .await
            .map(|sr| sr.sr_id)
            .ok_or_else(|| SmError::SrNotAttached(handle.to_string()))
    }

    /// Data-source uids recorded for a handle.
    pub async fn get_uids(&self, handle: &str) -> SmResult<Vec<String>> {
        self.lookup(handle)
            .await
            .map(|sr| sr.datasource_uids)
            .ok_or_else(|| SmError::SrNotAttached(handle.to_string()))
    }

    /// Remove an attachment, then persist.
    pub async fn remove(&self, handle: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.remove(handle);
        }
        self.save_to_file().await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_add_and_find() {
        let dir = tempdir().unwrap();
        let index = SrIndex::new(dir.path().join("state.json")).await;
        index
            .add("sr-handle", "backend-sr", vec!["sr9/metrics".to_string()])
            .await
            .unwrap();
        assert_eq!(index.find("sr-handle").await.unwrap(), "backend-sr");
        assert_eq!(
            index.get_uids("sr-handle").await.unwrap(),
            vec!["sr9/metrics"]
        );
    }

    #[tokio::test]
    async fn test_find_unknown_handle() {
        let dir = tempdir().unwrap();
        let index = SrIndex::new(dir.path().join("state.json")).await;
        let err = index.find("nope").await.unwrap_err();
        assert!(matches!(err, SmError::SrNotAttached(h) if h == "nope"));
    }

    #[tokio::test]
    async fn test_restart_reproduces_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let index = SrIndex::new(&path).await;
        index
            .add("sr-handle", "backend-sr", vec!["a".to_string()])
            .await
            .unwrap();
        assert!(path.exists());

        let reloaded = SrIndex::new(&path).await;
        assert_eq!(reloaded.find("sr-handle").await.unwrap(), "backend-sr");
        assert_eq!(reloaded.get_uids("sr-handle").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let index = SrIndex::new(&path).await;
        index.add("sr-handle", "backend-sr", vec![]).await.unwrap();
        index.remove("sr-handle").await.unwrap();

        let reloaded = SrIndex::new(&path).await;
        assert!(reloaded.lookup("sr-handle").await.is_none());
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");
        let index = SrIndex::new(&path).await;
        index.add("h", "s", vec![]).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_state_file_starts_empty() {
        let dir = tempdir().unwrap();
        let index = SrIndex::new(dir.path().join("absent.json")).await;
        assert!(index.lookup("anything").await.is_none());
    }
}
