//! Persisted metadata about the materialized database state.
//!
//! A mark file lives beside the data directory and records how the data was
//! produced and the upstream `dataStateAt` timestamp. Snapshot consumers read
//! it to name the snapshot they register with the storage driver.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Data type tag for logically restored directories.
pub const LOGICAL_DATA_TYPE: &str = "logical";

const MARK_DIR: &str = ".dblab";
const MARK_FILE: &str = "dbmark";

/// Metadata persisted after a successful restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMark {
    pub data_type: String,
    #[serde(default)]
    pub data_state_at: String,
}

impl DbMark {
    pub fn logical() -> Self {
        Self {
            data_type: LOGICAL_DATA_TYPE.to_string(),
            data_state_at: String::new(),
        }
    }
}

/// Reads and writes the mark file under a pool mount directory.
pub struct Marker {
    root: PathBuf,
}

impl Marker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn mark_path(&self) -> PathBuf {
        self.root.join(MARK_DIR).join(MARK_FILE)
    }

    /// Ensure the mark directory exists.
    pub async fn create_config(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join(MARK_DIR))
            .await
            .context("failed to create the mark directory")
    }

    /// Persist a mark, overwriting any previous one.
    pub async fn save_mark(&self, mark: &DbMark) -> Result<()> {
        let contents = serde_json::to_string_pretty(mark).context("failed to serialize mark")?;
        tokio::fs::write(self.mark_path(), contents)
            .await
            .context("failed to write the mark file")
    }

    pub async fn load_mark(&self) -> Result<DbMark> {
        let contents = tokio::fs::read_to_string(self.mark_path())
            .await
            .context("failed to read the mark file")?;
        serde_json::from_str(&contents).context("failed to parse the mark file")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_mark_round_trip() {
        let dir = tempdir().unwrap();
        let marker = Marker::new(dir.path());
        marker.create_config().await.unwrap();

        let mark = DbMark {
            data_type: LOGICAL_DATA_TYPE.to_string(),
            data_state_at: "20200514092602".to_string(),
        };
        marker.save_mark(&mark).await.unwrap();

        let loaded = marker.load_mark().await.unwrap();
        assert_eq!(loaded, mark);
    }

    #[tokio::test]
    async fn test_mark_overwrites_previous() {
        let dir = tempdir().unwrap();
        let marker = Marker::new(dir.path());
        marker.create_config().await.unwrap();

        let mut mark = DbMark::logical();
        mark.data_state_at = "20200101000000".to_string();
        marker.save_mark(&mark).await.unwrap();

        mark.data_state_at = "20200202000000".to_string();
        marker.save_mark(&mark).await.unwrap();

        let loaded = marker.load_mark().await.unwrap();
        assert_eq!(loaded.data_state_at, "20200202000000");
    }

    #[tokio::test]
    async fn test_load_without_mark_fails() {
        let dir = tempdir().unwrap();
        let marker = Marker::new(dir.path());
        assert!(marker.load_mark().await.is_err());
    }
}
