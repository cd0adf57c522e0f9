//! Handle to the storage pool backing the data directory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A mounted copy-on-write pool. The retrieval engine owns the pool's data
/// directory for the duration of a job and advances `data_state_at` when a
/// restored database has been marked.
pub struct FsPool {
    mount_dir: PathBuf,
    data_sub_dir: String,
    data_state_at: Mutex<Option<DateTime<Utc>>>,
}

impl FsPool {
    pub fn new(mount_dir: impl Into<PathBuf>, data_sub_dir: impl Into<String>) -> Self {
        Self {
            mount_dir: mount_dir.into(),
            data_sub_dir: data_sub_dir.into(),
            data_state_at: Mutex::new(None),
        }
    }

    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.mount_dir.join(&self.data_sub_dir)
    }

    pub fn data_state_at(&self) -> Option<DateTime<Utc>> {
        *self
            .data_state_at
            .lock()
            .expect("data_state_at lock poisoned")
    }

    pub fn set_data_state_at(&self, data_state_at: DateTime<Utc>) {
        *self
            .data_state_at
            .lock()
            .expect("data_state_at lock poisoned") = Some(data_state_at);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_data_dir_layout() {
        let pool = FsPool::new("/var/lib/dblab/pool", "data");
        assert_eq!(pool.mount_dir(), Path::new("/var/lib/dblab/pool"));
        assert_eq!(pool.data_dir(), PathBuf::from("/var/lib/dblab/pool/data"));
    }

    #[test]
    fn test_data_state_at_updates() {
        let pool = FsPool::new("/pool", "data");
        assert!(pool.data_state_at().is_none());

        let stamp = Utc.with_ymd_and_hms(2020, 5, 14, 9, 26, 2).unwrap();
        pool.set_data_state_at(stamp);
        assert_eq!(pool.data_state_at(), Some(stamp));
    }
}
