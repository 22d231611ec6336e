//! Last good listing per site.
//!
//! A healthy live run keeps the raw listing it was extracted from. A later
//! run that comes up thin re-extracts that snapshot and marks the items
//! stale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::persist::{read_json, site_file, write_json_atomic, SiteLocks};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub site: String,
    /// Page the content was served from; base for relative links.
    pub url: String,
    pub saved_at: DateTime<Utc>,
    pub content: String,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// # Errors
    ///
    /// Storage or decode failures.
    async fn load(&self, site: &str) -> Result<Option<ListingSnapshot>, StoreError>;

    /// # Errors
    ///
    /// Storage or encode failures.
    async fn save(&self, snapshot: &ListingSnapshot) -> Result<(), StoreError>;
}

/// `<dir>/<site>.json`, replaced atomically under the site's lock.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    locks: SiteLocks,
}

impl FileSnapshotStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, locks: SiteLocks) -> Self {
        Self {
            dir: dir.into(),
            locks,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, site: &str) -> Result<Option<ListingSnapshot>, StoreError> {
        let path = site_file(&self.dir, site, ".json")?;
        read_json(&path).await
    }

    async fn save(&self, snapshot: &ListingSnapshot) -> Result<(), StoreError> {
        let path = site_file(&self.dir, &snapshot.site, ".json")?;
        let _guard = self.locks.lock(&snapshot.site).await;
        write_json_atomic(&path, "listing snapshot", snapshot).await
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, ListingSnapshot>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, site: &str) -> Result<Option<ListingSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&site.to_ascii_lowercase())
            .cloned())
    }

    async fn save(&self, snapshot: &ListingSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(snapshot.site.to_ascii_lowercase(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(site: &str, content: &str) -> ListingSnapshot {
        ListingSnapshot {
            site: site.to_string(),
            url: "https://www.dirk.nl/aanbiedingen".to_string(),
            saved_at: Utc::now(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn file_store_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), SiteLocks::new());

        assert!(store.load("dirk").await.unwrap().is_none());
        store.save(&snapshot("dirk", "<html>old</html>")).await.unwrap();
        store.save(&snapshot("dirk", "<html>new</html>")).await.unwrap();

        let back = store.load("DIRK").await.unwrap().expect("snapshot saved");
        assert_eq!(back.content, "<html>new</html>");
        assert!(dir.path().join("dirk.json").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_codes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), SiteLocks::new());
        let result = store.save(&snapshot("../dirk", "x")).await;
        assert!(
            matches!(result, Err(StoreError::InvalidKey(_))),
            "expected InvalidKey, got: {result:?}"
        );
    }
}
