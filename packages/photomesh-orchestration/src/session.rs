//! Timestamped per-run output directories

use chrono::{DateTime, Utc};
use photomesh_storage::{ErrorKind, SharedStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};

pub const DEFAULT_SESSION_PREFIX: &str = "photomesh_session_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Directory name, `<prefix><YYYYMMDD_HHMMSS>`
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionListing {
    pub id: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub file_count: usize,
}

pub struct SessionManager {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn session_name(&self, at: DateTime<Utc>) -> String {
        format!("{}{}", self.prefix, at.format("%Y%m%d_%H%M%S"))
    }

    /// Probe `base` if present, otherwise the directory it would be created in
    async fn probe_base(&self, base: &Path) -> Result<bool> {
        if self.store.exists(base).await? {
            self.store.probe(base).await?;
            return Ok(true);
        }
        let parent = base
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(base);
        self.store.probe(parent).await?;
        Ok(false)
    }

    /// Create a fresh session directory under `base`.
    ///
    /// # Errors
    ///
    /// - `StorageUnreachable` when the base cannot be probed
    /// - `SessionCollision` when the timestamped name already exists
    pub async fn create_session(&self, base: &Path) -> Result<Session> {
        self.probe_base(base).await?;
        self.store.create_dir_all(base).await?;

        let created_at = self.clock.now();
        let id = self.session_name(created_at);
        let path = base.join(&id);

        match self.store.create_dir_new(&path).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::AlreadyExists => {
                return Err(OrchestratorError::SessionCollision(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!("Created session {} at {}", id, path.display());
        Ok(Session {
            id,
            path,
            created_at,
        })
    }

    /// Sessions under `base`, newest first
    pub async fn list_sessions(&self, base: &Path) -> Result<Vec<SessionListing>> {
        if !self.probe_base(base).await? {
            return Ok(Vec::new());
        }

        let mut listings = Vec::new();
        for entry in self.store.list_dir(base).await? {
            if !entry.metadata.is_dir() || !entry.name.starts_with(&self.prefix) {
                continue;
            }
            match self.store.list_dir(&entry.path).await {
                Ok(children) => listings.push(SessionListing {
                    file_count: children.iter().filter(|c| c.metadata.is_file()).count(),
                    id: entry.name,
                    path: entry.path,
                    modified_at: entry.metadata.modified,
                }),
                Err(e) => warn!("Skipping unreadable session {}: {}", entry.path.display(), e),
            }
        }

        listings.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use photomesh_storage::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> (SessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
        ));
        (
            SessionManager::new(store, clock.clone(), DEFAULT_SESSION_PREFIX),
            clock,
        )
    }

    #[tokio::test]
    async fn test_create_session_name_and_parent() {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/nas");
        let (manager, _) = manager(store.clone());

        let session = manager.create_session(Path::new("/nas/output")).await.unwrap();
        assert_eq!(session.id, "photomesh_session_20240309_140507");
        assert_eq!(
            session.path,
            PathBuf::from("/nas/output/photomesh_session_20240309_140507")
        );
        assert!(store.exists(&session.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_second_collides() {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/out");
        let (manager, clock) = manager(store);

        manager.create_session(Path::new("/out")).await.unwrap();
        let err = manager.create_session(Path::new("/out")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionCollision(_)));

        clock.advance(std::time::Duration::from_secs(1));
        assert!(manager.create_session(Path::new("/out")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_base() {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/nas/output");
        store.mark_unreachable("/nas");
        let (manager, _) = manager(store.clone());

        let err = manager.create_session(Path::new("/nas/output")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StorageUnreachable(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_list_missing_base_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/nas");
        let (manager, _) = manager(store);
        assert!(manager
            .list_sessions(Path::new("/nas/output"))
            .await
            .unwrap()
            .is_empty());
    }
}
