//! Local filesystem adapter for `SharedStore`
//!
//! Works for local disks and for network shares mounted into the local
//! namespace. Mounting itself is outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::{build_matcher, DirEntry, EntryKind, EntryMetadata, SharedStore};
use crate::{Result, StorageError};

/// `SharedStore` over `tokio::fs`
#[derive(Debug, Clone, Default)]
pub struct LocalFsStore {
    _private: (),
}

impl LocalFsStore {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

fn to_metadata(meta: &std::fs::Metadata) -> EntryMetadata {
    let kind = if meta.is_file() {
        EntryKind::File
    } else if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::Other
    };
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

    EntryMetadata {
        kind,
        len: if kind == EntryKind::File { meta.len() } else { 0 },
        modified,
    }
}

#[async_trait]
impl SharedStore for LocalFsStore {
    async fn probe(&self, path: &Path) -> Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::unreachable(path)),
            Err(e) => {
                debug!("probe failed for {}: {}", path.display(), e);
                Err(StorageError::unreachable(path).with_source(e))
            }
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn create_dir_new(&self, path: &Path) -> Result<()> {
        // create_dir (not _all) fails with AlreadyExists instead of reusing
        tokio::fs::create_dir(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let mut entries = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", path.display(), e);
                    continue;
                }
            };

            let entry_path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping {}: {}", entry_path.display(), e);
                    continue;
                }
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                metadata: to_metadata(&meta),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn glob(
        &self,
        dir: &Path,
        patterns: &[String],
        case_insensitive: bool,
    ) -> Result<Vec<PathBuf>> {
        let matcher = build_matcher(patterns, case_insensitive)?;
        let mut matched: Vec<PathBuf> = self
            .list_dir(dir)
            .await?
            .into_iter()
            .filter(|entry| entry.metadata.is_file() && matcher.is_match(&entry.name))
            .map(|entry| entry.path)
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let target = path.to_path_buf();
        let data = contents.to_vec();

        tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &data))
            .await
            .map_err(|e| {
                StorageError::new(
                    crate::ErrorKind::IO,
                    format!("atomic write task failed for {}: {}", path.display(), e),
                )
            })?
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn metadata(&self, path: &Path) -> Result<EntryMetadata> {
        tokio::fs::metadata(path)
            .await
            .map(|meta| to_metadata(&meta))
            .map_err(|e| StorageError::io(path, e))
    }
}

/// Temp file in the target directory, fsync, then rename over the target.
///
/// `NamedTempFile` deletes itself on drop, so every early return cleans up.
fn write_atomic_blocking(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".photomesh-")
        .suffix(".partial")
        .tempfile_in(parent)
        .map_err(|e| StorageError::io(parent, e))?;

    tmp.write_all(data)
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;

    tmp.persist(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}
