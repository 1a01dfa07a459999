//! Domain layer for the shared photo/session store
//!
//! # Core Principles
//!
//! 1. **Probe before write**: callers probe reachability before creating
//!    anything, so "share not mounted" is distinguishable from "disk full".
//! 2. **Exclusive create**: `create_dir_new` never reuses an existing entry.
//! 3. **Atomic publish**: `write_atomic` makes a file visible under its final
//!    name only once its full contents are on disk.
//!
//! # Domain Models
//!
//! - `EntryKind` / `EntryMetadata`: what a path is, its size and mtime
//! - `DirEntry`: one readable child of a listed directory
//!
//! # Port Trait
//!
//! - `SharedStore`: path-addressable storage abstraction
//!
//! # Examples
//!
//! ```rust,ignore
//! use photomesh_storage::{SharedStore, LocalFsStore};
//!
//! async fn example(store: impl SharedStore) -> Result<()> {
//!     store.probe(Path::new("/mnt/photos")).await?;
//!     let jpgs = store.glob(Path::new("/mnt/photos"), &["*.jpg".into()], true).await?;
//!     store.write_atomic(Path::new("/mnt/out/a.txt"), b"hello").await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of a storage entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Metadata of a storage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub len: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A readable child entry of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// File name component
    pub name: String,
    pub metadata: EntryMetadata,
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Shared storage abstraction
///
/// Implemented by [`crate::LocalFsStore`] (local disk or a mounted share) and
/// [`crate::MemoryStore`] (tests).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Verify that `path` is a reachable directory.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Unreachable` when the location is missing or not a
    /// directory. Never any other kind for a missing location.
    async fn probe(&self, path: &Path) -> Result<()>;

    /// Check whether `path` exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create `path` and all missing parents (no-op if present)
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Create exactly `path`; fails with `AlreadyExists` if it is present
    async fn create_dir_new(&self, path: &Path) -> Result<()>;

    /// List direct children of `path`.
    ///
    /// Children whose metadata cannot be read are skipped, not fatal.
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Regular files directly under `dir` whose names match any of `patterns`.
    ///
    /// Results are sorted by path.
    async fn glob(&self, dir: &Path, patterns: &[String], case_insensitive: bool)
        -> Result<Vec<PathBuf>>;

    /// Read a whole file
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a whole file (create or truncate)
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Write a file via a temporary sibling and rename into place.
    ///
    /// On failure no temporary file is left behind and `path` is untouched.
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Remove a file
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Metadata of a single entry
    async fn metadata(&self, path: &Path) -> Result<EntryMetadata>;
}

/// Build a case-aware matcher for a set of file-name globs
pub(crate) fn build_matcher(
    patterns: &[String],
    case_insensitive: bool,
) -> Result<globset::GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .literal_separator(true)
            .build()
            .map_err(|e| crate::StorageError::invalid_pattern(pattern, e))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| crate::StorageError::invalid_pattern(&patterns.join(","), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_metadata_kind() {
        let meta = EntryMetadata {
            kind: EntryKind::File,
            len: 42,
            modified: Utc::now(),
        };
        assert!(meta.is_file());
        assert!(!meta.is_dir());
    }

    #[test]
    fn test_dir_entry_serde() {
        let entry = DirEntry {
            path: PathBuf::from("/out/photomesh_session_20240101_120000"),
            name: "photomesh_session_20240101_120000".to_string(),
            metadata: EntryMetadata {
                kind: EntryKind::Directory,
                len: 0,
                modified: Utc::now(),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"directory\""));
        let back: DirEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_matcher_case_insensitive() {
        let set = build_matcher(&["*.jpg".to_string()], true).unwrap();
        assert!(set.is_match("IMG_0001.JPG"));
        assert!(set.is_match("img_0001.jpg"));
        assert!(!set.is_match("img_0001.png"));
    }

    #[test]
    fn test_matcher_case_sensitive() {
        let set = build_matcher(&["*.jpg".to_string()], false).unwrap();
        assert!(!set.is_match("IMG_0001.JPG"));
        assert!(set.is_match("img_0001.jpg"));
    }

    #[test]
    fn test_matcher_rejects_bad_pattern() {
        let err = build_matcher(&["[".to_string()], true).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidPattern);
    }
}
