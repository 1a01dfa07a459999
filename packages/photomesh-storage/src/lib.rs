//! PhotoMesh shared storage
//!
//! Path-addressable access to the store that holds input photos and output
//! sessions (a local disk or a mounted network share).
//!
//! ## Core Principles
//!
//! 1. **Reachability is its own error**: `ErrorKind::Unreachable` means "not
//!    mounted / not there", never "disk full"
//! 2. **Exclusive directories**: session directories are never reused
//! 3. **Atomic files**: readers never observe a half-written artifact
//!
//! ## Usage
//!
//! ```rust,ignore
//! use photomesh_storage::{LocalFsStore, SharedStore};
//!
//! let store = LocalFsStore::new();
//! store.probe(&output_base).await?;
//! store.create_dir_new(&output_base.join("photomesh_session_20240101_120000")).await?;
//! store.write_atomic(&session_dir.join("mesh.obj"), obj.as_bytes()).await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{DirEntry, EntryKind, EntryMetadata, SharedStore};
pub use infrastructure::{LocalFsStore, MemoryStore};
