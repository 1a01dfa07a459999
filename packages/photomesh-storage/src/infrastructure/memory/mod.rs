//! In-memory adapter for `SharedStore`
//!
//! Used by tests to observe exactly which mutations a component performs and
//! to inject unreachable locations, unreadable entries and failing writes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{build_matcher, DirEntry, EntryKind, EntryMetadata, SharedStore};
use crate::{ErrorKind, Result, StorageError};

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { data: Vec<u8>, modified: DateTime<Utc> },
}

impl Node {
    fn metadata(&self) -> EntryMetadata {
        match self {
            Node::Dir { modified } => EntryMetadata {
                kind: EntryKind::Directory,
                len: 0,
                modified: *modified,
            },
            Node::File { data, modified } => EntryMetadata {
                kind: EntryKind::File,
                len: data.len() as u64,
                modified: *modified,
            },
        }
    }

    fn set_modified(&mut self, at: DateTime<Utc>) {
        match self {
            Node::Dir { modified } | Node::File { modified, .. } => *modified = at,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    unreachable: HashSet<PathBuf>,
    unreadable: HashSet<PathBuf>,
    failing_writes: HashSet<PathBuf>,
    mutations: usize,
    ticks: i64,
}

impl State {
    /// Logical clock: every mutation is one second after the previous one
    fn next_time(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        DateTime::<Utc>::from(std::time::UNIX_EPOCH)
            + Duration::days(19_000)
            + Duration::seconds(self.ticks)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.nodes.get(path), Some(Node::Dir { .. }))
    }

    fn parent_is_dir(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.is_dir(parent),
            _ => true,
        }
    }

    fn write_fails(&self, path: &Path) -> bool {
        path.ancestors().any(|a| self.failing_writes.contains(a))
    }

    fn insert_dirs(&mut self, path: &Path) {
        let missing: Vec<PathBuf> = path
            .ancestors()
            .filter(|a| !a.as_os_str().is_empty() && !self.nodes.contains_key(*a))
            .map(Path::to_path_buf)
            .collect();
        for dir in missing.into_iter().rev() {
            let modified = self.next_time();
            self.nodes.insert(dir, Node::Dir { modified });
        }
    }
}

/// `SharedStore` backed by a map of paths
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a directory (and parents) without counting it as a mutation
    pub fn seed_dir(&self, path: impl AsRef<Path>) {
        self.state.lock().insert_dirs(path.as_ref());
    }

    /// Seed a file (and parent directories) without counting it as a mutation
    pub fn seed_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.state.lock();
        if let Some(parent) = path.parent() {
            state.insert_dirs(parent);
        }
        let modified = state.next_time();
        state.nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: data.into(),
                modified,
            },
        );
    }

    /// Override the modification time of an existing entry
    pub fn set_modified(&self, path: impl AsRef<Path>, at: DateTime<Utc>) {
        if let Some(node) = self.state.lock().nodes.get_mut(path.as_ref()) {
            node.set_modified(at);
        }
    }

    /// Make `probe` on this location report `Unreachable`
    pub fn mark_unreachable(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unreachable
            .insert(path.as_ref().to_path_buf());
    }

    /// Make this entry unreadable: skipped by listings, errors on direct access
    pub fn mark_unreadable(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unreadable
            .insert(path.as_ref().to_path_buf());
    }

    /// Make every file write at or below `path` fail with an I/O error
    pub fn fail_writes_under(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .failing_writes
            .insert(path.as_ref().to_path_buf());
    }

    /// Number of mutating calls performed through the `SharedStore` API
    pub fn mutation_count(&self) -> usize {
        self.state.lock().mutations
    }

    /// All file paths at or below `root`
    pub fn files_under(&self, root: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = root.as_ref();
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|(path, node)| matches!(node, Node::File { .. }) && path.starts_with(root))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// File contents, if the file exists
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(path.as_ref()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn put_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;

        if state.write_fails(path) {
            return Err(StorageError::new(
                ErrorKind::IO,
                format!("{}: injected write failure", path.display()),
            ));
        }
        if !state.parent_is_dir(path) {
            return Err(StorageError::not_found(path.parent().unwrap_or(path)));
        }
        if state.is_dir(path) {
            return Err(StorageError::already_exists(path));
        }

        let modified = state.next_time();
        state.nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: contents.to_vec(),
                modified,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn probe(&self, path: &Path) -> Result<()> {
        let state = self.state.lock();
        if state.unreachable.iter().any(|u| path.starts_with(u)) || !state.is_dir(path) {
            return Err(StorageError::unreachable(path));
        }
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.state.lock().nodes.contains_key(path))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if matches!(state.nodes.get(path), Some(Node::File { .. })) {
            return Err(StorageError::already_exists(path));
        }
        state.insert_dirs(path);
        Ok(())
    }

    async fn create_dir_new(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if state.nodes.contains_key(path) {
            return Err(StorageError::already_exists(path));
        }
        if !state.parent_is_dir(path) {
            return Err(StorageError::not_found(path.parent().unwrap_or(path)));
        }
        let modified = state.next_time();
        state.nodes.insert(path.to_path_buf(), Node::Dir { modified });
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let state = self.state.lock();
        if state.unreadable.contains(path) {
            return Err(StorageError::unreadable(path));
        }
        if !state.is_dir(path) {
            return Err(StorageError::not_found(path));
        }

        Ok(state
            .nodes
            .iter()
            .filter(|(child, _)| child.parent() == Some(path))
            .filter(|(child, _)| !state.unreadable.contains(*child))
            .map(|(child, node)| DirEntry {
                path: child.clone(),
                name: child
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                metadata: node.metadata(),
            })
            .collect())
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
        let state = self.state.lock();
        if state.unreadable.contains(path) {
            return Err(StorageError::unreadable(path));
        }
        match state.nodes.get(path) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(StorageError::new(
                ErrorKind::IO,
                format!("{} is a directory", path.display()),
            )),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.put_file(path, contents)
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        // A single map insert is already all-or-nothing
        self.put_file(path, contents)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;
        match state.nodes.get(path) {
            Some(Node::File { .. }) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(StorageError::new(
                ErrorKind::IO,
                format!("{} is a directory", path.display()),
            )),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<EntryMetadata> {
        let state = self.state.lock();
        if state.unreadable.contains(path) {
            return Err(StorageError::unreadable(path));
        }
        state
            .nodes
            .get(path)
            .map(Node::metadata)
            .ok_or_else(|| StorageError::not_found(path))
    }
}
