//! Backend over an abstract filesystem.
//!
//! [`AdapterStorage`] stores each session as the file `<root>/sess_<id>` of a
//! [`Filesystem`], which may be a local directory ([`LocalFilesystem`]) or
//! anything else that can put, read, list and delete named blobs
//! ([`MemoryFilesystem`] is the in-process variant).
//!
//! Paths given to a [`Filesystem`] are absolute and `/`-separated.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{session_key, SessionHandler, SESSION_KEY_PREFIX};
use crate::storage::types::{gc_cutoff, GcOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry returned by [`Filesystem::list_contents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub basename: String,
    pub kind: EntryKind,
}

pub trait Filesystem: Send + Sync {
    /// Contents of the file at `path`, `None` when it does not exist.
    fn read(&self, path: &str) -> Result<Option<String>, StorageError>;

    /// Creates or replaces the file at `path`.
    fn put(&self, path: &str, contents: &str) -> Result<(), StorageError>;

    fn has(&self, path: &str) -> Result<bool, StorageError>;

    /// Removes the file at `path`; `false` when there was nothing to remove.
    fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Direct children of `dir`. A missing directory lists as empty.
    fn list_contents(&self, dir: &str) -> Result<Vec<FileEntry>, StorageError>;

    /// Modification time of `path`, `None` when it does not exist.
    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, StorageError>;
}

fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// [`Filesystem`] rooted at a local directory.
pub struct LocalFilesystem {
    base: PathBuf,
}

impl LocalFilesystem {
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self, StorageError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).map_err(|e| {
            error!("Failed to create adapter base dir {}: {}", base.display(), e);
            StorageError::SetupFailed(format!("cannot create {}: {}", base.display(), e))
        })?;
        Ok(Self { base })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base.join(path.trim_start_matches('/'))
    }
}

impl Filesystem for LocalFilesystem {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.resolve(path)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read {}: {}", path, e);
                Err(StorageError::ReadFailed)
            }
        }
    }

    fn put(&self, path: &str, contents: &str) -> Result<(), StorageError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        fs::write(&target, contents).map_err(|e| {
            error!("Failed to write {}: {}", path, e);
            StorageError::WriteFailed
        })
    }

    fn has(&self, path: &str) -> Result<bool, StorageError> {
        self.resolve(path).try_exists().map_err(|e| {
            error!("Failed to stat {}: {}", path, e);
            StorageError::ReadFailed
        })
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                error!("Failed to delete {}: {}", path, e);
                Err(StorageError::DeleteFailed)
            }
        }
    }

    fn list_contents(&self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        let entries = match fs::read_dir(self.resolve(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!("Failed to list {}: {}", dir, e);
                return Err(StorageError::ReadFailed);
            }
        };
        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed
            })?;
            let Some(basename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => EntryKind::Dir,
                Ok(_) => EntryKind::File,
                Err(_) => continue,
            };
            listed.push(FileEntry {
                path: join_path(dir, &basename),
                basename,
                kind,
            });
        }
        Ok(listed)
    }

    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        match fs::metadata(self.resolve(path)).and_then(|m| m.modified()) {
            Ok(t) => Ok(Some(DateTime::<Utc>::from(t))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to stat {}: {}", path, e);
                Err(StorageError::ReadFailed)
            }
        }
    }
}

/// In-process [`Filesystem`]; modification times can be set by hand.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: Mutex<BTreeMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_modified(&self, path: &str, when: DateTime<Utc>) -> bool {
        let Ok(mut files) = self.files.lock() else {
            return false;
        };
        match files.get_mut(&normalize(path)) {
            Some(entry) => {
                entry.1 = when;
                true
            }
            None => false,
        }
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

impl Filesystem for MemoryFilesystem {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        let files = self.files.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(files.get(&normalize(path)).map(|(contents, _)| contents.clone()))
    }

    fn put(&self, path: &str, contents: &str) -> Result<(), StorageError> {
        let mut files = self.files.lock().map_err(|_| StorageError::WriteFailed)?;
        files.insert(normalize(path), (contents.to_owned(), Utc::now()));
        Ok(())
    }

    fn has(&self, path: &str) -> Result<bool, StorageError> {
        let files = self.files.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(files.contains_key(&normalize(path)))
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let mut files = self.files.lock().map_err(|_| StorageError::DeleteFailed)?;
        Ok(files.remove(&normalize(path)).is_some())
    }

    fn list_contents(&self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        let files = self.files.lock().map_err(|_| StorageError::ReadFailed)?;
        let dir = normalize(dir);
        let prefix = if dir == "/" { dir.clone() } else { format!("{}/", dir) };

        let mut listed = Vec::new();
        let mut subdirs = BTreeSet::new();
        for path in files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    subdirs.insert(child.to_owned());
                }
                None => listed.push(FileEntry {
                    path: path.clone(),
                    basename: rest.to_owned(),
                    kind: EntryKind::File,
                }),
            }
        }
        listed.extend(subdirs.into_iter().map(|name| FileEntry {
            path: join_path(&dir, &name),
            basename: name,
            kind: EntryKind::Dir,
        }));
        Ok(listed)
    }

    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let files = self.files.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(files.get(&normalize(path)).map(|(_, when)| *when))
    }
}

/// Session handler storing `sess_<id>` files under `root` of a [`Filesystem`].
pub struct AdapterStorage<F: Filesystem> {
    fs: F,
    root: String,
}

impl AdapterStorage<LocalFilesystem> {
    pub fn local<P: AsRef<Path>>(base: P, root: &str) -> Result<Self, StorageError> {
        let storage = Self::new(LocalFilesystem::new(base)?, root);
        info!("AdapterStorage initialized at {}", storage.root);
        Ok(storage)
    }
}

impl<F: Filesystem> AdapterStorage<F> {
    pub fn new(fs: F, root: &str) -> Self {
        Self {
            fs,
            root: normalize(root),
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn path_for(&self, session_id: &str) -> String {
        join_path(&self.root, &session_key(session_id))
    }

    fn remove(&self, session_id: &str) -> Result<(), StorageError> {
        let path = self.path_for(session_id);
        if self.fs.has(&path)? {
            self.fs.delete(&path)?;
            debug!("Deleted {}", path);
        }
        Ok(())
    }

    fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for entry in self.fs.list_contents(&self.root)? {
            if entry.kind != EntryKind::File || !entry.basename.starts_with(SESSION_KEY_PREFIX) {
                continue;
            }
            let modified = match self.fs.last_modified(&entry.path) {
                Ok(Some(t)) => t,
                Ok(None) => {
                    debug!("Skipping {}: removed during sweep", entry.path);
                    continue;
                }
                Err(_) => {
                    warn!("Skipping {}: modification time unavailable", entry.path);
                    continue;
                }
            };
            if modified < older_than && self.fs.delete(&entry.path)? {
                removed += 1;
            }
        }
        info!("Removed {} stale session file(s) under {}", removed, self.root);
        Ok(removed)
    }
}

impl<F: Filesystem> SessionHandler for AdapterStorage<F> {
    fn open(&self, _save_path: &str, _session_name: &str) -> bool {
        true
    }

    fn close(&self) -> bool {
        true
    }

    fn read(&self, session_id: &str) -> String {
        self.fs
            .read(&self.path_for(session_id))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn write(&self, session_id: &str, data: &str) -> bool {
        self.fs.put(&self.path_for(session_id), data).is_ok()
    }

    fn destroy(&self, session_id: &str) -> bool {
        self.remove(session_id).is_ok()
    }

    fn gc(&self, max_lifetime: u64) -> GcOutcome {
        match self.sweep(gc_cutoff(max_lifetime)) {
            Ok(n) => GcOutcome::Removed(n),
            Err(_) => GcOutcome::Failed,
        }
    }
}
