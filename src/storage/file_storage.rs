use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{session_key, SessionHandler, SESSION_KEY_PREFIX};
use crate::storage::types::{gc_cutoff, GcOutcome};

/// Local filesystem backend: one `sess_<id>` file per session in a single
/// directory.
///
/// Writes go to a hidden temporary file that is then renamed over the
/// session file, so a concurrent reader sees either the old or the new
/// record, never a torn one. Garbage collection relies on file modification
/// times.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            error!("Failed to create session dir {}: {}", root.display(), e);
            StorageError::SetupFailed(format!("cannot create {}: {}", root.display(), e))
        })?;
        info!("FileStorage initialized at {}", root.display());
        Ok(Self { root })
    }

    /// Construct FileStorage using env var SESSION_KEEPER_FILE_STORAGE_DIR if set, otherwise current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("SESSION_KEEPER_FILE_STORAGE_DIR") {
            info!("Using FileStorage from SESSION_KEEPER_FILE_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            StorageError::SetupFailed(e.to_string())
        })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_file_path(&self, session_id: &str) -> PathBuf {
        self.root.join(session_key(session_id))
    }

    fn read_session_file(&self, session_id: &str) -> Result<String, StorageError> {
        let path = self.session_file_path(session_id);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => {
                error!("Failed to read session file {}: {}", path.display(), e);
                Err(StorageError::ReadFailed)
            }
        }
    }

    fn write_session_file(&self, session_id: &str, data: &str) -> Result<(), StorageError> {
        let path = self.session_file_path(session_id);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", session_key(session_id), Uuid::new_v4().simple()));
        fs::write(&tmp, data).map_err(|e| {
            error!("Failed to write session file {}: {}", tmp.display(), e);
            StorageError::WriteFailed
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            error!("Failed to move {} to {}: {}", tmp.display(), path.display(), e);
            let _ = fs::remove_file(&tmp);
            StorageError::WriteFailed
        })?;
        debug!("Wrote {} byte(s) to {}", data.len(), path.display());
        Ok(())
    }

    fn remove_session_file(&self, path: &Path) -> Result<bool, StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                error!("Failed to remove session file {}: {}", path.display(), e);
                Err(StorageError::DeleteFailed)
            }
        }
    }

    fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        let mut failed = 0usize;
        let entries = fs::read_dir(&self.root).map_err(|e| {
            error!("Failed to read session dir {}: {}", self.root.display(), e);
            StorageError::ReadFailed
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let is_session = name.starts_with(SESSION_KEY_PREFIX);
            if !is_session && !is_leftover_tmp(name) {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(e) => {
                    // removed by a concurrent destroy or sweep
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified >= older_than {
                continue;
            }
            match self.remove_session_file(&path) {
                Ok(true) if is_session => removed += 1,
                Ok(true) => debug!("Removed leftover temp file {}", path.display()),
                Ok(false) => {}
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            warn!("{} stale session file(s) could not be removed", failed);
        }
        info!("Removed {} stale session file(s) (cutoff: {})", removed, older_than.to_rfc3339());
        Ok(removed)
    }
}

/// Temporary file of an interrupted write: `.sess_<id>.<uuid>.tmp`.
fn is_leftover_tmp(name: &str) -> bool {
    name.ends_with(".tmp")
        && name
            .strip_prefix('.')
            .is_some_and(|rest| rest.starts_with(SESSION_KEY_PREFIX))
}

impl SessionHandler for FileStorage {
    fn open(&self, _save_path: &str, _session_name: &str) -> bool {
        if !self.root.is_dir() {
            if let Err(e) = fs::create_dir_all(&self.root) {
                error!("Failed to create session dir {}: {}", self.root.display(), e);
                return false;
            }
        }
        match fs::metadata(&self.root) {
            Ok(meta) if !meta.permissions().readonly() => true,
            Ok(_) => {
                warn!("Session dir {} is not writable", self.root.display());
                false
            }
            Err(e) => {
                error!("Failed to stat session dir {}: {}", self.root.display(), e);
                false
            }
        }
    }

    fn close(&self) -> bool {
        true
    }

    fn read(&self, session_id: &str) -> String {
        self.read_session_file(session_id).unwrap_or_default()
    }

    fn write(&self, session_id: &str, data: &str) -> bool {
        self.write_session_file(session_id, data).is_ok()
    }

    fn destroy(&self, session_id: &str) -> bool {
        self.remove_session_file(&self.session_file_path(session_id)).is_ok()
    }

    fn gc(&self, max_lifetime: u64) -> GcOutcome {
        match self.sweep(gc_cutoff(max_lifetime)) {
            Ok(n) => GcOutcome::Removed(n),
            Err(_) => GcOutcome::Failed,
        }
    }
}
