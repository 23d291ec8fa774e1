//! Local file backend
//!
//! State lives in a pretty-printed JSON file (default `deskform.state.json`)
//! and the lock in a sibling `.lock` file created exclusively, so two runs
//! cannot both believe they hold it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "deskform.state.json";

    /// Backend over `deskform.state.json` in the current directory
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Backend over a specific state file; the lock file sits next to it
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => {
                let lock = serde_json::from_str(&content).map_err(|e| {
                    BackendError::InvalidState(format!(
                        "unreadable lock file {}: {}",
                        self.lock_path.display(),
                        e
                    ))
                })?;
                Ok(Some(lock))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(&self.lock_path, e)),
        }
    }

    async fn remove_lock_file(&self) -> BackendResult<()> {
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::io(&self.lock_path, e))
    }

    /// Create the lock file, failing if it already exists
    async fn create_lock_file(&self, lock: &LockInfo) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(lock)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;
        file.write_all(&content).await?;
        file.flush().await
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::io(&self.state_path, e)),
        };
        let state: StateFile = serde_json::from_str(&content)
            .map_err(|e| BackendError::InvalidState(format!("failed to parse state file: {}", e)))?;
        if state.version > StateFile::CURRENT_VERSION {
            return Err(BackendError::InvalidState(format!(
                "state file version {} is newer than supported version {}",
                state.version,
                StateFile::CURRENT_VERSION
            )));
        }
        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(stored) = self.read_state().await? {
            if stored.lineage != state.lineage {
                return Err(BackendError::LineageMismatch {
                    expected: stored.lineage,
                    actual: state.lineage.clone(),
                });
            }
            if state.serial < stored.serial {
                return Err(BackendError::StaleSerial {
                    stored: stored.serial,
                    attempted: state.serial,
                });
            }
        }

        // Write next to the target and rename so a crash never leaves half a file
        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| BackendError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.state_path)
            .await
            .map_err(|e| BackendError::io(&self.state_path, e))?;
        debug!(
            "wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);
        match self.create_lock_file(&lock).await {
            Ok(()) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(BackendError::io(&self.lock_path, e)),
        }

        match self.read_lock().await? {
            Some(existing) if !existing.is_expired() => Err(BackendError::locked(&existing)),
            existing => {
                if let Some(existing) = existing {
                    warn!(
                        "taking over expired lock {} held by {} since {}",
                        existing.id, existing.who, existing.created
                    );
                }
                self.remove_lock_file().await?;
                self.create_lock_file(&lock).await.map_err(|e| {
                    if e.kind() == ErrorKind::AlreadyExists {
                        BackendError::InvalidState(
                            "lock file reappeared while taking over an expired lock".to_string(),
                        )
                    } else {
                        BackendError::io(&self.lock_path, e)
                    }
                })?;
                Ok(lock)
            }
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let Some(existing) = self.read_lock().await? else {
            return Err(BackendError::LockNotFound(lock.id.clone()));
        };
        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock_file().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        let Some(existing) = self.read_lock().await? else {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        };
        if existing.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }
        warn!(
            "force-unlocking {} held by {} for {}",
            existing.id, existing.who, existing.operation
        );
        self.remove_lock_file().await
    }

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
        self.read_lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn backend_in(dir: &Path) -> LocalBackend {
        LocalBackend::with_path(dir.join("deskform.state.json"))
    }

    #[test]
    fn lock_file_sits_next_to_state() {
        let backend = LocalBackend::new();
        assert_eq!(backend.state_path(), Path::new("deskform.state.json"));
        assert_eq!(backend.lock_path(), Path::new("deskform.state.lock"));
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        assert!(backend.read_state().await.unwrap().is_none());

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let read = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, state.lineage);
        let raw = std::fs::read_to_string(backend.state_path()).unwrap();
        assert!(raw.contains("\n  \"serial\": 1"));
    }

    #[tokio::test]
    async fn refuses_other_lineage_and_older_serial() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let other = StateFile::new();
        assert!(matches!(
            backend.write_state(&other).await,
            Err(BackendError::LineageMismatch { .. })
        ));

        let mut older = state.clone();
        older.serial = 1;
        assert!(matches!(
            backend.write_state(&older).await,
            Err(BackendError::StaleSerial { stored: 2, attempted: 1 })
        ));
    }

    #[tokio::test]
    async fn second_lock_is_refused_until_released() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(matches!(
            backend.acquire_lock("destroy").await,
            Err(BackendError::Locked { .. })
        ));
        assert_eq!(backend.current_lock().await.unwrap(), Some(lock.clone()));

        backend.release_lock(&lock).await.unwrap();
        let next = backend.acquire_lock("destroy").await.unwrap();
        assert_eq!(next.operation, "destroy");
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let stale = LockInfo::with_ttl("apply", Duration::seconds(-1));
        std::fs::write(backend.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale.id);
    }

    #[tokio::test]
    async fn force_unlock_checks_lock_id() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(matches!(
            backend.force_unlock("not-the-lock").await,
            Err(BackendError::LockMismatch { .. })
        ));
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(backend.current_lock().await.unwrap().is_none());
        assert!(matches!(
            backend.force_unlock(&lock.id).await,
            Err(BackendError::LockNotFound(_))
        ));
    }
}
