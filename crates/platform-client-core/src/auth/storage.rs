//! Durable backings for [`Session`](super::Session) data.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::session::SessionData;

/// Session file name in the session directory
const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to access session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse session data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Where session data lives between process runs.
///
/// `load` is called once when a session is constructed; `persist` receives the
/// full key-value bag every time the session is saved with pending changes. An
/// empty bag means the backing should forget the session entirely.
pub trait SessionStorage: Send {
    fn load(&mut self) -> Result<SessionData, SessionError>;

    fn persist(&mut self, data: &SessionData) -> Result<(), SessionError>;
}

/// JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `<dir>/session.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStorage for FileStorage {
    fn load(&mut self) -> Result<SessionData, SessionError> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No session file found");
            return Ok(SessionData::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let data: SessionData = serde_json::from_str(&contents)?;
        debug!(path = ?self.path, keys = data.len(), "Session file loaded");
        Ok(data)
    }

    fn persist(&mut self, data: &SessionData) -> Result<(), SessionError> {
        if data.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(|e| self.io_error(e))?;
                debug!(path = ?self.path, "Session file removed");
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))?;
        debug!(path = ?self.path, "Session file written");
        Ok(())
    }
}

/// In-process storage. Clones share the same contents, so a caller can keep a
/// handle and observe what a connector persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<SessionData>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SessionData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            saves: Arc::default(),
        }
    }

    /// Contents as of the last persist.
    pub fn persisted(&self) -> SessionData {
        self.data.lock().clone()
    }

    /// Number of times data was actually written.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&mut self) -> Result<SessionData, SessionError> {
        Ok(self.data.lock().clone())
    }

    fn persist(&mut self, data: &SessionData) -> Result<(), SessionError> {
        *self.data.lock() = data.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Storage that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorage;

impl SessionStorage for NullStorage {
    fn load(&mut self) -> Result<SessionData, SessionError> {
        Ok(SessionData::new())
    }

    fn persist(&mut self, _data: &SessionData) -> Result<(), SessionError> {
        Ok(())
    }
}
