use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tracing::debug;

use super::storage::{NullStorage, SessionError, SessionStorage};

/// Raw key-value contents of a session.
pub type SessionData = serde_json::Map<String, Value>;

/// Keys the connector reads and writes.
pub mod keys {
    pub const USERNAME: &str = "username";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const TOKEN_TYPE: &str = "tokenType";
    /// Epoch seconds; absent means the access token does not expire.
    pub const EXPIRES: &str = "expires";
    pub const REFRESH_TOKEN: &str = "refreshToken";
}

/// A persistable key-value bag holding the authentication context.
///
/// Contents are read from the storage backend once, at construction. `save`
/// writes only when something changed since the last load or save.
pub struct Session {
    data: SessionData,
    storage: Box<dyn SessionStorage>,
    dirty: bool,
}

impl Session {
    /// Empty session that persists into `storage`, ignoring whatever the
    /// storage already holds.
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self {
            data: SessionData::new(),
            storage: Box::new(storage),
            dirty: false,
        }
    }

    /// Session restored from `storage`.
    pub fn load(mut storage: impl SessionStorage + 'static) -> Result<Self, SessionError> {
        let data = storage.load()?;
        debug!(keys = data.len(), "Session loaded");
        Ok(Self {
            data,
            storage: Box::new(storage),
            dirty: false,
        })
    }

    /// Session that is never written anywhere.
    pub fn in_memory() -> Self {
        Self::new(NullStorage)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.data.get(key) != Some(&value) {
            self.data.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    /// Bulk set
    pub fn add<K, V>(&mut self, values: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in values {
            self.set(key.as_ref(), value);
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) {
        if self.data.remove(key).is_some() {
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.data.clear();
            self.dirty = true;
        }
    }

    /// Flush pending changes to the storage backend.
    pub fn save(&mut self) -> Result<(), SessionError> {
        if !self.dirty {
            return Ok(());
        }
        self.storage.persist(&self.data)?;
        self.dirty = false;
        debug!(keys = self.data.len(), "Session saved");
        Ok(())
    }

    /// Put back contents taken earlier with `data().clone()`.
    pub fn restore(&mut self, data: SessionData, dirty: bool) {
        self.data = data;
        self.dirty = dirty;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn username(&self) -> Option<&str> {
        self.get_str(keys::USERNAME)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get_str(keys::ACCESS_TOKEN).filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get_str(keys::REFRESH_TOKEN).filter(|t| !t.is_empty())
    }

    pub fn token_type(&self) -> Option<&str> {
        self.get_str(keys::TOKEN_TYPE).filter(|t| !t.is_empty())
    }

    /// Expiry in epoch seconds. Zero or negative values read as "no expiry".
    pub fn expires(&self) -> Option<i64> {
        let value = self.get(keys::EXPIRES)?;
        let seconds = match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        seconds.filter(|s| *s > 0)
    }

    pub fn is_logged_in(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&String> = self.data.keys().collect();
        f.debug_struct("Session")
            .field("keys", &keys)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// A session shared by reference.
///
/// The connector and every holder of a clone read and write the same
/// contents; the last write wins. Use [`SharedSession::snapshot`] for an
/// isolated copy.
#[derive(Clone, Debug)]
pub struct SharedSession(Arc<Mutex<Session>>);

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> SessionData {
        self.0.lock().data().clone()
    }

    pub fn ptr_eq(&self, other: &SharedSession) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Session> for SharedSession {
    fn from(session: Session) -> Self {
        Self::new(session)
    }
}
