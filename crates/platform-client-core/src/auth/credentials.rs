use keyring::Entry;
use tracing::debug;

use super::session::SessionData;
use super::storage::{SessionError, SessionStorage};

/// Default keychain service name for stored sessions
pub const SERVICE_NAME: &str = "platform-client";

/// Session storage in the OS keychain.
///
/// The whole session bag is kept as one JSON blob in the password slot of a
/// `(service, account)` entry.
pub struct KeyringStorage {
    entry: Entry,
}

impl KeyringStorage {
    pub fn new(service: &str, account: &str) -> Result<Self, SessionError> {
        let entry = Entry::new(service, account)?;
        Ok(Self { entry })
    }

    /// Entry under the default service name
    pub fn for_account(account: &str) -> Result<Self, SessionError> {
        Self::new(SERVICE_NAME, account)
    }

    /// Check if a stored session exists for this entry
    pub fn has_session(&self) -> bool {
        self.entry.get_password().is_ok()
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&mut self) -> Result<SessionData, SessionError> {
        match self.entry.get_password() {
            Ok(blob) => Ok(serde_json::from_str(&blob)?),
            Err(keyring::Error::NoEntry) => {
                debug!("No session in keychain");
                Ok(SessionData::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&mut self, data: &SessionData) -> Result<(), SessionError> {
        if data.is_empty() {
            return match self.entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        let blob = serde_json::to_string(data)?;
        self.entry.set_password(&blob)?;
        Ok(())
    }
}
